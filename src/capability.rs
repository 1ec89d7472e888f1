//! Narrow interface to the external text-extraction service.
//!
//! Stages only see [`TextCapability`]; the concrete client talks to any
//! OpenAI-compatible chat-completions endpoint.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("no API key configured (set LLM_API_KEY or GEMINI_API_KEY)")]
    MissingApiKey,
    #[error("request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("model {model} returned no content")]
    EmptyResponse { model: String },
}

pub trait TextCapability {
    /// Sends `prompt` followed by `document` and returns the raw reply text.
    fn extract(&self, prompt: &str, document: &str) -> Result<String, CapabilityError>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: reqwest::blocking::Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_key: config.llm_api_key.clone(),
            endpoint: format!(
                "{}/chat/completions",
                config.llm_api_base_url.trim_end_matches('/')
            ),
            model: config.llm_model_name.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl TextCapability for ChatCompletionsClient {
    fn extract(&self, prompt: &str, document: &str) -> Result<String, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CapabilityError::MissingApiKey)?;

        debug!(model = %self.model, chars = document.len(), "calling text capability");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: format!("{prompt}{document}"),
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .map_err(|source| CapabilityError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CapabilityError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().map_err(|source| CapabilityError::Decode {
            endpoint: self.endpoint.clone(),
            source,
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CapabilityError::EmptyResponse {
                model: self.model.clone(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
