use std::path::{Path, PathBuf};

pub const DEFAULT_LLM_API_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_LLM_MODEL_NAME: &str = "gemini-2.0-flash";
pub const DEFAULT_USER_AGENT: &str = concat!("lextract/", env!("CARGO_PKG_VERSION"));

/// Settings for the external text capability and the document fetcher.
#[derive(Clone, Debug)]
pub struct Config {
    pub llm_api_key: Option<String>,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: None,
            llm_api_base_url: DEFAULT_LLM_API_BASE_URL.to_string(),
            llm_model_name: DEFAULT_LLM_MODEL_NAME.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            llm_api_key: non_empty_var("LLM_API_KEY").or_else(|| non_empty_var("GEMINI_API_KEY")),
            llm_api_base_url: non_empty_var("LLM_API_BASE_URL")
                .unwrap_or(default.llm_api_base_url),
            llm_model_name: non_empty_var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            user_agent: non_empty_var("LEXTRACT_USER_AGENT").unwrap_or(default.user_agent),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model {
            self.llm_model_name = model;
        }
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// On-disk layout of the pipeline, relative to the working root.
#[derive(Clone, Debug)]
pub struct PipelineLayout {
    pub cases_workbook: PathBuf,
    pub links_file: PathBuf,
    pub data_dir: PathBuf,
    pub batches_dir: PathBuf,
    pub sections_dir: PathBuf,
    pub records_dir: PathBuf,
    pub merged_output: PathBuf,
    pub manifest_dir: PathBuf,
}

impl Default for PipelineLayout {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            cases_workbook: data_dir.join("cases.xlsx"),
            links_file: data_dir.join("extracted_links.txt"),
            batches_dir: Self::batches_dir_for(&data_dir),
            sections_dir: data_dir.join("extracted_sections"),
            records_dir: PathBuf::from("json"),
            merged_output: data_dir.join("output.json"),
            manifest_dir: data_dir.join("manifests"),
            data_dir,
        }
    }
}

impl PipelineLayout {
    /// Directory the admission stage writes batch files into, below its data dir.
    pub fn batches_dir_for(data_dir: &Path) -> PathBuf {
        data_dir.join("extracted_batches")
    }
}
