use anyhow::Result;
use tracing::info;

use crate::capability::{ChatCompletionsClient, TextCapability};
use crate::cli::DefinitionsArgs;
use crate::commands::adapter::{collect_inputs, finish_stage, transform_inputs};
use crate::config::Config;
use crate::model::{BatchFileKind, ManifestKind, SizeClass};
use crate::util::ensure_directory;

/// Instruction sent ahead of each section file. The reply is expected to be a
/// JSON array of topic records but is stored unchecked; the merge stage validates it.
pub const DEFINITIONS_PROMPT: &str = r#"I will provide an excerpt from a competition case decision containing one or more market definitions.
Extract each individual market definition in full and return them as a JSON array, with no text before or after the brackets.
The excerpt starts with the lines "Case Number:", "Year:", "Policy Area:" and "Link:". Copy those values exactly into every record.
Each record must also name the product or service the definition is about in a "topic" field. Use this shape:
[
    {
        "case_number": "10000",
        "year": "2024",
        "policy_area": "Merger",
        "link": "https://www.example.com/decision.pdf",
        "topic": "Smartphones",
        "text": "market definition text goes here"
    }
]
A case may have several market definitions; emit one record for each.
Market definitions usually span several paragraphs and are often the closing part of the discussion of a product. Quote them directly, never paraphrase or summarise.
Drop footnote markers, paragraph numbers such as (21) and list markers such as A. or IV that are not part of the definition text.
Statements that the exact market definition was left open still count as market definitions.
Where a word has been split by stray spaces, such as "exa mple", rejoin it; leave correctly spelled neighbouring words apart.
A market definition is at least 4 and at most 12 sentences long.
Now extract all of the individual relevant market definitions from the following text:
"#;

pub fn run(args: DefinitionsArgs) -> Result<()> {
    ensure_directory(&args.indir)?;

    let inputs = collect_inputs(
        &args.indir,
        BatchFileKind::Section,
        &[SizeClass::Small, SizeClass::Large],
    )?;
    if inputs.is_empty() {
        info!(indir = %args.indir.display(), "no section files found");
        return Ok(());
    }

    let config = Config::from_env().with_model(args.model);
    let capability = ChatCompletionsClient::new(&config);
    info!(files = inputs.len(), model = %capability.model_name(), "splitting sections into records");

    let report = transform_inputs(
        &inputs,
        &args.outdir,
        BatchFileKind::Definitions,
        DEFINITIONS_PROMPT,
        &capability,
    )?;
    info!(written = report.written.len(), failed = report.failed.len(), "record splitting finished");

    finish_stage(
        &args.outdir,
        ManifestKind::Definitions,
        capability.model_name(),
        report,
        inputs.len(),
    )
}
