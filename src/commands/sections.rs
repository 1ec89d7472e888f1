use anyhow::Result;
use tracing::{info, warn};

use crate::capability::{ChatCompletionsClient, TextCapability};
use crate::cli::SectionsArgs;
use crate::commands::adapter::{collect_inputs, finish_stage, transform_inputs};
use crate::config::Config;
use crate::model::{BatchFileKind, ManifestKind};

/// Instruction sent ahead of each batch file. The reply is stored verbatim.
pub const SECTION_PROMPT: &str = concat!(
    "For the text I will provide, find the first occurrence of the words market definition. ",
    "Starting one line before that occurrence, extract ONLY the market definition section. ",
    "The section ends where the next heading at the same level begins. Subheadings inside the ",
    "section are part of it, so do not stop at them. The closing heading usually continues the ",
    "numbering of the opening one: after \"A. Market Definition\" stop at \"B. ...\", after ",
    "\"IV. Market Definition\" stop at \"V. ...\". Do not include the closing heading itself. ",
    "The document starts with the lines \"Case Number:\", \"Year:\", \"Policy Area:\" and \"Link:\". ",
    "Keep those four lines exactly as given and place them at the top of your output. ",
    "Now extract only the market definition section, together with the case number, year, ",
    "policy area and link, from the following text:\n\n",
);

pub fn run(args: SectionsArgs) -> Result<()> {
    if !args.indir.is_dir() {
        warn!(indir = %args.indir.display(), "input directory not found; nothing to do");
        return Ok(());
    }

    let inputs = collect_inputs(&args.indir, BatchFileKind::Batch, &args.size.size_classes())?;
    if inputs.is_empty() {
        info!(
            size = args.size.as_str(),
            indir = %args.indir.display(),
            "no batch files matched"
        );
        return Ok(());
    }

    let config = Config::from_env().with_model(args.model);
    let capability = ChatCompletionsClient::new(&config);
    info!(files = inputs.len(), model = %capability.model_name(), "isolating market definition sections");

    let report = transform_inputs(
        &inputs,
        &args.outdir,
        BatchFileKind::Section,
        SECTION_PROMPT,
        &capability,
    )?;
    info!(written = report.written.len(), failed = report.failed.len(), "section isolation finished");

    finish_stage(
        &args.outdir,
        ManifestKind::Sections,
        capability.model_name(),
        report,
        inputs.len(),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cli::SizeSelection;
    use crate::model::{MANIFEST_FILE_NAME, StageManifest};
    use crate::util::read_json_optional;

    #[test]
    fn prompt_ends_with_separator_before_document() {
        assert!(SECTION_PROMPT.ends_with("text:\n\n"));
        assert!(SECTION_PROMPT.contains("Case Number:"));
    }

    #[test]
    fn missing_input_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = SectionsArgs {
            indir: dir.path().join("absent"),
            outdir: dir.path().join("out"),
            size: SizeSelection::Both,
            model: None,
        };
        run(args).unwrap();
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn no_matching_size_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let indir = dir.path().join("batches");
        fs::create_dir(&indir).unwrap();
        fs::write(indir.join("pdf_texts_79_batch_1.txt"), "text").unwrap();

        let args = SectionsArgs {
            indir,
            outdir: dir.path().join("out"),
            size: SizeSelection::Large,
            model: None,
        };
        run(args).unwrap();

        let manifest: Option<StageManifest> =
            read_json_optional(&dir.path().join("out").join(MANIFEST_FILE_NAME)).unwrap();
        assert!(manifest.is_none());
    }
}
