use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::ser::PrettyFormatter;
use tracing::{error, info, warn};

use crate::cli::MergeArgs;
use crate::model::TopicRecord;
use crate::util::list_file_names;

#[derive(Debug, Default)]
pub struct MergeReport {
    pub merged_files: Vec<String>,
    pub diagnostics: Vec<String>,
    pub records: usize,
}

#[derive(Debug)]
pub enum MergeOutcome {
    /// The input directory does not exist; nothing was written.
    MissingInput,
    Written(MergeReport),
    WriteFailed { report: MergeReport, error: String },
}

/// Concatenates the top-level arrays of every `.json` file in `indir`, in file
/// name order, into `output`. Problems with single files become diagnostics.
///
/// Compatibility break: non-ASCII text is written as raw UTF-8, not as the
/// `\uXXXX` escapes earlier Python-written corpora contain, so output bytes
/// differ from those files for the same records. The parsed JSON is the same.
pub fn merge_directory(indir: &Path, output: &Path) -> Result<MergeOutcome> {
    if !indir.exists() {
        let message = format!("Input folder {} does not exist.", indir.display());
        warn!(indir = %indir.display(), "{message}");
        return Ok(MergeOutcome::MissingInput);
    }

    let mut report = MergeReport::default();
    let mut combined: Vec<Value> = Vec::new();

    for name in list_file_names(indir)?
        .into_iter()
        .filter(|name| name.ends_with(".json"))
    {
        let path = indir.join(&name);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                report.skip(format!("Skipping {name}: read error - {err}"));
                continue;
            }
        };

        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Array(items)) => {
                let off_shape = count_non_records(&items);
                if off_shape > 0 {
                    warn!(file = %name, count = off_shape, "elements do not look like topic records; merged as-is");
                }
                report.records += items.len();
                combined.extend(items);
                report.merged_files.push(name);
            }
            Ok(_) => report.skip(format!("Skipping {name}: not a list of dictionaries")),
            Err(err) => report.skip(format!("Skipping {name}: JSONDecodeError - {err}")),
        }
    }

    match write_indented(output, &combined) {
        Ok(()) => {
            info!(
                path = %output.display(),
                files = report.merged_files.len(),
                records = report.records,
                "Combined JSON files saved"
            );
            Ok(MergeOutcome::Written(report))
        }
        Err(err) => {
            let error = format!("Failed to write to {}: {err:#}", output.display());
            error!("{error}");
            Ok(MergeOutcome::WriteFailed { report, error })
        }
    }
}

/// Elements that do not deserialize as a [`TopicRecord`]; they are merged anyway.
fn count_non_records(items: &[Value]) -> usize {
    items
        .iter()
        .filter(|item| TopicRecord::deserialize(*item).is_err())
        .count()
}

impl MergeReport {
    fn skip(&mut self, diagnostic: String) {
        warn!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }
}

/// Four-space indented JSON without a trailing newline.
fn write_indented(path: &Path, value: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let mut data = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut data, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
}

pub fn run(args: MergeArgs) -> Result<()> {
    match merge_directory(&args.indir, &args.output)? {
        MergeOutcome::MissingInput => {
            println!("Input folder {} does not exist.", args.indir.display());
        }
        MergeOutcome::Written(report) => {
            println!("Combined JSON files saved to {}", args.output.display());
            if !report.diagnostics.is_empty() {
                info!(skipped = report.diagnostics.len(), "some files were not merged");
            }
        }
        MergeOutcome::WriteFailed { report, error } => {
            println!("{error}");
            warn!(records = report.records, "merged records were not saved");
        }
    }

    Ok(())
}
