use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::commands::pipeline::scan_or_default;
use crate::config::PipelineLayout;
use crate::model::PipelineRunManifest;
use crate::util::{list_file_names, read_json_optional};

/// Distinct `case_number` values across the records of a merged corpus file.
pub fn unique_case_numbers(path: &Path) -> Result<BTreeSet<String>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let records: Vec<Value> =
        serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(records
        .iter()
        .filter_map(|record| record.get("case_number"))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}

/// Most recent `pipeline_run_*.json` in `manifest_dir`; names sort by start time.
pub fn latest_run_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_file_names(manifest_dir)?
        .into_iter()
        .rfind(|name| name.starts_with("pipeline_run_") && name.ends_with(".json"))
        .map(|name| manifest_dir.join(name)))
}

pub fn run() -> Result<()> {
    let layout = PipelineLayout::default();
    let root = Path::new(".");
    info!(root = %root.display(), "status requested");

    match latest_run_manifest(&root.join(&layout.manifest_dir))? {
        Some(path) => match read_json_optional::<PipelineRunManifest>(&path) {
            Ok(Some(manifest)) => {
                info!(
                    run_id = %manifest.run_id,
                    started_at = %manifest.started_at,
                    finished_at = %manifest.finished_at,
                    chunk_sizes = %manifest.chunk_sizes,
                    "loaded last pipeline run"
                );
                for stage in &manifest.stages {
                    info!(
                        stage = %stage.name,
                        status = %stage.status,
                        exit_code = ?stage.exit_code,
                        missing = %stage.missing_inputs.join(", "),
                        "last run stage"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => warn!(path = %path.display(), error = %format!("{err:#}"), "unreadable pipeline run manifest"),
        },
        None => warn!(dir = %layout.manifest_dir.display(), "no pipeline run manifest found"),
    }

    let counts = scan_or_default(root, &layout);
    for line in counts.summary_lines(&layout) {
        println!("{line}");
    }

    let merged = root.join(&layout.merged_output);
    if merged.is_file() {
        match unique_case_numbers(&merged) {
            Ok(cases) => println!("Found {} unique case numbers.", cases.len()),
            Err(err) => warn!(path = %merged.display(), error = %format!("{err:#}"), "failed to read merged corpus"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_case_numbers_ignores_records_without_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.json");
        fs::write(
            &path,
            r#"[
                {"case_number": "M.1", "topic": "a"},
                {"case_number": "M.1", "topic": "b"},
                {"case_number": "AT.2"},
                {"topic": "orphan"},
                {"case_number": 10000}
            ]"#,
        )
        .unwrap();

        let cases = unique_case_numbers(&path).unwrap();
        assert_eq!(cases.len(), 3);
        assert!(cases.contains("10000"));
    }

    #[test]
    fn latest_run_manifest_picks_newest_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "pipeline_run_20250101T000000Z.json",
            "pipeline_run_20250301T120000Z.json",
            "other.json",
        ] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }

        let latest = latest_run_manifest(dir.path()).unwrap().unwrap();
        assert!(latest.ends_with("pipeline_run_20250301T120000Z.json"));
        assert!(latest_run_manifest(&dir.path().join("absent")).unwrap().is_none());
    }
}
