//! Shared plumbing for the two stages that hand one file at a time to the
//! external text capability and store its raw reply.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::capability::TextCapability;
use crate::model::{
    BatchFileKind, BatchId, BatchManifest, BatchNamePattern, MANIFEST_FILE_NAME,
    MANIFEST_VERSION, ManifestKind, SizeClass, StageManifest, StageManifestEntry,
};
use crate::util::{ensure_directory, list_file_names, now_utc_string, read_json_optional, write_json_pretty};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    pub batch: BatchId,
    pub file_name: String,
    pub path: PathBuf,
}

/// Lists the files of `kind` in `dir` restricted to `sizes`. The directory is
/// always scanned in full by file name; the sidecar manifest left by the
/// producing stage, when current, supplies the identity of the files it names
/// and adds present files whose names do not follow the batch scheme.
pub fn collect_inputs(
    dir: &Path,
    kind: BatchFileKind,
    sizes: &[SizeClass],
) -> Result<Vec<StageInput>> {
    let mut candidates = discover_by_name(dir, kind)?;

    let recorded: Vec<(BatchId, String)> = manifest_identities(dir, kind)
        .into_iter()
        .filter(|(_, file_name)| {
            let present = dir.join(file_name).is_file();
            if !present {
                warn!(file = %file_name, dir = %dir.display(), "manifest entry has no file; skipping");
            }
            present
        })
        .collect();

    // Later candidates win in `order_inputs`, so manifest identities override parsed ones.
    candidates.extend(recorded);

    Ok(order_inputs(dir, candidates, sizes))
}

fn manifest_kind_for(kind: BatchFileKind) -> ManifestKind {
    match kind {
        BatchFileKind::Batch => ManifestKind::Batches,
        BatchFileKind::Section => ManifestKind::Sections,
        BatchFileKind::Definitions => ManifestKind::Definitions,
    }
}

/// `(BatchId, file name)` pairs from the current sidecar manifest in `dir`, if any.
fn manifest_identities(dir: &Path, kind: BatchFileKind) -> Vec<(BatchId, String)> {
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    let expected = manifest_kind_for(kind);

    match kind {
        BatchFileKind::Batch => load_manifest::<BatchManifest>(&manifest_path)
            .filter(|manifest| manifest_is_current(manifest.manifest_version, manifest.kind, expected))
            .map(|manifest| {
                manifest
                    .entries
                    .into_iter()
                    .map(|entry| (entry.batch, entry.file_name))
                    .collect()
            })
            .unwrap_or_default(),
        BatchFileKind::Section | BatchFileKind::Definitions => {
            load_stage_entries(&manifest_path, expected)
                .into_iter()
                .map(|entry| (entry.batch, entry.output_file))
                .collect()
        }
    }
}

fn load_stage_entries(path: &Path, expected: ManifestKind) -> Vec<StageManifestEntry> {
    load_manifest::<StageManifest>(path)
        .filter(|manifest| manifest_is_current(manifest.manifest_version, manifest.kind, expected))
        .map(|manifest| manifest.entries)
        .unwrap_or_default()
}

fn load_manifest<T: DeserializeOwned>(path: &Path) -> Option<T> {
    match read_json_optional(path) {
        Ok(manifest) => manifest,
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "ignoring unreadable manifest");
            None
        }
    }
}

fn manifest_is_current(version: u32, kind: ManifestKind, expected: ManifestKind) -> bool {
    if version != MANIFEST_VERSION || kind != expected {
        warn!(
            version,
            kind = ?kind,
            expected = ?expected,
            "manifest does not match this stage; ignoring it"
        );
        return false;
    }
    true
}

/// Files whose names do not follow the batch scheme are skipped silently.
fn discover_by_name(dir: &Path, kind: BatchFileKind) -> Result<Vec<(BatchId, String)>> {
    let pattern = BatchNamePattern::new(kind)?;
    Ok(list_file_names(dir)?
        .into_iter()
        .filter_map(|name| pattern.parse(&name).map(|batch| (batch, name)))
        .collect())
}

/// Size classes in the requested order, then file names lexicographically.
fn order_inputs(dir: &Path, candidates: Vec<(BatchId, String)>, sizes: &[SizeClass]) -> Vec<StageInput> {
    let mut seen = HashSet::new();
    let mut unique: Vec<(BatchId, String)> = candidates
        .into_iter()
        .rev()
        .filter(|(_, name)| seen.insert(name.clone()))
        .collect();
    unique.sort_by(|a, b| a.1.cmp(&b.1));

    sizes
        .iter()
        .flat_map(|size| {
            unique
                .iter()
                .filter(move |(batch, _)| batch.size_class == *size)
        })
        .map(|(batch, name)| StageInput {
            batch: *batch,
            file_name: name.clone(),
            path: dir.join(name),
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct AdapterReport {
    pub written: Vec<StageManifestEntry>,
    pub failed: Vec<String>,
}

/// Sends each input with `prompt` to the capability and writes the raw reply
/// under the matching `output_kind` name. One failing file does not stop the rest.
pub fn transform_inputs(
    inputs: &[StageInput],
    outdir: &Path,
    output_kind: BatchFileKind,
    prompt: &str,
    capability: &dyn TextCapability,
) -> Result<AdapterReport> {
    ensure_directory(outdir)?;

    let mut report = AdapterReport::default();
    for input in inputs {
        let output_file = input.batch.file_name(output_kind);
        info!(input = %input.file_name, output = %output_file, "processing");

        match transform_one(input, &outdir.join(&output_file), prompt, capability) {
            Ok(()) => {
                info!(output = %output_file, "saved");
                report.written.push(StageManifestEntry {
                    batch: input.batch,
                    source_file: input.file_name.clone(),
                    output_file,
                });
            }
            Err(err) => {
                warn!(input = %input.file_name, error = %format!("{err:#}"), "failed to process file");
                report.failed.push(input.file_name.clone());
            }
        }
    }

    Ok(report)
}

fn transform_one(
    input: &StageInput,
    output_path: &Path,
    prompt: &str,
    capability: &dyn TextCapability,
) -> Result<()> {
    let document = fs::read_to_string(&input.path)
        .with_context(|| format!("failed to read {}", input.path.display()))?;
    let reply = capability.extract(prompt, &document)?;
    fs::write(output_path, reply)
        .with_context(|| format!("failed to write {}", output_path.display()))
}

/// Folds this run's outputs into the stage manifest and turns any per-file
/// failure into a stage failure. Entries of earlier runs are kept unless this
/// run rewrote the same file.
pub fn finish_stage(
    outdir: &Path,
    kind: ManifestKind,
    model: &str,
    report: AdapterReport,
    attempted: usize,
) -> Result<()> {
    let manifest_path = outdir.join(MANIFEST_FILE_NAME);
    let written: HashSet<&str> = report
        .written
        .iter()
        .map(|entry| entry.output_file.as_str())
        .collect();
    let mut entries: Vec<StageManifestEntry> = load_stage_entries(&manifest_path, kind)
        .into_iter()
        .filter(|entry| !written.contains(entry.output_file.as_str()))
        .collect();
    entries.extend(report.written.iter().cloned());

    let manifest = StageManifest {
        manifest_version: MANIFEST_VERSION,
        kind,
        generated_at: now_utc_string(),
        model: model.to_string(),
        entries,
    };
    if let Err(err) = write_json_pretty(&manifest_path, &manifest) {
        warn!(path = %manifest_path.display(), error = %format!("{err:#}"), "failed to write stage manifest");
    }

    if !report.failed.is_empty() {
        bail!(
            "{} of {} files failed: {}",
            report.failed.len(),
            attempted,
            report.failed.join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::capability::CapabilityError;

    struct EchoCapability {
        prompts: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl EchoCapability {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                prompts: RefCell::new(Vec::new()),
                fail_on,
            }
        }
    }

    impl TextCapability for EchoCapability {
        fn extract(&self, prompt: &str, document: &str) -> Result<String, CapabilityError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            if self.fail_on.is_some_and(|marker| document.contains(marker)) {
                return Err(CapabilityError::EmptyResponse {
                    model: "echo".to_string(),
                });
            }
            Ok(format!("reply:{document}"))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn small(sequence: usize) -> BatchId {
        BatchId {
            size_class: SizeClass::Small,
            sequence,
        }
    }

    fn large(sequence: usize) -> BatchId {
        BatchId {
            size_class: SizeClass::Large,
            sequence,
        }
    }

    #[test]
    fn file_name_fallback_orders_by_size_then_name_and_skips_strangers() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "pdf_texts_80_batch_1.txt",
            "pdf_texts_79_batch_2.txt",
            "pdf_texts_79_batch_10.txt",
            "pdf_texts_79_batch_1.txt",
            "notes.txt",
            "pdf_texts_81_batch_1.txt",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        let both = collect_inputs(
            dir.path(),
            BatchFileKind::Batch,
            &[SizeClass::Small, SizeClass::Large],
        )
        .unwrap();
        let names: Vec<_> = both.iter().map(|input| input.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "pdf_texts_79_batch_1.txt",
                "pdf_texts_79_batch_10.txt",
                "pdf_texts_79_batch_2.txt",
                "pdf_texts_80_batch_1.txt",
            ]
        );
        assert_eq!(both[1].batch, small(10));

        let large_only = collect_inputs(dir.path(), BatchFileKind::Batch, &[SizeClass::Large]).unwrap();
        assert_eq!(large_only.len(), 1);
        assert_eq!(large_only[0].batch, large(1));
    }

    #[test]
    fn stage_manifest_adds_identities_to_the_full_scan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("extract-sections_79_batch_1.txt"), "a").unwrap();
        fs::write(dir.path().join("custom-name.txt"), "b").unwrap();

        let manifest = StageManifest {
            manifest_version: MANIFEST_VERSION,
            kind: ManifestKind::Sections,
            generated_at: now_utc_string(),
            model: "echo".to_string(),
            entries: vec![
                StageManifestEntry {
                    batch: large(4),
                    source_file: "pdf_texts_80_batch_4.txt".to_string(),
                    output_file: "custom-name.txt".to_string(),
                },
                StageManifestEntry {
                    batch: small(9),
                    source_file: "pdf_texts_79_batch_9.txt".to_string(),
                    output_file: "gone.txt".to_string(),
                },
            ],
        };
        write_json_pretty(&dir.path().join(MANIFEST_FILE_NAME), &manifest).unwrap();

        let inputs = collect_inputs(
            dir.path(),
            BatchFileKind::Section,
            &[SizeClass::Small, SizeClass::Large],
        )
        .unwrap();
        let names: Vec<_> = inputs.iter().map(|input| input.file_name.as_str()).collect();
        assert_eq!(names, vec!["extract-sections_79_batch_1.txt", "custom-name.txt"]);
        assert_eq!(inputs[0].batch, small(1));
        assert_eq!(inputs[1].batch, large(4));
    }

    #[test]
    fn manifest_identity_wins_over_the_parsed_file_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("extract-sections_79_batch_1.txt"), "a").unwrap();
        let manifest = StageManifest {
            manifest_version: MANIFEST_VERSION,
            kind: ManifestKind::Sections,
            generated_at: now_utc_string(),
            model: "echo".to_string(),
            entries: vec![StageManifestEntry {
                batch: large(1),
                source_file: "pdf_texts_80_batch_1.txt".to_string(),
                output_file: "extract-sections_79_batch_1.txt".to_string(),
            }],
        };
        write_json_pretty(&dir.path().join(MANIFEST_FILE_NAME), &manifest).unwrap();

        let inputs = collect_inputs(
            dir.path(),
            BatchFileKind::Section,
            &[SizeClass::Small, SizeClass::Large],
        )
        .unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].batch, large(1));
    }

    #[test]
    fn sections_run_per_size_are_all_visible_to_the_next_stage() {
        let dir = tempfile::tempdir().unwrap();
        let batches = dir.path().join("batches");
        let sections = dir.path().join("sections");
        fs::create_dir(&batches).unwrap();
        fs::write(batches.join("pdf_texts_79_batch_1.txt"), "small").unwrap();
        fs::write(batches.join("pdf_texts_80_batch_1.txt"), "large").unwrap();
        let capability = EchoCapability::new(None);

        for size in [SizeClass::Small, SizeClass::Large] {
            let inputs = collect_inputs(&batches, BatchFileKind::Batch, &[size]).unwrap();
            assert_eq!(inputs.len(), 1);
            let report =
                transform_inputs(&inputs, &sections, BatchFileKind::Section, "PROMPT", &capability)
                    .unwrap();
            finish_stage(&sections, ManifestKind::Sections, "echo", report, inputs.len()).unwrap();
        }

        let inputs = collect_inputs(
            &sections,
            BatchFileKind::Section,
            &[SizeClass::Small, SizeClass::Large],
        )
        .unwrap();
        let names: Vec<_> = inputs.iter().map(|input| input.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["extract-sections_79_batch_1.txt", "extract-sections_80_batch_1.txt"]
        );

        let manifest: StageManifest =
            read_json_optional(&sections.join(MANIFEST_FILE_NAME)).unwrap().unwrap();
        let recorded: Vec<_> = manifest.entries.iter().map(|e| e.output_file.as_str()).collect();
        assert_eq!(
            recorded,
            vec!["extract-sections_79_batch_1.txt", "extract-sections_80_batch_1.txt"]
        );
    }

    #[test]
    fn files_left_by_a_partly_failed_run_are_still_collected() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("out");
        fs::create_dir(&outdir).unwrap();
        fs::write(outdir.join("extract-sections_79_batch_1.txt"), "earlier run").unwrap();
        let manifest = StageManifest {
            manifest_version: MANIFEST_VERSION,
            kind: ManifestKind::Sections,
            generated_at: now_utc_string(),
            model: "echo".to_string(),
            entries: vec![],
        };
        write_json_pretty(&outdir.join(MANIFEST_FILE_NAME), &manifest).unwrap();

        let inputs = collect_inputs(&outdir, BatchFileKind::Section, &[SizeClass::Small]).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].batch, small(1));
    }

    #[test]
    fn manifest_of_another_stage_falls_back_to_file_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("extract-sections_80_batch_3.txt"), "a").unwrap();
        let manifest = StageManifest {
            manifest_version: MANIFEST_VERSION,
            kind: ManifestKind::Definitions,
            generated_at: now_utc_string(),
            model: "echo".to_string(),
            entries: vec![],
        };
        write_json_pretty(&dir.path().join(MANIFEST_FILE_NAME), &manifest).unwrap();

        let inputs = collect_inputs(dir.path(), BatchFileKind::Section, &[SizeClass::Large]).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].batch, large(3));
    }

    #[test]
    fn corrupt_manifest_falls_back_to_file_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pdf_texts_79_batch_5.txt"), "a").unwrap();
        fs::write(dir.path().join(MANIFEST_FILE_NAME), "{ not json").unwrap();

        let inputs = collect_inputs(dir.path(), BatchFileKind::Batch, &[SizeClass::Small]).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].batch, small(5));
    }

    #[test]
    fn duplicate_manifest_entries_for_one_file_are_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pdf_texts_79_batch_1.txt"), "a").unwrap();
        let entry = |case: &str| crate::model::BatchManifestEntry {
            file_name: "pdf_texts_79_batch_1.txt".to_string(),
            batch: small(1),
            size_label: "79".to_string(),
            policy_area: crate::model::PolicyArea::Merger,
            case_id: case.to_string(),
            year: "2020".to_string(),
            url: "u".to_string(),
            text_chars: 1,
            text_sha256: String::new(),
        };
        let manifest = BatchManifest {
            manifest_version: MANIFEST_VERSION,
            kind: ManifestKind::Batches,
            run_id: "run-test".to_string(),
            generated_at: now_utc_string(),
            entries: vec![entry("M.1"), entry("SA.1")],
        };
        write_json_pretty(&dir.path().join(MANIFEST_FILE_NAME), &manifest).unwrap();

        let inputs = collect_inputs(dir.path(), BatchFileKind::Batch, &[SizeClass::Small]).unwrap();
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn transform_continues_past_failures_and_finish_reports_them() {
        let dir = tempfile::tempdir().unwrap();
        let indir = dir.path().join("in");
        let outdir = dir.path().join("out");
        fs::create_dir(&indir).unwrap();
        fs::write(indir.join("pdf_texts_79_batch_1.txt"), "first").unwrap();
        fs::write(indir.join("pdf_texts_79_batch_2.txt"), "BROKEN").unwrap();
        fs::write(indir.join("pdf_texts_80_batch_1.txt"), "third").unwrap();

        let inputs = collect_inputs(&indir, BatchFileKind::Batch, &[SizeClass::Small, SizeClass::Large]).unwrap();
        let capability = EchoCapability::new(Some("BROKEN"));
        let report = transform_inputs(&inputs, &outdir, BatchFileKind::Section, "PROMPT", &capability).unwrap();

        assert_eq!(capability.prompts.borrow().len(), 3);
        assert!(capability.prompts.borrow().iter().all(|p| p == "PROMPT"));
        assert_eq!(report.failed, vec!["pdf_texts_79_batch_2.txt"]);
        assert_eq!(
            fs::read_to_string(outdir.join("extract-sections_79_batch_1.txt")).unwrap(),
            "reply:first"
        );
        assert!(outdir.join("extract-sections_80_batch_1.txt").exists());
        assert!(!outdir.join("extract-sections_79_batch_2.txt").exists());

        let err = finish_stage(&outdir, ManifestKind::Sections, "echo", report, inputs.len()).unwrap_err();
        assert!(err.to_string().contains("1 of 3 files failed"));

        let manifest: StageManifest = read_json_optional(&outdir.join(MANIFEST_FILE_NAME)).unwrap().unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[1].source_file, "pdf_texts_80_batch_1.txt");
    }
}
