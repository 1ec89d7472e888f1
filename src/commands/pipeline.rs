//! Best-effort driver that runs every stage in order as a child process of
//! this binary. No stage outcome stops the run; the summary is always printed.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::SizeSelection;
use crate::config::PipelineLayout;
use crate::model::{
    BatchFileKind, BatchNamePattern, MANIFEST_VERSION, PipelineRunManifest, PipelineStageRecord,
    ReconciliationCounts, SizeClass,
};
use crate::util::{list_file_names, now_utc_string, utc_compact_string, write_json_pretty};

/// Batch size classes the section stage processes during a pipeline run.
pub const CHUNK_SIZES: SizeSelection = SizeSelection::Both;

pub const BINARY_NAME: &str = "lextract";

#[derive(Debug, Clone)]
pub struct Stage {
    /// Subcommand of this binary that implements the stage.
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<String>,
    pub required_inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped { missing: Vec<String> },
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("file or script not found ({name})")]
    NotFound { name: String },
    #[error("exit {code}")]
    Failed { code: i32 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait StageRunner {
    fn run(&self, stage: &Stage) -> Result<(), StageError>;
}

/// Runs stages as `<program> <stage> <args...>` from `root`.
pub struct ProcessRunner {
    program: PathBuf,
    root: PathBuf,
}

impl ProcessRunner {
    pub fn new(program: PathBuf, root: &Path) -> Self {
        Self {
            program,
            root: root.to_path_buf(),
        }
    }

    /// Uses the running executable, or the binary name on `PATH` if it cannot be located.
    pub fn current(root: &Path) -> Self {
        let program = env::current_exe().unwrap_or_else(|err| {
            warn!(error = %err, "cannot locate current executable; using {BINARY_NAME} from PATH");
            PathBuf::from(BINARY_NAME)
        });
        Self::new(program, root)
    }
}

impl StageRunner for ProcessRunner {
    fn run(&self, stage: &Stage) -> Result<(), StageError> {
        let status = Command::new(&self.program)
            .arg(stage.name)
            .args(&stage.args)
            .current_dir(&self.root)
            .status()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => StageError::NotFound {
                    name: self.program.display().to_string(),
                },
                _ => StageError::Other(anyhow::Error::new(err).context(format!(
                    "failed to start {} {}",
                    self.program.display(),
                    stage.name
                ))),
            })?;

        if status.success() {
            Ok(())
        } else {
            // Killed by a signal: no exit code.
            Err(StageError::Failed {
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

#[derive(Debug)]
pub struct StageReport {
    pub name: &'static str,
    pub description: &'static str,
    pub result: Result<StageOutcome, StageError>,
}

impl StageReport {
    /// The user-facing warning for this outcome; `None` when the stage completed.
    pub fn warning(&self) -> Option<String> {
        let description = self.description;
        match &self.result {
            Ok(StageOutcome::Completed) => None,
            Ok(StageOutcome::Skipped { missing }) => Some(format!(
                "Warning: missing {}; skipping {description}.",
                missing.join(", ")
            )),
            Err(StageError::NotFound { name }) => Some(format!(
                "Warning: file or script not found ({name}); skipping {description}."
            )),
            Err(StageError::Failed { code }) => Some(format!(
                "Warning: step {description} failed (exit {code}); continuing."
            )),
            Err(StageError::Other(err)) => Some(format!(
                "Warning: step {description} failed ({err:#}); continuing."
            )),
        }
    }

    pub fn status(&self) -> &'static str {
        match &self.result {
            Ok(StageOutcome::Completed) => "completed",
            Ok(StageOutcome::Skipped { .. }) => "skipped",
            Err(StageError::NotFound { .. }) => "not_found",
            Err(StageError::Failed { .. }) => "failed",
            Err(StageError::Other(_)) => "error",
        }
    }

    fn record(&self) -> PipelineStageRecord {
        let (missing_inputs, exit_code, error) = match &self.result {
            Ok(StageOutcome::Skipped { missing }) => (missing.clone(), None, None),
            Ok(StageOutcome::Completed) => (Vec::new(), Some(0), None),
            Err(StageError::Failed { code }) => (Vec::new(), Some(*code), None),
            Err(err) => (Vec::new(), None, Some(format!("{err:#}"))),
        };

        PipelineStageRecord {
            name: self.name.to_string(),
            description: self.description.to_string(),
            status: self.status().to_string(),
            missing_inputs,
            exit_code,
            error,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn status_lines(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|stage| format!("  {:<10} {}", stage.name, stage.status()))
            .collect()
    }
}

/// Checks the stage's inputs relative to `root` and runs it only when all exist.
pub fn run_stage(stage: &Stage, root: &Path, runner: &dyn StageRunner) -> StageReport {
    let missing: Vec<String> = stage
        .required_inputs
        .iter()
        .filter(|path| !root.join(path).exists())
        .map(|path| path.display().to_string())
        .collect();

    let result = if missing.is_empty() {
        println!("Running: {BINARY_NAME} {} {}", stage.name, stage.args.join(" "));
        info!(stage = stage.name, "running stage");
        runner.run(stage).map(|()| StageOutcome::Completed)
    } else {
        Ok(StageOutcome::Skipped { missing })
    };

    StageReport {
        name: stage.name,
        description: stage.description,
        result,
    }
}

pub fn execute(stages: &[Stage], root: &Path, runner: &dyn StageRunner) -> RunReport {
    let mut report = RunReport::default();
    for stage in stages {
        let stage_report = run_stage(stage, root, runner);
        if let Some(warning) = stage_report.warning() {
            println!("{warning}");
            warn!(stage = stage.name, status = stage_report.status(), "{warning}");
        }
        report.stages.push(stage_report);
    }
    report
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

pub fn default_stages(layout: &PipelineLayout) -> Vec<Stage> {
    vec![
        Stage {
            name: "links",
            description: "link resolution",
            args: vec![
                "-i".to_string(),
                path_arg(&layout.cases_workbook),
                "-o".to_string(),
                path_arg(&layout.links_file),
            ],
            required_inputs: vec![layout.cases_workbook.clone()],
        },
        Stage {
            name: "admit",
            description: "document admission",
            args: vec![
                "-i".to_string(),
                path_arg(&layout.links_file),
                "--datadir".to_string(),
                path_arg(&layout.data_dir),
            ],
            required_inputs: vec![layout.links_file.clone(), layout.data_dir.clone()],
        },
        Stage {
            name: "sections",
            description: "section isolation",
            args: vec![
                "--indir".to_string(),
                path_arg(&layout.batches_dir),
                "--outdir".to_string(),
                path_arg(&layout.sections_dir),
                "--size".to_string(),
                CHUNK_SIZES.as_str().to_string(),
            ],
            required_inputs: vec![layout.batches_dir.clone()],
        },
        Stage {
            name: "definitions",
            description: "record splitting",
            args: vec![
                "--indir".to_string(),
                path_arg(&layout.sections_dir),
                "--outdir".to_string(),
                path_arg(&layout.records_dir),
            ],
            required_inputs: vec![layout.sections_dir.clone()],
        },
        Stage {
            name: "clean",
            description: "fence cleaning",
            args: vec!["--indir".to_string(), path_arg(&layout.records_dir)],
            required_inputs: vec![layout.records_dir.clone()],
        },
        Stage {
            name: "merge",
            description: "corpus merge",
            args: vec![
                "--indir".to_string(),
                path_arg(&layout.records_dir),
                "--output".to_string(),
                path_arg(&layout.merged_output),
            ],
            required_inputs: vec![layout.records_dir.clone()],
        },
    ]
}

impl ReconciliationCounts {
    /// Counts artifacts on disk under `root`; nothing from the run report is used.
    pub fn scan(root: &Path, layout: &PipelineLayout) -> Result<Self> {
        let batch_pattern = BatchNamePattern::new(BatchFileKind::Batch)?;
        let section_pattern = BatchNamePattern::new(BatchFileKind::Section)?;

        let batches: Vec<_> = list_file_names(&root.join(&layout.batches_dir))?
            .iter()
            .filter_map(|name| batch_pattern.parse(name))
            .collect();
        let section_files = list_file_names(&root.join(&layout.sections_dir))?
            .iter()
            .filter(|name| section_pattern.parse(name).is_some())
            .count();
        let json_files = list_file_names(&root.join(&layout.records_dir))?
            .iter()
            .filter(|name| name.ends_with(".json"))
            .count();

        Ok(Self {
            small_batches: batches
                .iter()
                .filter(|batch| batch.size_class == SizeClass::Small)
                .count(),
            large_batches: batches
                .iter()
                .filter(|batch| batch.size_class == SizeClass::Large)
                .count(),
            section_files,
            json_files,
            merged_files: usize::from(root.join(&layout.merged_output).is_file()),
        })
    }

    pub fn summary_lines(&self, layout: &PipelineLayout) -> Vec<String> {
        vec![
            format!(
                "- {} x 79 batches   → {}/",
                self.small_batches,
                layout.batches_dir.display()
            ),
            format!(
                "- {} x 80 batches   → {}/",
                self.large_batches,
                layout.batches_dir.display()
            ),
            format!(
                "- {} section files   → {}/",
                self.section_files,
                layout.sections_dir.display()
            ),
            format!(
                "- {} JSON files     → {}/",
                self.json_files,
                layout.records_dir.display()
            ),
            format!(
                "- {} merged file        → {}",
                self.merged_files,
                layout.merged_output.display()
            ),
        ]
    }
}

/// Zero counts rather than no summary when the directories cannot be read.
pub fn scan_or_default(root: &Path, layout: &PipelineLayout) -> ReconciliationCounts {
    ReconciliationCounts::scan(root, layout).unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "failed to count pipeline artifacts");
        ReconciliationCounts::default()
    })
}

/// Stage outcomes plus the artifact counts taken after the last stage.
#[derive(Debug)]
pub struct PipelineRun {
    pub report: RunReport,
    pub counts: ReconciliationCounts,
}

impl PipelineRun {
    /// Everything printed after the stages have run, blank leading line included.
    pub fn summary_lines(&self, layout: &PipelineLayout) -> Vec<String> {
        let mut lines = vec![String::new(), "Pipeline complete.".to_string()];
        lines.extend(self.report.status_lines());
        lines.extend(self.counts.summary_lines(layout));
        lines
    }
}

pub fn run_pipeline(root: &Path, layout: &PipelineLayout, runner: &dyn StageRunner) -> PipelineRun {
    let report = execute(&default_stages(layout), root, runner);
    let counts = scan_or_default(root, layout);
    PipelineRun { report, counts }
}

pub fn run() -> Result<()> {
    let started = Utc::now();
    let started_at = now_utc_string();
    let layout = PipelineLayout::default();
    let root = PathBuf::from(".");
    info!(chunk_sizes = CHUNK_SIZES.as_str(), "pipeline started");

    let runner = ProcessRunner::current(&root);
    let outcome = run_pipeline(&root, &layout, &runner);

    let run_id = format!("run-{}", utc_compact_string(started));
    let manifest = PipelineRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        started_at,
        finished_at: now_utc_string(),
        chunk_sizes: CHUNK_SIZES.as_str().to_string(),
        stages: outcome.report.stages.iter().map(StageReport::record).collect(),
        counts: outcome.counts,
    };
    let manifest_path = root
        .join(&layout.manifest_dir)
        .join(format!("pipeline_run_{}.json", utc_compact_string(started)));
    match write_json_pretty(&manifest_path, &manifest) {
        Ok(()) => info!(run_id = %run_id, path = %manifest_path.display(), "wrote pipeline run manifest"),
        Err(err) => warn!(path = %manifest_path.display(), error = %format!("{err:#}"), "failed to write pipeline run manifest"),
    }

    for line in outcome.summary_lines(&layout) {
        println!("{line}");
    }

    Ok(())
}
