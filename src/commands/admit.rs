use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::AdmitArgs;
use crate::config::{Config, PipelineLayout};
use crate::header::{
    parse_link_blocks, render_batch_file, render_excluded_block, render_included_block,
};
use crate::model::{
    BatchFileKind, BatchId, BatchManifest, BatchManifestEntry, BucketedDocument, CaseLink,
    ExclusionRecord, FetchedDocument, MANIFEST_FILE_NAME, MANIFEST_VERSION, ManifestKind,
    PolicyArea, SizeClass,
};
use crate::pdf::{PdfTextExtractor, PdftotextExtractor};
use crate::util::{ensure_directory, now_utc_string, sha256_hex, utc_compact_string, write_json_pretty};

pub const INCLUDED_FILE_NAME: &str = "included_cases.txt";
pub const EXCLUDED_FILE_NAME: &str = "excluded_cases.txt";

/// Only documents with exactly this many pages are screened for boilerplate.
pub const EXCLUSION_PAGE_COUNT: usize = 3;

/// Phrases of pro-forma non-opposition decisions, matched case-insensitively.
pub const EXCLUSION_PHRASES: [&str; 5] = [
    "For the reasons set out in the Notice on a simplified",
    "European Commission has decided not to oppose the notified operation",
    "declare it compatible with the internal market",
    "This decision is adopted in application of Article 6(1)(b)",
    "Merger Regulation and Article 57 of the EEA Agreement",
];

pub const EXCLUDED_BY_CRITERIA: &str = "Excluded by criteria";

pub fn matches_exclusion_criteria(page_count: usize, full_text: &str) -> bool {
    if page_count != EXCLUSION_PAGE_COUNT {
        return false;
    }

    let lowered = full_text.to_lowercase();
    EXCLUSION_PHRASES
        .iter()
        .any(|phrase| lowered.contains(&phrase.to_lowercase()))
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait DocumentFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl DocumentFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?
            .to_vec();
        Ok(FetchResponse { status, body })
    }
}

#[derive(Debug)]
pub enum Admission {
    Admitted(FetchedDocument),
    Excluded(ExclusionRecord),
}

/// Fetches one decision and applies the admission policy. Never fails: every
/// problem becomes an exclusion reason for this document alone.
pub fn admit(
    link: &CaseLink,
    fetcher: &dyn DocumentFetcher,
    extractor: &dyn PdfTextExtractor,
) -> Admission {
    let reason = match fetch_document(link, fetcher, extractor) {
        Ok(Ok(document)) => {
            if !matches_exclusion_criteria(document.page_count, &document.full_text) {
                return Admission::Admitted(document);
            }
            EXCLUDED_BY_CRITERIA.to_string()
        }
        Ok(Err(status)) => format!("HTTP {status}"),
        Err(err) => format!("Error: {err:#}"),
    };

    Admission::Excluded(ExclusionRecord {
        link: link.clone(),
        reason,
    })
}

/// Inner `Err` carries a non-200 HTTP status.
fn fetch_document(
    link: &CaseLink,
    fetcher: &dyn DocumentFetcher,
    extractor: &dyn PdfTextExtractor,
) -> Result<Result<FetchedDocument, u16>> {
    let response = fetcher.fetch(&link.url)?;
    if response.status != 200 {
        return Ok(Err(response.status));
    }

    let pdf = extractor
        .extract(&response.body)
        .with_context(|| format!("failed to extract text from {}", link.url))?;

    Ok(Ok(FetchedDocument {
        link: link.clone(),
        full_text: pdf.full_text(),
        page_count: pdf.page_count(),
    }))
}

/// Sequence counters scoped to `(size class, policy area)`, owned by one admission run.
#[derive(Debug, Default)]
pub struct BucketCounters {
    counters: HashMap<(SizeClass, PolicyArea), usize>,
}

impl BucketCounters {
    pub fn assign(&mut self, document: FetchedDocument) -> BucketedDocument {
        let size_class = SizeClass::classify(&document.full_text);
        let counter = self
            .counters
            .entry((size_class, document.link.policy_area))
            .or_insert(0);
        *counter += 1;

        BucketedDocument {
            batch: BatchId {
                size_class,
                sequence: *counter,
            },
            link: document.link,
            full_text: document.full_text,
        }
    }

    pub fn total(&self, size_class: SizeClass) -> usize {
        self.counters
            .iter()
            .filter(|((size, _), _)| *size == size_class)
            .map(|(_, count)| count)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmissionSummary {
    pub small: usize,
    pub large: usize,
}

impl AdmissionSummary {
    pub fn total(&self) -> usize {
        self.small + self.large
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("Documents <80k chars : {}", self.small),
            format!("Documents >80k chars : {}", self.large),
            format!("Total documents      : {}", self.total()),
        ]
    }
}

/// Writes batch files and remembers what each name holds, so a file name
/// reused within a run is reported.
struct BatchWriter {
    batch_dir: PathBuf,
    owners: HashMap<String, String>,
    entries: Vec<BatchManifestEntry>,
}

impl BatchWriter {
    fn new(batch_dir: &Path) -> Self {
        Self {
            batch_dir: batch_dir.to_path_buf(),
            owners: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn write(&mut self, document: &BucketedDocument) -> Result<()> {
        let file_name = document.batch.file_name(BatchFileKind::Batch);
        if let Some(previous) = self.owners.get(&file_name) {
            warn!(
                file = %file_name,
                previous_case = %previous,
                case = %document.link.case_id,
                "batch file name reused across policy areas; earlier contents are overwritten"
            );
        }

        let body = render_batch_file(&document.link, &document.full_text);
        let path = self.batch_dir.join(&file_name);
        fs::write(&path, &body).with_context(|| format!("failed to write {}", path.display()))?;

        self.owners
            .insert(file_name.clone(), document.link.case_id.clone());
        self.entries.push(BatchManifestEntry {
            file_name: file_name.clone(),
            batch: document.batch,
            size_label: document.batch.size_class.label().to_string(),
            policy_area: document.link.policy_area,
            case_id: document.link.case_id.clone(),
            year: document.link.year.clone(),
            url: document.link.url.clone(),
            text_chars: document.full_text.chars().count(),
            text_sha256: sha256_hex(body.as_bytes()),
        });

        info!(file = %file_name, "wrote batch");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AdmissionOutput {
    pub included: Vec<CaseLink>,
    pub excluded: Vec<ExclusionRecord>,
    pub manifest_entries: Vec<BatchManifestEntry>,
    pub summary: AdmissionSummary,
}

/// Admits every link in order, writing each bucketed document to `batch_dir`
/// as soon as it is numbered.
pub fn admit_all(
    links: &[CaseLink],
    fetcher: &dyn DocumentFetcher,
    extractor: &dyn PdfTextExtractor,
    batch_dir: &Path,
) -> Result<AdmissionOutput> {
    ensure_directory(batch_dir)?;

    let mut counters = BucketCounters::default();
    let mut writer = BatchWriter::new(batch_dir);
    let mut output = AdmissionOutput::default();

    for link in links {
        info!(
            case = %link.case_id,
            area = %link.policy_area,
            url = %link.url,
            "fetching decision"
        );

        match admit(link, fetcher, extractor) {
            Admission::Admitted(document) => {
                info!(
                    case = %link.case_id,
                    chars = document.full_text.chars().count(),
                    "included"
                );
                let bucketed = counters.assign(document);
                if let Err(err) = writer.write(&bucketed) {
                    warn!(case = %link.case_id, error = %format!("{err:#}"), "failed to write batch file");
                }
                output.included.push(bucketed.link);
            }
            Admission::Excluded(record) => {
                warn!(case = %link.case_id, reason = %record.reason, "excluded");
                output.excluded.push(record);
            }
        }
    }

    output.summary = AdmissionSummary {
        small: counters.total(SizeClass::Small),
        large: counters.total(SizeClass::Large),
    };
    output.manifest_entries = writer.entries;

    Ok(output)
}

/// Rewrites the included/excluded audit files. Failures are logged only.
pub fn write_audit_logs(data_dir: &Path, output: &AdmissionOutput) {
    let included_path = data_dir.join(INCLUDED_FILE_NAME);
    let included: String = output.included.iter().map(render_included_block).collect();
    match fs::write(&included_path, included) {
        Ok(()) => info!(
            count = output.included.len(),
            path = %included_path.display(),
            "wrote included cases"
        ),
        Err(err) => warn!(path = %included_path.display(), error = %err, "failed to write included cases"),
    }

    let excluded_path = data_dir.join(EXCLUDED_FILE_NAME);
    let excluded: String = output.excluded.iter().map(render_excluded_block).collect();
    match fs::write(&excluded_path, excluded) {
        Ok(()) => info!(
            count = output.excluded.len(),
            path = %excluded_path.display(),
            "wrote excluded cases"
        ),
        Err(err) => warn!(path = %excluded_path.display(), error = %err, "failed to write excluded cases"),
    }
}

pub fn run(args: AdmitArgs) -> Result<()> {
    let started_ts = Utc::now();
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let links = parse_link_blocks(&raw)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    info!(links = links.len(), path = %args.input.display(), "loaded decision links");

    let config = Config::from_env();
    let fetcher = HttpFetcher::new(&config)?;
    let extractor = PdftotextExtractor;
    let batch_dir = PipelineLayout::batches_dir_for(&args.datadir);

    let output = admit_all(&links, &fetcher, &extractor, &batch_dir)?;
    write_audit_logs(&args.datadir, &output);

    let manifest = BatchManifest {
        manifest_version: MANIFEST_VERSION,
        kind: ManifestKind::Batches,
        run_id: format!("run-{}", utc_compact_string(started_ts)),
        generated_at: now_utc_string(),
        entries: output.manifest_entries.clone(),
    };
    let manifest_path = batch_dir.join(MANIFEST_FILE_NAME);
    if let Err(err) = write_json_pretty(&manifest_path, &manifest) {
        warn!(path = %manifest_path.display(), error = %format!("{err:#}"), "failed to write batch manifest");
    }

    println!();
    for line in output.summary.lines() {
        println!("{line}");
    }

    Ok(())
}
