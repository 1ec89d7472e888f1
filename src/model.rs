use std::fmt;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_FILE_NAME: &str = ".lextract_manifest.json";

/// Extracted text longer than this many characters lands in the large bucket.
pub const LARGE_DOCUMENT_THRESHOLD: usize = 80_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyArea {
    Merger,
    AntitrustCartels,
    StateAid,
    DigitalMarketsAct,
    ForeignSubsidies,
    Unknown,
}

impl PolicyArea {
    const ALL: [PolicyArea; 6] = [
        Self::Merger,
        Self::AntitrustCartels,
        Self::StateAid,
        Self::DigitalMarketsAct,
        Self::ForeignSubsidies,
        Self::Unknown,
    ];

    /// Classifies a decision URL by the competition-area segment in its path.
    pub fn from_url(url: &str) -> Self {
        if url.contains("/mergers/") {
            Self::Merger
        } else if url.contains("/antitrust/") {
            Self::AntitrustCartels
        } else if url.contains("/state_aid/") {
            Self::StateAid
        } else if url.contains("/digital_markets_act/") {
            Self::DigitalMarketsAct
        } else if url.contains("/foreign_subsidies/") {
            Self::ForeignSubsidies
        } else {
            Self::Unknown
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Merger => "Merger",
            Self::AntitrustCartels => "Antitrust & Cartels",
            Self::StateAid => "State Aid",
            Self::DigitalMarketsAct => "Digital Markets Act",
            Self::ForeignSubsidies => "Foreign Subsidies",
            Self::Unknown => "Unknown",
        }
    }

    /// Lowercase, underscore-joined key used to scope bucket counters.
    pub fn key(self) -> &'static str {
        match self {
            Self::Merger => "merger",
            Self::AntitrustCartels => "antitrust_&_cartels",
            Self::StateAid => "state_aid",
            Self::DigitalMarketsAct => "digital_markets_act",
            Self::ForeignSubsidies => "foreign_subsidies",
            Self::Unknown => "unknown",
        }
    }

    /// Form written into batch headers: the key with only its first letter capitalised.
    pub fn batch_label(self) -> &'static str {
        match self {
            Self::Merger => "Merger",
            Self::AntitrustCartels => "Antitrust_&_cartels",
            Self::StateAid => "State_aid",
            Self::DigitalMarketsAct => "Digital_markets_act",
            Self::ForeignSubsidies => "Foreign_subsidies",
            Self::Unknown => "Unknown",
        }
    }

    /// Accepts the display name, the key or the batch label, in any case.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace(' ', "_");
        Self::ALL
            .into_iter()
            .find(|area| area.key() == normalized)
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for PolicyArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Small,
    Large,
}

impl SizeClass {
    pub fn classify(text: &str) -> Self {
        if text.chars().count() > LARGE_DOCUMENT_THRESHOLD {
            Self::Large
        } else {
            Self::Small
        }
    }

    /// Label embedded in file names: `79` for small batches, `80` for large ones.
    pub fn label(self) -> &'static str {
        match self {
            Self::Small => "79",
            Self::Large => "80",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "79" => Some(Self::Small),
            "80" => Some(Self::Large),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseLink {
    pub case_id: String,
    pub year: String,
    pub policy_area: PolicyArea,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub link: CaseLink,
    pub full_text: String,
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRecord {
    pub link: CaseLink,
    pub reason: String,
}

/// Identity of one bucket slot: size class plus its per-category sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId {
    pub size_class: SizeClass,
    pub sequence: usize,
}

impl BatchId {
    pub fn file_name(self, kind: BatchFileKind) -> String {
        format!(
            "{}_{}_batch_{}.{}",
            kind.prefix(),
            self.size_class.label(),
            self.sequence,
            kind.extension()
        )
    }
}

#[derive(Debug, Clone)]
pub struct BucketedDocument {
    pub batch: BatchId,
    pub link: CaseLink,
    pub full_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFileKind {
    Batch,
    Section,
    Definitions,
}

impl BatchFileKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Batch => "pdf_texts",
            Self::Section => "extract-sections",
            Self::Definitions => "extract-definitions",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Batch | Self::Section => "txt",
            Self::Definitions => "json",
        }
    }
}

/// Recovers a [`BatchId`] from a legacy file name such as `pdf_texts_79_batch_3.txt`.
pub struct BatchNamePattern {
    regex: Regex,
}

impl BatchNamePattern {
    pub fn new(kind: BatchFileKind) -> Result<Self> {
        let pattern = format!(
            r"^{}_(\d+)_batch_(\d+)\.{}$",
            regex::escape(kind.prefix()),
            kind.extension()
        );
        let regex = Regex::new(&pattern)
            .with_context(|| format!("failed to compile {} file name regex", kind.prefix()))?;
        Ok(Self { regex })
    }

    pub fn parse(&self, file_name: &str) -> Option<BatchId> {
        let captures = self.regex.captures(file_name)?;
        let size_class = SizeClass::from_label(captures.get(1)?.as_str())?;
        let sequence = captures.get(2)?.as_str().parse::<usize>().ok()?;
        Some(BatchId {
            size_class,
            sequence,
        })
    }
}

/// One topic-scoped definition as emitted by the record splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub case_number: String,
    pub year: String,
    #[serde(alias = "policy_area:")]
    pub policy_area: String,
    pub link: String,
    pub topic: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    Batches,
    Sections,
    Definitions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifestEntry {
    pub file_name: String,
    pub batch: BatchId,
    pub size_label: String,
    pub policy_area: PolicyArea,
    pub case_id: String,
    pub year: String,
    pub url: String,
    pub text_chars: usize,
    pub text_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifest {
    pub manifest_version: u32,
    pub kind: ManifestKind,
    pub run_id: String,
    pub generated_at: String,
    pub entries: Vec<BatchManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageManifestEntry {
    pub batch: BatchId,
    pub source_file: String,
    pub output_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageManifest {
    pub manifest_version: u32,
    pub kind: ManifestKind,
    pub generated_at: String,
    pub model: String,
    pub entries: Vec<StageManifestEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationCounts {
    pub small_batches: usize,
    pub large_batches: usize,
    pub section_files: usize,
    pub json_files: usize,
    pub merged_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStageRecord {
    pub name: String,
    pub description: String,
    pub status: String,
    pub missing_inputs: Vec<String>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub chunk_sizes: String,
    pub stages: Vec<PipelineStageRecord>,
    pub counts: ReconciliationCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_area_from_url_uses_path_segment() {
        assert_eq!(
            PolicyArea::from_url("https://ec.europa.eu/competition/mergers/cases/a.pdf"),
            PolicyArea::Merger
        );
        assert_eq!(
            PolicyArea::from_url("https://ec.europa.eu/competition/antitrust/cases/a.pdf"),
            PolicyArea::AntitrustCartels
        );
        assert_eq!(
            PolicyArea::from_url("https://ec.europa.eu/competition/state_aid/cases/a.pdf"),
            PolicyArea::StateAid
        );
        assert_eq!(
            PolicyArea::from_url("https://ec.europa.eu/competition/other/a.pdf"),
            PolicyArea::Unknown
        );
    }

    #[test]
    fn policy_area_parse_accepts_every_rendered_form() {
        for area in PolicyArea::ALL {
            assert_eq!(PolicyArea::parse(area.display_name()), area);
            assert_eq!(PolicyArea::parse(area.key()), area);
            assert_eq!(PolicyArea::parse(area.batch_label()), area);
        }
        assert_eq!(PolicyArea::parse("Competition"), PolicyArea::Unknown);
    }

    #[test]
    fn size_class_boundary_is_exclusive() {
        let at_threshold = "a".repeat(LARGE_DOCUMENT_THRESHOLD);
        let above = "a".repeat(LARGE_DOCUMENT_THRESHOLD + 1);
        assert_eq!(SizeClass::classify(&at_threshold), SizeClass::Small);
        assert_eq!(SizeClass::classify(&above), SizeClass::Large);
    }

    #[test]
    fn size_class_counts_characters_not_bytes() {
        let multibyte = "é".repeat(LARGE_DOCUMENT_THRESHOLD);
        assert!(multibyte.len() > LARGE_DOCUMENT_THRESHOLD);
        assert_eq!(SizeClass::classify(&multibyte), SizeClass::Small);
    }

    #[test]
    fn batch_file_names_follow_legacy_scheme() {
        let id = BatchId {
            size_class: SizeClass::Large,
            sequence: 12,
        };
        assert_eq!(id.file_name(BatchFileKind::Batch), "pdf_texts_80_batch_12.txt");
        assert_eq!(
            id.file_name(BatchFileKind::Section),
            "extract-sections_80_batch_12.txt"
        );
        assert_eq!(
            id.file_name(BatchFileKind::Definitions),
            "extract-definitions_80_batch_12.json"
        );
    }

    #[test]
    fn batch_name_pattern_recovers_identity() {
        let pattern = BatchNamePattern::new(BatchFileKind::Section).unwrap();
        assert_eq!(
            pattern.parse("extract-sections_79_batch_4.txt"),
            Some(BatchId {
                size_class: SizeClass::Small,
                sequence: 4
            })
        );
        assert_eq!(pattern.parse("extract-sections_batch_4.txt"), None);
        assert_eq!(pattern.parse("extract-sections_81_batch_4.txt"), None);
        assert_eq!(pattern.parse("pdf_texts_79_batch_4.txt"), None);
        assert_eq!(pattern.parse("old-extract-sections_79_batch_4.txt"), None);
    }

    #[test]
    fn topic_record_accepts_misspelled_policy_area_key() {
        let raw = r#"{"case_number":"M.1","year":"2024","policy_area:":"Merger","link":"u","topic":"t","text":"x"}"#;
        let record: TopicRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.policy_area, "Merger");
    }
}
