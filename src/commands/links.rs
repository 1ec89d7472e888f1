use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader, open_workbook_auto};
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::LinksArgs;
use crate::header::render_link_block;
use crate::model::{CaseLink, PolicyArea};

pub const DECISIONS_COLUMN: &str = "Decisions";
pub const CASE_NUMBER_COLUMN: &str = "Case number";
pub const DECISION_DATE_COLUMN: &str = "Last decision date";

const REQUIRED_COLUMNS: [&str; 3] = [DECISIONS_COLUMN, CASE_NUMBER_COLUMN, DECISION_DATE_COLUMN];

const DATED_LINK_PATTERN: &str = r"Decision text: EN published on \d{2}\.\d{2}\.\d{4} - (https://ec\.europa\.eu/competition/[^ \n]*\.pdf)";
const UNDATED_LINK_PATTERN: &str =
    r"Decision text: EN - (https://ec\.europa\.eu/competition/[^ \n]*\.pdf)";
const DECISION_DATE_PATTERN: &str = r"\d{2}\.\d{2}\.(\d{4})";

pub const UNKNOWN_YEAR: &str = "Unknown";

#[derive(Debug, Error)]
#[error("missing required columns: {}", missing.join(", "))]
pub struct MissingColumnsError {
    pub missing: Vec<String>,
}

/// A worksheet reduced to trimmed header names and stringified cells.
#[derive(Debug, Clone, Default)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = headers
            .into_iter()
            .map(|header| header.trim().to_string())
            .collect();
        Self { headers, rows }
    }

    /// Loads the first worksheet of an xlsx/xls/ods workbook; its first row is the header.
    pub fn read_workbook(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("failed to open workbook {}", path.display()))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .with_context(|| format!("workbook has no sheets: {}", path.display()))?;
        let range = workbook
            .worksheet_range(&sheet_name)
            .with_context(|| format!("failed to read sheet `{sheet_name}`"))?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        let headers = rows.next().unwrap_or_default();

        Ok(Self::new(headers, rows.collect()))
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR:{e:?}"),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

#[derive(Debug, Default)]
pub struct LinkResolution {
    pub links: Vec<CaseLink>,
    pub cases_without_links: Vec<String>,
}

pub struct LinkResolver {
    dated: Regex,
    undated: Regex,
    decision_date: Regex,
}

impl LinkResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dated: Regex::new(DATED_LINK_PATTERN).context("failed to compile dated link regex")?,
            undated: Regex::new(UNDATED_LINK_PATTERN)
                .context("failed to compile undated link regex")?,
            decision_date: Regex::new(DECISION_DATE_PATTERN)
                .context("failed to compile decision date regex")?,
        })
    }

    pub fn resolve(&self, table: &SheetTable) -> Result<LinkResolution, MissingColumnsError> {
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| table.column(name).is_none())
            .map(|name| name.to_string())
            .collect();
        let (Some(decisions), Some(case_number), Some(decision_date)) = (
            table.column(DECISIONS_COLUMN),
            table.column(CASE_NUMBER_COLUMN),
            table.column(DECISION_DATE_COLUMN),
        ) else {
            return Err(MissingColumnsError { missing });
        };

        let mut resolution = LinkResolution::default();
        for row in &table.rows {
            let case_id = cell(row, case_number);
            let links = self.resolve_row(cell(row, decisions), case_id, cell(row, decision_date));
            if links.is_empty() {
                resolution.cases_without_links.push(case_id.to_string());
                continue;
            }
            resolution.links.extend(links);
        }

        Ok(resolution)
    }

    /// Dated-pattern matches come first, then undated ones; nothing is deduplicated.
    pub fn resolve_row(&self, decisions: &str, case_id: &str, decision_date: &str) -> Vec<CaseLink> {
        let year = self.extract_year(decision_date);

        self.dated
            .captures_iter(decisions)
            .chain(self.undated.captures_iter(decisions))
            .filter_map(|captures| captures.get(1))
            .map(|url| CaseLink {
                case_id: case_id.to_string(),
                year: year.clone(),
                policy_area: PolicyArea::from_url(url.as_str()),
                url: url.as_str().to_string(),
            })
            .collect()
    }

    pub fn extract_year(&self, decision_date: &str) -> String {
        self.decision_date
            .captures(decision_date)
            .and_then(|captures| captures.get(1))
            .map(|year| year.as_str().to_string())
            .unwrap_or_else(|| UNKNOWN_YEAR.to_string())
    }
}

pub fn run(args: LinksArgs) -> Result<()> {
    if !args.input.is_file() {
        bail!("input workbook does not exist: {}", args.input.display());
    }

    let table = SheetTable::read_workbook(&args.input)?;
    info!(
        path = %args.input.display(),
        rows = table.rows.len(),
        columns = %table.headers.join(", "),
        "loaded workbook"
    );

    let resolver = LinkResolver::new()?;
    let resolution = resolver.resolve(&table)?;

    for case_id in &resolution.cases_without_links {
        warn!(case = %case_id, "no links found for case");
    }

    let rendered: String = resolution.links.iter().map(render_link_block).collect();
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    fs::write(&args.output, rendered)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    info!(
        links = resolution.links.len(),
        path = %args.output.display(),
        "extracted decision links"
    );

    Ok(())
}
