//! The four-line metadata header carried at the top of every intermediate text
//! file, and the blank-line separated header blocks of the links file.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};

use crate::model::{CaseLink, ExclusionRecord, PolicyArea};

pub const CASE_NUMBER: &str = "Case Number";
pub const YEAR: &str = "Year";
pub const POLICY_AREA: &str = "Policy Area";
pub const LINK: &str = "Link";
pub const REASON: &str = "Reason";

/// Renders the four header lines, each newline-terminated.
pub fn render_header(case_id: &str, year: &str, policy_area: &str, url: &str) -> String {
    format!(
        "{CASE_NUMBER}: {case_id}\n{YEAR}: {year}\n{POLICY_AREA}: {policy_area}\n{LINK}: {url}\n"
    )
}

/// Header block as written to the links file, using the display name of the area.
pub fn render_link_block(link: &CaseLink) -> String {
    let mut block = render_header(
        &link.case_id,
        &link.year,
        link.policy_area.display_name(),
        &link.url,
    );
    block.push('\n');
    block
}

/// Batch file body: header with the batch label of the area, blank line, raw text.
pub fn render_batch_file(link: &CaseLink, text: &str) -> String {
    let mut body = render_header(
        &link.case_id,
        &link.year,
        link.policy_area.batch_label(),
        &link.url,
    );
    body.push('\n');
    body.push_str(text);
    body
}

pub fn render_included_block(link: &CaseLink) -> String {
    let mut block = render_header(
        &link.case_id,
        &link.year,
        link.policy_area.batch_label(),
        &link.url,
    );
    block.push('\n');
    block
}

pub fn render_excluded_block(record: &ExclusionRecord) -> String {
    let link = &record.link;
    let mut block = render_header(
        &link.case_id,
        &link.year,
        link.policy_area.batch_label(),
        &link.url,
    );
    block.push_str(&format!("{REASON}: {}\n\n", record.reason));
    block
}

/// Splits text into `key: value` blocks separated by blank lines. A trailing
/// block without a closing blank line is still returned.
pub fn parse_blocks(text: &str) -> Result<Vec<HashMap<String, String>>> {
    let mut blocks = Vec::new();
    let mut current = HashMap::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }

        let Some((key, value)) = line.split_once(": ") else {
            bail!("line {} is not a `key: value` pair: {line}", index + 1);
        };
        current.insert(key.to_string(), value.to_string());
    }

    if !current.is_empty() {
        blocks.push(current);
    }

    Ok(blocks)
}

pub fn parse_link_blocks(text: &str) -> Result<Vec<CaseLink>> {
    parse_blocks(text)?
        .into_iter()
        .enumerate()
        .map(|(index, block)| {
            let field = |name: &str| {
                block
                    .get(name)
                    .cloned()
                    .with_context(|| format!("link block {} has no `{name}` field", index + 1))
            };

            Ok(CaseLink {
                case_id: field(CASE_NUMBER)?,
                year: field(YEAR)?,
                policy_area: PolicyArea::parse(&field(POLICY_AREA)?),
                url: field(LINK)?,
            })
        })
        .collect()
}
