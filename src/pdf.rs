use std::io::Write;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;

/// Per-page text of one PDF, in page order.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPdf {
    pub pages: Vec<String>,
}

impl ExtractedPdf {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn full_text(&self) -> String {
        self.pages.concat()
    }
}

pub trait PdfTextExtractor {
    fn extract(&self, pdf_bytes: &[u8]) -> Result<ExtractedPdf>;
}

/// Text-layer extraction through poppler's `pdftotext`.
#[derive(Debug, Clone, Default)]
pub struct PdftotextExtractor;

impl PdfTextExtractor for PdftotextExtractor {
    fn extract(&self, pdf_bytes: &[u8]) -> Result<ExtractedPdf> {
        // Removed when dropped, on every exit path.
        let scratch = write_scratch_pdf(pdf_bytes)?;
        let raw = run_pdftotext(scratch.path())?;

        Ok(ExtractedPdf {
            pages: split_pages(&raw),
        })
    }
}

fn write_scratch_pdf(pdf_bytes: &[u8]) -> Result<NamedTempFile> {
    let mut scratch = tempfile::Builder::new()
        .prefix("lextract_")
        .suffix(".pdf")
        .tempfile()
        .context("failed to create temporary pdf file")?;
    let path = scratch.path().to_path_buf();
    scratch
        .write_all(pdf_bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    scratch
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(scratch)
}

fn run_pdftotext(pdf_path: &Path) -> Result<String> {
    let output = Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(pdf_path)
        .arg("-")
        .output()
        .with_context(|| format!("failed to execute pdftotext for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `pdftotext` terminates every page with a form feed, so the chunk after the
/// final one is dropped; blank pages in the middle still count.
fn split_pages(raw: &str) -> Vec<String> {
    let mut pages: Vec<String> = raw
        .split('\u{000C}')
        .map(|chunk| chunk.replace('\u{0000}', ""))
        .collect();

    if pages.last().is_some_and(|last| last.trim().is_empty()) {
        pages.pop();
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_pages_drops_only_the_terminating_chunk() {
        let raw = "first\u{000C}\u{000C}third\u{000C}";
        let pages = split_pages(raw);
        assert_eq!(pages, vec!["first", "", "third"]);
    }

    #[test]
    fn split_pages_strips_nul_bytes() {
        let pages = split_pages("a\u{0000}b\u{000C}");
        assert_eq!(pages, vec!["ab"]);
    }

    #[test]
    fn scratch_pdf_holds_the_bytes_and_is_removed_on_drop() {
        let scratch = write_scratch_pdf(b"%PDF-1.4 body").unwrap();
        let path = scratch.path().to_path_buf();
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 body");

        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn full_text_joins_pages_without_separator() {
        let pdf = ExtractedPdf {
            pages: vec!["one ".to_string(), "two".to_string()],
        };
        assert_eq!(pdf.page_count(), 2);
        assert_eq!(pdf.full_text(), "one two");
    }
}
