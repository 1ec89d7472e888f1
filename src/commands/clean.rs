use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::CleanArgs;
use crate::util::list_file_names;

/// Drops a leading ```` ```json ```` fence line and a trailing ```` ``` ```` line.
/// Everything else, line endings included, is kept byte for byte.
pub fn strip_fences(content: &str) -> String {
    let mut lines: Vec<&str> = content.split_inclusive('\n').collect();

    if lines
        .first()
        .is_some_and(|line| line.trim().starts_with("```json"))
    {
        lines.remove(0);
    }
    if lines.last().is_some_and(|line| line.trim() == "```") {
        lines.pop();
    }

    lines.concat()
}

pub fn clean_file(path: &Path) -> Result<bool> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let cleaned = strip_fences(&content);
    let changed = cleaned != content;

    fs::write(path, cleaned).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(changed)
}

pub fn run(args: CleanArgs) -> Result<()> {
    let files: Vec<String> = list_file_names(&args.indir)?
        .into_iter()
        .filter(|name| name.ends_with(".json"))
        .collect();

    if files.is_empty() {
        info!(indir = %args.indir.display(), "no JSON files found");
        return Ok(());
    }

    for name in &files {
        let path = args.indir.join(name);
        match clean_file(&path) {
            Ok(changed) => info!(file = %name, changed, "cleaned"),
            Err(err) => warn!(file = %name, error = %format!("{err:#}"), "failed to clean file"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_reply_is_unwrapped() {
        let raw = "```json\n[\n  {\"a\": 1}\n]\n```\n";
        assert_eq!(strip_fences(raw), "[\n  {\"a\": 1}\n]\n");
    }

    #[test]
    fn indented_fences_are_recognised() {
        let raw = "  ```json  \n[]\n  ```  ";
        assert_eq!(strip_fences(raw), "[]\n");
    }

    #[test]
    fn unfenced_content_is_untouched() {
        let raw = "[\r\n]\r\n";
        assert_eq!(strip_fences(raw), raw);
    }

    #[test]
    fn only_the_outermost_lines_are_considered() {
        let raw = "intro\n```json\n[]\n```\noutro\n";
        assert_eq!(strip_fences(raw), raw);
    }

    #[test]
    fn plain_opening_fence_is_kept() {
        let raw = "```\n[]\n```\n";
        assert_eq!(strip_fences(raw), "```\n[]\n");
    }

    #[test]
    fn run_rewrites_json_files_and_ignores_others() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "```json\n[]\n```\n").unwrap();
        fs::write(dir.path().join("b.txt"), "```json\n[]\n```\n").unwrap();

        run(CleanArgs {
            indir: dir.path().to_path_buf(),
        })
        .unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.json")).unwrap(), "[]\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "```json\n[]\n```\n"
        );
    }

    #[test]
    fn missing_directory_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        run(CleanArgs {
            indir: dir.path().join("absent"),
        })
        .unwrap();
    }
}
