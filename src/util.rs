//! Shared utility functions for the buildbay crate.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Replace `path` with `contents` so readers never observe a partial write.
///
/// The data is written to a temporary file in the same directory, synced,
/// and renamed over the destination. The parent directory is created if absent.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Keep only the last `limit` lines of `text`, joined with `\n`.
///
/// Line endings are normalized and trailing empty lines are ignored; the
/// oldest lines are the ones dropped.
pub fn tail_lines(text: &str, limit: usize) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    let start = lines.len().saturating_sub(limit);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parent_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/status.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1, "temp files must not be left behind");
    }

    #[test]
    fn test_tail_lines_keeps_last_lines_in_order() {
        let text = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(tail_lines(&text, 3), "8\n9\n10");
    }

    #[test]
    fn test_tail_lines_short_input_untouched() {
        assert_eq!(tail_lines("a\nb", 2000), "a\nb");
        assert_eq!(tail_lines("", 5), "");
    }

    #[test]
    fn test_tail_lines_ignores_trailing_newlines() {
        let text: String = (1..=5).map(|i| format!("line {}\n", i)).collect();
        assert_eq!(tail_lines(&text, 2), "line 4\nline 5");
        assert_eq!(tail_lines(&format!("{}\n\n", text), 2), "line 4\nline 5");
        assert_eq!(tail_lines("a\n\nb\n", 3), "a\n\nb");
    }

    #[test]
    fn test_tail_lines_zero_limit() {
        assert_eq!(tail_lines("a\nb\nc", 0), "");
    }
}
