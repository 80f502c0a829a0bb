use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::util::{tail_lines, write_atomic};

/// Per-project capture of the most recent command output.
///
/// Each write replaces the whole file; nothing is appended across runs.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
    line_limit: usize,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>, line_limit: usize) -> Self {
        Self {
            dir: dir.into(),
            line_limit,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn line_limit(&self) -> usize {
        self.line_limit
    }

    pub fn path_for(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.log", project))
    }

    /// Store `content` verbatim.
    pub fn write(&self, project: &str, content: &str) -> Result<()> {
        write_atomic(&self.path_for(project), content.as_bytes())
    }

    /// Store only the last `line_limit` lines of `content`.
    pub fn write_truncated(&self, project: &str, content: &str) -> Result<()> {
        self.write(project, &tail_lines(content, self.line_limit))
    }

    /// Last stored log, or `None` when absent or unreadable.
    pub fn read(&self, project: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(project)).ok()
    }
}

/// Multi-section log accumulated over a job and persisted once at the end.
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new titled section; sections after the first are preceded by a blank line.
    pub fn section(&mut self, title: impl Into<String>) {
        if !self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.lines.push(title.into());
    }

    pub fn push(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.lines.push(text);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_missing_log_is_none() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path(), 2000);
        assert!(store.read("Foo").is_none());
    }

    #[test]
    fn test_write_replaces_previous_run() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("logs"), 2000);
        store.write("Foo", "first run").unwrap();
        store.write("Foo", "second run").unwrap();
        assert_eq!(store.read("Foo").unwrap(), "second run");
    }

    #[test]
    fn test_truncated_write_keeps_exactly_last_lines() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path(), 2000);
        let output: String = (1..=2500).map(|i| format!("line {}\n", i)).collect();
        store.write_truncated("Foo", &output).unwrap();

        let stored = store.read("Foo").unwrap();
        let lines: Vec<&str> = stored.lines().collect();
        assert_eq!(lines.len(), 2000);
        assert_eq!(lines[0], "line 501");
        assert_eq!(lines[1999], "line 2500");
    }

    #[test]
    fn test_plain_write_is_not_truncated() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path(), 2);
        store.write("Foo", "a\nb\nc\nd").unwrap();
        assert_eq!(store.read("Foo").unwrap(), "a\nb\nc\nd");
    }

    #[test]
    fn test_transcript_sections() {
        let mut transcript = Transcript::new();
        transcript.section("Connecting to device 10.0.0.5:5555:");
        transcript.push("connected to 10.0.0.5:5555");
        transcript.push("");
        transcript.section("Installing app-debug.apk:");
        transcript.push("Success");
        assert_eq!(
            transcript.render(),
            "Connecting to device 10.0.0.5:5555:\nconnected to 10.0.0.5:5555\n\nInstalling app-debug.apk:\nSuccess"
        );
    }
}
