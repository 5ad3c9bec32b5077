// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use crate::event::LogEvent;

/// Append-only JSONL log backing one session.
///
/// Only the lane holder for a session writes; concurrent readers are fine.
/// Each event is one line, written and flushed in a single call so a crash
/// can only ever leave one torn trailing line — which the loader detects
/// and discards.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    events: Vec<LogEvent>,
}

impl SessionLog {
    /// Load the log at `path`, creating an empty one if absent.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let mut events = Vec::new();
        if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let lines: Vec<&str> = text.lines().collect();
            for (i, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEvent>(line) {
                    Ok(event) => events.push(event),
                    Err(e) if i == lines.len() - 1 => {
                        // Torn trailing record from a crash mid-append.
                        warn!(path = %path.display(), error = %e, "discarding partial trailing record");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), line = i + 1, error = %e, "skipping unreadable record");
                    }
                }
            }
        }
        Ok(Self { path, events })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append one event durably, then record it in memory.
    pub fn append(&mut self, event: LogEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush()?;
        self.events.push(event);
        Ok(())
    }

    pub fn append_all(
        &mut self,
        events: impl IntoIterator<Item = LogEvent>,
    ) -> anyhow::Result<()> {
        for e in events {
            self.append(e)?;
        }
        Ok(())
    }

    /// Index just past the most recent `Branch` event, or 0 when the log
    /// has never been compacted.
    pub fn active_branch_start(&self) -> usize {
        self.events
            .iter()
            .rposition(|e| matches!(e, LogEvent::Branch { .. }))
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    /// The summary carried by the most recent `Branch` event, if any.
    pub fn active_branch_summary(&self) -> Option<&str> {
        self.events.iter().rev().find_map(|e| match e {
            LogEvent::Branch { summary, .. } => Some(summary.as_str()),
            _ => None,
        })
    }

    /// Events of the active branch (after the last `Branch` marker).
    pub fn active_events(&self) -> &[LogEvent] {
        &self.events[self.active_branch_start()..]
    }

    /// Number of branches recorded (compactions survived).
    pub fn branch_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, LogEvent::Branch { .. }))
            .count()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &tempfile::TempDir) -> SessionLog {
        SessionLog::open(dir.path().join("s.jsonl")).unwrap()
    }

    #[test]
    fn open_missing_file_gives_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        assert!(log.is_empty());
    }

    #[test]
    fn append_then_reopen_preserves_events() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = log_in(&dir);
            log.append(LogEvent::user("hi")).unwrap();
            log.append(LogEvent::assistant("hello")).unwrap();
        }
        let log = log_in(&dir);
        assert_eq!(log.events().len(), 2);
        assert!(matches!(log.events()[1], LogEvent::Assistant { .. }));
    }

    #[test]
    fn torn_trailing_line_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        {
            let mut log = SessionLog::open(&path).unwrap();
            log.append(LogEvent::user("hi")).unwrap();
        }
        // Simulate a crash mid-append: a partial JSON record with no newline.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"type\":\"assistant\",\"time").unwrap();
        drop(f);

        let log = SessionLog::open(&path).unwrap();
        assert_eq!(log.events().len(), 1, "partial record must be dropped");
    }

    #[test]
    fn append_after_crash_recovery_works() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "{broken").unwrap();
        let mut log = SessionLog::open(&path).unwrap();
        log.append(LogEvent::user("fresh")).unwrap();
        let reread = SessionLog::open(&path).unwrap();
        assert_eq!(reread.events().len(), 1);
    }

    #[test]
    fn active_branch_starts_at_zero_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = log_in(&dir);
        log.append(LogEvent::user("a")).unwrap();
        assert_eq!(log.active_branch_start(), 0);
        assert_eq!(log.active_events().len(), 1);
        assert!(log.active_branch_summary().is_none());
    }

    #[test]
    fn branch_marker_splits_active_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = log_in(&dir);
        log.append(LogEvent::user("old")).unwrap();
        log.append(LogEvent::assistant("old reply")).unwrap();
        log.append(LogEvent::branch("b1", "summary of old")).unwrap();
        log.append(LogEvent::user("new")).unwrap();

        assert_eq!(log.branch_count(), 1);
        assert_eq!(log.active_events().len(), 1);
        assert_eq!(log.active_branch_summary(), Some("summary of old"));
        // The pre-compaction history is still in the file.
        assert_eq!(log.events().len(), 4);
    }

    #[test]
    fn latest_branch_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = log_in(&dir);
        log.append(LogEvent::branch("b1", "first")).unwrap();
        log.append(LogEvent::user("mid")).unwrap();
        log.append(LogEvent::branch("b2", "second")).unwrap();
        assert_eq!(log.active_branch_summary(), Some("second"));
        assert!(log.active_events().is_empty());
    }
}
