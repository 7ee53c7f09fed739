//! Per-source read positions for the scan engine.
//!
//! Offsets live in memory for the monitor's lifetime; a restart re-reads
//! whatever the rotation policy dictates. Only the scan engine writes here.

use crate::error::SourceReadError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// What to do when a source shrinks below its stored offset (logrotate,
/// truncation, replacement).
///
/// `ResetAndRescan` favors re-processing over missing errors written to the
/// fresh file: duplicates are mostly absorbed by the dedupe cache anyway.
/// `SkipToEnd` never re-processes but can miss lines written between the
/// rotation and the next scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    #[default]
    ResetAndRescan,
    SkipToEnd,
}

/// Tracks the last-read byte offset per log source.
#[derive(Debug)]
pub struct LogCursor {
    offsets: HashMap<PathBuf, u64>,
    policy: RotationPolicy,
}

impl LogCursor {
    pub fn new(policy: RotationPolicy) -> Self {
        Self {
            offsets: HashMap::new(),
            policy,
        }
    }

    /// Return all complete lines appended to `source` since the last read,
    /// advancing the stored offset past each returned line.
    ///
    /// A trailing partial line (no newline yet) is left in place and picked
    /// up on a later cycle once the writer finishes it, so a line is never
    /// handed out half-written. Offsets only advance for lines that are
    /// returned (at-least-once delivery).
    pub fn read_new(&mut self, source: &Path) -> Result<Vec<String>, SourceReadError> {
        let len = std::fs::metadata(source)
            .map_err(|e| read_error(source, &e))?
            .len();

        let mut offset = self.offsets.get(source).copied().unwrap_or(0);
        if len < offset {
            offset = match self.policy {
                RotationPolicy::ResetAndRescan => 0,
                RotationPolicy::SkipToEnd => len,
            };
        }
        if len == offset {
            self.offsets.insert(source.to_path_buf(), offset);
            return Ok(Vec::new());
        }

        let file = File::open(source).map_err(|e| read_error(source, &e))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| read_error(source, &e))?;

        let mut lines = Vec::new();
        loop {
            let mut buf = String::new();
            let bytes = reader.read_line(&mut buf).map_err(|e| read_error(source, &e))?;
            if bytes == 0 {
                break;
            }
            if !buf.ends_with('\n') {
                // Incomplete trailing line; leave it for the next cycle.
                break;
            }
            offset += bytes as u64;
            lines.push(buf.trim_end_matches(['\n', '\r']).to_string());
        }

        self.offsets.insert(source.to_path_buf(), offset);
        Ok(lines)
    }

    #[cfg(test)]
    pub(crate) fn offset(&self, source: &Path) -> u64 {
        self.offsets.get(source).copied().unwrap_or(0)
    }
}

fn read_error(source: &Path, e: &std::io::Error) -> SourceReadError {
    SourceReadError {
        path: source.to_path_buf(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_read_new_only_returns_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "first\nsecond\n").unwrap();

        let mut cursor = LogCursor::new(RotationPolicy::ResetAndRescan);
        assert_eq!(cursor.read_new(&log).unwrap(), vec!["first", "second"]);
        assert!(cursor.read_new(&log).unwrap().is_empty());

        append(&log, "third\n");
        assert_eq!(cursor.read_new(&log).unwrap(), vec!["third"]);
    }

    #[test]
    fn test_partial_trailing_line_is_held_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "done\nhalf-writ").unwrap();

        let mut cursor = LogCursor::new(RotationPolicy::ResetAndRescan);
        assert_eq!(cursor.read_new(&log).unwrap(), vec!["done"]);

        append(&log, "ten\n");
        assert_eq!(cursor.read_new(&log).unwrap(), vec!["half-written"]);
    }

    #[test]
    fn test_truncation_resets_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "a long line that will be rotated away\n").unwrap();

        let mut cursor = LogCursor::new(RotationPolicy::ResetAndRescan);
        cursor.read_new(&log).unwrap();

        // Simulate logrotate: replaced with a shorter file.
        fs::write(&log, "fresh\n").unwrap();
        assert_eq!(cursor.read_new(&log).unwrap(), vec!["fresh"]);
        assert_eq!(cursor.offset(&log), 6);
    }

    #[test]
    fn test_skip_to_end_policy_jumps_past_rotated_content() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, "a long line that will be rotated away\n").unwrap();

        let mut cursor = LogCursor::new(RotationPolicy::SkipToEnd);
        cursor.read_new(&log).unwrap();

        fs::write(&log, "fresh\n").unwrap();
        assert!(cursor.read_new(&log).unwrap().is_empty());

        append(&log, "after\n");
        assert_eq!(cursor.read_new(&log).unwrap(), vec!["after"]);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.log");
        let mut cursor = LogCursor::new(RotationPolicy::ResetAndRescan);
        assert!(cursor.read_new(&missing).is_err());
    }
}
