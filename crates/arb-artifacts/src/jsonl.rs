// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only JSON Lines streams.

use crate::ArtifactError;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// An append-only JSONL stream with an explicit close.
///
/// Every error is surfaced to the caller; a failed stream write is
/// fatal to the run, so the orchestrator must observe it before the
/// manifest is written.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<fs::File>,
    records: u64,
}

impl JsonlWriter {
    /// Open (create or truncate) a stream at `path`.
    ///
    /// # Errors
    ///
    /// Filesystem failure.
    pub fn create(path: &Path) -> Result<Self, ArtifactError> {
        let file = fs::File::create(path).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    /// Append one record as a single line.
    ///
    /// # Errors
    ///
    /// Serialization or filesystem failure.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), ArtifactError> {
        let line = serde_json::to_string(record)?;
        let io_err = |source| ArtifactError::Io {
            path: self.path.display().to_string(),
            source,
        };
        self.writer.write_all(line.as_bytes()).map_err(io_err)?;
        self.writer.write_all(b"\n").map_err(io_err)?;
        self.records += 1;
        Ok(())
    }

    /// Records appended so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush, sync, and close the stream; returns the record count.
    ///
    /// # Errors
    ///
    /// Filesystem failure on flush or sync.
    pub fn close(mut self) -> Result<u64, ArtifactError> {
        let io_err = |source| ArtifactError::Io {
            path: self.path.display().to_string(),
            source,
        };
        self.writer.flush().map_err(io_err)?;
        self.writer.get_ref().sync_all().map_err(io_err)?;
        Ok(self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let mut w = JsonlWriter::create(&path).unwrap();
        w.append(&serde_json::json!({"trial_id": 0})).unwrap();
        w.append(&serde_json::json!({"trial_id": 1})).unwrap();
        assert_eq!(w.close().unwrap(), 2);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["trial_id"], 0);
    }

    #[test]
    fn create_truncates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        {
            let mut w = JsonlWriter::create(&path).unwrap();
            w.append(&serde_json::json!({"old": true})).unwrap();
            w.close().unwrap();
        }
        let w = JsonlWriter::create(&path).unwrap();
        assert_eq!(w.records(), 0);
        drop(w);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn create_fails_on_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("records.jsonl");
        assert!(JsonlWriter::create(&path).is_err());
    }
}
