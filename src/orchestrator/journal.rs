// src/orchestrator/journal.rs

//! Append-only migration run journal
//!
//! Each record is one line, `{crc32_hex}|{json}`, fsynced at phase
//! boundaries. The journal is an audit trail and a resume sanity check,
//! never load-bearing: a write failure is reported to the caller, who
//! logs it and moves on.

use crate::error::{Error, Result};
use crate::orchestrator::MigrateState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// A record in the run journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Run started against a source host
    RunStarted {
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// Orchestrator state transition
    Transition {
        from: MigrateState,
        to: MigrateState,
        timestamp: DateTime<Utc>,
    },

    /// One rsync pass finished
    PassComplete {
        pass: u32,
        timestamp: DateTime<Utc>,
    },

    /// Session activity counters at teardown
    SessionStats {
        host: String,
        commands: u64,
        reconnects: u64,
    },

    /// Run ended
    RunFinished {
        success: bool,
        final_state: MigrateState,
        timestamp: DateTime<Utc>,
    },
}

/// Append-only journal writer
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Create or append to the journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Journal {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Journal {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        Ok(Self { path, file })
    }

    /// Append one record.
    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(|e| Error::Journal {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json).map_err(|e| Error::Journal {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    /// Durability barrier; used at phase boundaries.
    pub fn barrier(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|e| Error::Journal {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    /// Replay a journal, skipping lines whose checksum does not verify.
    pub fn replay(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::Journal {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::Journal {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
            let Some((crc_hex, json)) = line.split_once('|') else {
                continue;
            };
            let Ok(expected) = u32::from_str_radix(crc_hex, 16) else {
                continue;
            };
            if crc32fast::hash(json.as_bytes()) != expected {
                continue;
            }
            if let Ok(record) = serde_json::from_str(json) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// The last state a previous run reached, if the journal has one.
    pub fn last_state(path: impl AsRef<Path>) -> Option<MigrateState> {
        let records = Self::replay(path).ok()?;
        records.iter().rev().find_map(|r| match r {
            JournalRecord::Transition { to, .. } => Some(*to),
            JournalRecord::RunFinished { final_state, .. } => Some(*final_state),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.journal");

        let mut journal = Journal::open(&path).unwrap();
        journal
            .append(&JournalRecord::RunStarted {
                source: "src.example.com".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();
        journal
            .append(&JournalRecord::Transition {
                from: MigrateState::Start,
                to: MigrateState::ConnectSource,
                timestamp: Utc::now(),
            })
            .unwrap();
        journal.barrier().unwrap();

        let records = Journal::replay(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], JournalRecord::RunStarted { .. }));
    }

    #[test]
    fn test_corrupt_lines_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.journal");

        let mut journal = Journal::open(&path).unwrap();
        journal
            .append(&JournalRecord::PassComplete {
                pass: 1,
                timestamp: Utc::now(),
            })
            .unwrap();
        drop(journal);

        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"deadbeef|{\"type\":\"PassComplete\",\"pass\":2}\nnot a record\n")
            .unwrap();

        let records = Journal::replay(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_last_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.journal");

        let mut journal = Journal::open(&path).unwrap();
        journal
            .append(&JournalRecord::Transition {
                from: MigrateState::Migrate,
                to: MigrateState::Cleanup,
                timestamp: Utc::now(),
            })
            .unwrap();
        drop(journal);

        assert_eq!(Journal::last_state(&path), Some(MigrateState::Cleanup));
        assert_eq!(Journal::last_state(dir.path().join("absent")), None);
    }
}
