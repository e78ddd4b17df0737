// src/channel/journal.rs

//! Append-only journal for channel operations
//!
//! Each Publish, Promote or Rollback writes its progress to `<channel>/.journal`
//! so an interrupted operation can be resolved the next time the channel is
//! locked. Records are single lines with a CRC32 prefix:
//!
//! ```text
//! {crc32_hex}|{json}
//! ```
//!
//! Every record is a barrier (written and fsynced before the step it
//! announces is considered durable). Reading stops at the first corrupted
//! line; a torn final write is simply not part of the history.

use super::metadata::ChannelMetadata;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const JOURNAL_FILE_NAME: &str = ".journal";

/// Kind of channel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Publish,
    Promote,
    Rollback,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Publish => "publish",
            Self::Promote => "promote",
            Self::Rollback => "rollback",
        })
    }
}

/// A record in the channel journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Operation started
    Begin {
        op_id: String,
        operation: Operation,
        channel: String,
        bundle: String,
        timestamp: DateTime<Utc>,
    },

    /// New tree is complete and verified at `stage_dir`
    ///
    /// `stage_inode` identifies the staged directory so recovery can tell
    /// whether the exchange happened. `archive_dir` is where the replaced tree
    /// will be filed; `source_archive` is the snapshot a rollback consumes.
    Staged {
        stage_dir: PathBuf,
        stage_inode: u64,
        archive_dir: Option<PathBuf>,
        source_archive: Option<PathBuf>,
    },

    /// Active content replaced; `stage_dir` now holds the previous tree (if any)
    Swapped { had_previous: bool },

    /// Previous tree moved into `archive_dir`
    Archived { archive_dir: PathBuf },

    /// About to write metadata; past this point recovery rolls forward
    MetadataIntent { metadata: ChannelMetadata },

    /// Operation complete
    Done { duration_ms: u64 },
}

/// Progress implied by a record sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Begun,
    Staged,
    Swapped,
    Archived,
    MetadataIntent,
    Done,
}

impl JournalRecord {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Begin { .. } => Phase::Begun,
            Self::Staged { .. } => Phase::Staged,
            Self::Swapped { .. } => Phase::Swapped,
            Self::Archived { .. } => Phase::Archived,
            Self::MetadataIntent { .. } => Phase::MetadataIntent,
            Self::Done { .. } => Phase::Done,
        }
    }
}

/// Append-only journal with fsync on every record
pub struct ChannelJournal {
    path: PathBuf,
    file: File,
}

impl ChannelJournal {
    /// Create a fresh journal; fails if one is already present
    pub fn create(channel_dir: &Path) -> Result<Self> {
        let path = channel_dir.join(JOURNAL_FILE_NAME);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                Error::IoError(format!("Failed to create journal {}: {}", path.display(), e))
            })?;
        Ok(Self { path, file })
    }

    /// Path of the journal for a channel, whether or not it exists
    pub fn path_for(channel_dir: &Path) -> PathBuf {
        channel_dir.join(JOURNAL_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and fsync
    pub fn write(&mut self, record: &JournalRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(|e| {
            Error::IoError(format!("Failed to serialize journal record: {}", e))
        })?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Remove the journal after the operation has completed
    pub fn finish(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        fs::remove_file(&path)?;
        Ok(())
    }
}

/// Read all intact records from a journal file
pub fn read_records(path: &Path) -> Result<Vec<JournalRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = match line_result {
            Ok(l) => l,
            Err(e) => {
                log::warn!("Unreadable journal line {}: {}", line_num + 1, e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }

        let Some((crc_hex, json)) = line.split_once('|') else {
            log::warn!("Malformed journal line {}: missing delimiter", line_num + 1);
            break;
        };
        let Ok(expected_crc) = u32::from_str_radix(crc_hex, 16) else {
            log::warn!("Invalid CRC32 at journal line {}: {}", line_num + 1, crc_hex);
            break;
        };
        let actual_crc = crc32fast::hash(json.as_bytes());
        if expected_crc != actual_crc {
            log::warn!(
                "CRC mismatch at journal line {}: expected {:08x}, got {:08x}",
                line_num + 1,
                expected_crc,
                actual_crc
            );
            break;
        }

        let record: JournalRecord = serde_json::from_str(json).map_err(|e| {
            Error::IoError(format!(
                "Failed to parse journal record at line {}: {}",
                line_num + 1,
                e
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Furthest phase reached by a record sequence
pub fn last_phase(records: &[JournalRecord]) -> Option<Phase> {
    records.iter().map(JournalRecord::phase).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn begin() -> JournalRecord {
        JournalRecord::Begin {
            op_id: "op-1".to_string(),
            operation: Operation::Publish,
            channel: "stable".to_string(),
            bundle: "b1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let mut journal = ChannelJournal::create(tmp.path()).unwrap();
        journal.write(&begin()).unwrap();
        journal
            .write(&JournalRecord::Staged {
                stage_dir: tmp.path().join(".stage-x"),
                stage_inode: 42,
                archive_dir: None,
                source_archive: None,
            })
            .unwrap();
        journal.write(&JournalRecord::Swapped { had_previous: true }).unwrap();

        let records = read_records(journal.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(last_phase(&records), Some(Phase::Swapped));
    }

    #[test]
    fn test_create_refuses_existing() {
        let tmp = TempDir::new().unwrap();
        let _journal = ChannelJournal::create(tmp.path()).unwrap();
        assert!(ChannelJournal::create(tmp.path()).is_err());
    }

    #[test]
    fn test_finish_removes_file() {
        let tmp = TempDir::new().unwrap();
        let mut journal = ChannelJournal::create(tmp.path()).unwrap();
        journal.write(&begin()).unwrap();
        journal.finish().unwrap();
        assert!(!ChannelJournal::path_for(tmp.path()).exists());
    }

    #[test]
    fn test_stops_at_corruption() {
        let tmp = TempDir::new().unwrap();
        let mut journal = ChannelJournal::create(tmp.path()).unwrap();
        journal.write(&begin()).unwrap();
        journal.write(&JournalRecord::Swapped { had_previous: false }).unwrap();
        let path = journal.path().to_path_buf();
        drop(journal);

        // Corrupt the second line's payload, then add a torn trailing write
        let content = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        lines[1] = lines[1].replace("false", "true");
        let corrupted = format!("{}\n{}\n00000000|{{\"type\":", lines[0], lines[1]);
        fs::write(&path, corrupted).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(last_phase(&records), Some(Phase::Begun));
    }

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::MetadataIntent > Phase::Archived);
        assert!(Phase::Swapped > Phase::Staged);
        assert_eq!(last_phase(&[]), None);
    }
}
