// src/channel/metadata.rs

//! Channel metadata and archive snapshot records

use crate::error::{Error, Result};
use crate::fsutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.json";

/// What put a bundle into a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    #[default]
    Publish,
    Promote,
    Rollback,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publish => write!(f, "publish"),
            Self::Promote => write!(f, "promote"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// One entry of the bounded channel history, most recent first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub bundle: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_from: Option<String>,
    #[serde(default)]
    pub action: HistoryAction,
}

/// `metadata.json` of a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub channel: String,
    pub created: DateTime<Utc>,
    /// `None` while the channel is empty
    pub current_bundle: Option<String>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ChannelMetadata {
    pub fn new(channel: &str) -> Self {
        let now = Utc::now();
        Self {
            channel: channel.to_string(),
            created: now,
            current_bundle: None,
            last_updated: now,
            history: Vec::new(),
        }
    }

    /// Make `entry` current, prepend it to history and trim to `limit`
    pub fn record(&mut self, entry: HistoryEntry, limit: usize) {
        self.current_bundle = Some(entry.bundle.clone());
        self.last_updated = entry.published_at;
        self.history.insert(0, entry);
        self.history.truncate(limit.max(1));
    }

    pub fn is_empty(&self) -> bool {
        self.current_bundle.is_none()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("cannot read channel metadata {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::ParseError(format!("invalid channel metadata {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::write_json_atomic(path, self)
    }
}

/// `snapshot.json` inside `archive/<id>/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Bundle whose content this snapshot holds
    pub bundle: String,
    pub channel: String,
    pub archived_at: DateTime<Utc>,
    /// Bundle that replaced it
    pub replaced_by: String,
    pub operation: String,
    pub file_count: usize,
    pub total_size: u64,
}

impl SnapshotRecord {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            Error::ParseError(format!("invalid snapshot record {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::write_json_atomic(path, self)
    }
}
