// src/channel/recovery.rs

//! Crash recovery for channel operations
//!
//! Called with the channel lock held, before any new operation starts. The
//! journal tells us how far the interrupted operation got:
//!
//! - Before `MetadataIntent`: roll back. If `content/` is the staged
//!   directory (same inode), the previous tree is swapped back in and the new
//!   tree is left orphaned for manual cleanup. Metadata was never touched.
//!   A previous tree still parked by an unfinished rename fallback is moved
//!   back into `content/`.
//! - `MetadataIntent` reached: roll forward. The swap and archive are done;
//!   rewrite `bom.json` and `metadata.json` from the intent and drop the
//!   consumed rollback snapshot.
//! - `Done`: only the journal file was left behind.

use super::journal::{ChannelJournal, JournalRecord, Operation, Phase, last_phase, read_records};
use super::metadata::{ChannelMetadata, METADATA_FILE_NAME};
use super::{STAGE_PREFIX, refresh_index, swap};
use crate::bom::{BOM_FILE_NAME, BillOfMaterials};
use crate::bundle::CONTENT_DIR_NAME;
use crate::error::Result;
use crate::fsutil;
use std::fmt;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Outcome of recovery for a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No interrupted operation
    Clean,
    /// Journal had no intact begin record; nothing had been changed
    Discarded,
    /// Interrupted before the metadata commit; previous state kept
    RolledBack {
        op_id: String,
        operation: Operation,
        bundle: String,
        /// Whether the previous tree had to be swapped back in
        content_restored: bool,
        /// Staged tree left behind for manual cleanup
        orphaned: Option<PathBuf>,
    },
    /// Interrupted after the metadata commit point; completed
    RolledForward {
        op_id: String,
        operation: Operation,
        bundle: String,
    },
    /// Operation had finished, journal removed
    Completed { op_id: String },
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Discarded => write!(f, "discarded unreadable journal"),
            Self::RolledBack {
                operation,
                bundle,
                orphaned,
                ..
            } => {
                write!(f, "rolled back interrupted {} of '{}'", operation, bundle)?;
                if let Some(path) = orphaned {
                    write!(f, " (staged tree left at {})", path.display())?;
                }
                Ok(())
            }
            Self::RolledForward {
                operation, bundle, ..
            } => write!(f, "completed interrupted {} of '{}'", operation, bundle),
            Self::Completed { op_id } => write!(f, "cleaned up finished operation {}", op_id),
        }
    }
}

/// What the Staged record told us
struct StagedInfo {
    stage_dir: PathBuf,
    stage_inode: u64,
    archive_dir: Option<PathBuf>,
    source_archive: Option<PathBuf>,
}

/// Resolve the journal in `dir`, if any; the channel lock must be held
pub(super) fn recover_channel(dir: &Path, channel: &str) -> Result<RecoveryOutcome> {
    let journal_path = ChannelJournal::path_for(dir);
    if !journal_path.exists() {
        return Ok(RecoveryOutcome::Clean);
    }

    let records = match read_records(&journal_path) {
        Ok(records) => records,
        Err(e) => {
            log::warn!("Channel '{}' journal unreadable: {}", channel, e);
            Vec::new()
        }
    };

    let Some(JournalRecord::Begin {
        op_id,
        operation,
        bundle,
        ..
    }) = records.first().cloned()
    else {
        // Begin is written before anything else changes
        log::warn!("Discarding channel '{}' journal without a begin record", channel);
        remove_journal(dir, &journal_path)?;
        return Ok(RecoveryOutcome::Discarded);
    };

    let staged = records.iter().find_map(|r| match r {
        JournalRecord::Staged {
            stage_dir,
            stage_inode,
            archive_dir,
            source_archive,
        } => Some(StagedInfo {
            stage_dir: dir.join(stage_dir),
            stage_inode: *stage_inode,
            archive_dir: archive_dir.as_ref().map(|p| dir.join(p)),
            source_archive: source_archive.as_ref().map(|p| dir.join(p)),
        }),
        _ => None,
    });
    let intent = records.iter().find_map(|r| match r {
        JournalRecord::MetadataIntent { metadata } => Some(metadata.clone()),
        _ => None,
    });

    let phase = last_phase(&records).unwrap_or(Phase::Begun);
    log::info!(
        "Recovering interrupted {} of '{}' in channel '{}' (reached {:?})",
        operation,
        bundle,
        channel,
        phase
    );

    let outcome = match (phase, intent) {
        (Phase::Done, _) => RecoveryOutcome::Completed { op_id },
        (Phase::MetadataIntent, Some(metadata)) => {
            roll_forward(dir, &metadata, staged.as_ref())?;
            RecoveryOutcome::RolledForward {
                op_id,
                operation,
                bundle,
            }
        }
        _ => {
            let stage_fallback = dir.join(format!("{}{}", STAGE_PREFIX, op_id));
            let (content_restored, orphaned) = roll_back(dir, staged.as_ref(), stage_fallback)?;
            if let Some(path) = &orphaned {
                log::warn!(
                    "Staged tree of interrupted {} left at {} for manual cleanup",
                    operation,
                    path.display()
                );
            }
            RecoveryOutcome::RolledBack {
                op_id,
                operation,
                bundle,
                content_restored,
                orphaned,
            }
        }
    };

    remove_journal(dir, &journal_path)?;
    Ok(outcome)
}

/// Put the previous tree back in `content/` if the swap already happened
///
/// Returns whether content was restored and where the orphaned stage is.
fn roll_back(
    dir: &Path,
    staged: Option<&StagedInfo>,
    stage_fallback: PathBuf,
) -> Result<(bool, Option<PathBuf>)> {
    let Some(staged) = staged else {
        // Interrupted while copying; nothing visible changed
        return Ok((false, stage_fallback.exists().then_some(stage_fallback)));
    };

    let content = dir.join(CONTENT_DIR_NAME);
    let swapped = fs::metadata(&content).map(|m| m.ino()).ok() == Some(staged.stage_inode);
    let parked = swap::find_parked(dir)?;
    if !swapped {
        let orphan = staged.stage_dir.exists().then(|| staged.stage_dir.clone());
        // Fallback stopped after moving the previous tree aside
        if let Some(previous) = parked
            && !content.exists()
        {
            log::debug!("Restoring previous tree from {}", previous.display());
            fs::rename(&previous, &content)?;
            fsutil::sync_dir(dir);
            return Ok((true, orphan));
        }
        return Ok((false, orphan));
    }

    let archived_content = staged
        .archive_dir
        .as_ref()
        .map(|a| a.join(CONTENT_DIR_NAME))
        .filter(|p| p.is_dir());

    if let Some(previous) = parked {
        // Fallback stopped before moving the previous tree to the stage name
        log::debug!("Restoring previous tree from {}", previous.display());
        fs::rename(&content, &staged.stage_dir)?;
        fs::rename(&previous, &content)?;
    } else if let Some(previous) = archived_content {
        log::debug!("Restoring previous tree from {}", previous.display());
        swap::exchange(&previous, &content)?;
        fsutil::move_path(&previous, &staged.stage_dir)?;
    } else if staged.stage_dir.is_dir() {
        log::debug!("Restoring previous tree from {}", staged.stage_dir.display());
        swap::exchange(&staged.stage_dir, &content)?;
    } else {
        // Channel was empty before the swap
        fs::rename(&content, &staged.stage_dir)?;
    }
    fsutil::sync_dir(dir);

    if let Some(archive_dir) = &staged.archive_dir
        && archive_dir.exists()
    {
        fs::remove_dir_all(archive_dir)?;
    }
    refresh_index(dir);

    Ok((true, Some(staged.stage_dir.clone())))
}

/// Finish the commit recorded by a MetadataIntent
fn roll_forward(dir: &Path, metadata: &ChannelMetadata, staged: Option<&StagedInfo>) -> Result<()> {
    let content = dir.join(CONTENT_DIR_NAME);
    let bom = BillOfMaterials::generate(&content)?;
    bom.save(&dir.join(BOM_FILE_NAME))?;
    metadata.save(&dir.join(METADATA_FILE_NAME))?;
    refresh_index(dir);

    if let Some(source) = staged.and_then(|s| s.source_archive.as_ref())
        && source.exists()
    {
        fs::remove_dir_all(source)?;
    }
    Ok(())
}

fn remove_journal(dir: &Path, path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    fsutil::sync_dir(dir);
    Ok(())
}
