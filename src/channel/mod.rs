// src/channel/mod.rs

//! Lifecycle channel manager
//!
//! A channel is a named lifecycle stage ("testing", "stable") holding one
//! active content tree. All mutations go through [`ChannelManager`], which
//! enforces the same ordering for Publish, Promote and Rollback:
//!
//! ```text
//! LOCK -> RECOVER -> STAGE -> VERIFY -> SWAP -> ARCHIVE -> INDEX -> METADATA -> DONE
//!                                                                    ^
//!                                       Point of no return (roll-forward after)
//! ```
//!
//! - The new tree is copied into `.stage-<op>` beside `content/` and checked
//!   against its BOM before anything visible changes.
//! - `content/` is replaced by a single directory exchange, so readers see
//!   either the old tree or the new one.
//! - The replaced tree is filed under `archive/<bundle>-<timestamp>/` with its
//!   BOM and a snapshot record, which is what makes every swap reversible.
//! - `metadata.json` is written last. Every step is journaled; an
//!   interrupted operation is rolled back or forward the next time the
//!   channel is locked.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/<name>/content/               active tree
//! <root>/<name>/metadata.json          channel metadata
//! <root>/<name>/bom.json               BOM of the active tree
//! <root>/<name>/package_index.json     derived package index
//! <root>/<name>/archive/<id>/          content/ + bom.json + snapshot.json
//! <root>/<name>/.lock, .lock.pid, .journal, .stage-<op>/
//! ```

mod hook;
mod index;
mod journal;
mod lock;
mod metadata;
mod recovery;
mod swap;

pub use hook::{HookOutcome, expand_command, run_metadata_command};
pub use index::{INDEX_FILE_NAME, IndexEntry, PACKAGE_CACHE_FILE_NAME, PackageIndex, index_key};
pub use journal::{JOURNAL_FILE_NAME, JournalRecord, Operation, Phase};
pub use lock::{ChannelLock, LOCK_FILE_NAME, PID_FILE_NAME};
pub use metadata::{
    ChannelMetadata, HistoryAction, HistoryEntry, METADATA_FILE_NAME, SNAPSHOT_FILE_NAME,
    SnapshotRecord,
};
pub use recovery::RecoveryOutcome;

use crate::bom::{BOM_FILE_NAME, BillOfMaterials};
use crate::bundle::{CONTENT_DIR_NAME, VerifiedBundle};
use crate::config::ChannelsConfig;
use crate::error::{Error, Result, validate_name};
use crate::fsutil;
use chrono::Utc;
use journal::ChannelJournal;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Directory holding archived snapshots inside a channel
pub const ARCHIVE_DIR_NAME: &str = "archive";

/// Prefix of staging directories beside `content/`
const STAGE_PREFIX: &str = ".stage-";

/// Result of a Publish, Promote or Rollback
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub operation: Operation,
    pub channel: String,
    pub bundle: String,
    /// `false` when the request was an idempotent no-op
    pub changed: bool,
    /// Archive id the replaced content was filed under
    pub archive_id: Option<String>,
    /// Packages in the regenerated index, if it could be built
    pub package_count: Option<usize>,
    pub hook: HookOutcome,
    /// Interrupted operations resolved before this one ran
    pub recovered: Vec<RecoveryOutcome>,
    pub duration_ms: u64,
}

impl OperationOutcome {
    fn unchanged(operation: Operation, channel: &str, bundle: &str) -> Self {
        Self {
            operation,
            channel: channel.to_string(),
            bundle: bundle.to_string(),
            changed: false,
            archive_id: None,
            package_count: None,
            hook: HookOutcome::Skipped,
            recovered: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// An archived snapshot of previous channel content
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub id: String,
    pub dir: PathBuf,
    /// `None` when `snapshot.json` is missing or unreadable
    pub snapshot: Option<SnapshotRecord>,
}

/// Summary of a channel for display
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub metadata: ChannelMetadata,
    pub file_count: usize,
    pub total_size: u64,
    pub package_count: usize,
    pub archive_count: usize,
    pub locked: bool,
    /// A journal from an interrupted operation is waiting for recovery
    pub interrupted: bool,
}

/// What a staged swap installs
struct SwapRequest<'a> {
    operation: Operation,
    bundle: &'a str,
    /// Tree copied into the stage
    source: &'a Path,
    /// BOM the staged copy must match
    expected: &'a BillOfMaterials,
    /// Snapshot consumed by a rollback, removed after commit
    consumed_archive: Option<PathBuf>,
    entry: HistoryEntry,
}

/// Owner of every channel under one root directory
pub struct ChannelManager {
    root: PathBuf,
    history_limit: usize,
    lock_timeout: Duration,
    metadata_command: Option<Vec<String>>,
    prune_verified: bool,
}

impl ChannelManager {
    pub fn new(root: impl Into<PathBuf>, config: &ChannelsConfig) -> Self {
        Self {
            root: root.into(),
            history_limit: config.history_limit,
            lock_timeout: config.lock_timeout(),
            metadata_command: config.metadata_command.clone(),
            prune_verified: config.prune_verified,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a channel, whether or not it exists
    pub fn channel_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Resolve an existing channel
    fn open(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let dir = self.channel_dir(name);
        if dir.join(METADATA_FILE_NAME).is_file() {
            Ok(dir)
        } else {
            Err(Error::ChannelNotFound(name.to_string()))
        }
    }

    /// Create an empty channel
    pub fn create(&self, name: &str) -> Result<ChannelMetadata> {
        validate_name(name)?;
        let dir = self.channel_dir(name);
        if dir.join(METADATA_FILE_NAME).exists() {
            return Err(Error::ChannelExists(name.to_string()));
        }
        fs::create_dir_all(dir.join(ARCHIVE_DIR_NAME))?;
        let metadata = ChannelMetadata::new(name);
        metadata.save(&dir.join(METADATA_FILE_NAME))?;
        info!("Created channel '{}' at {}", name, dir.display());
        Ok(metadata)
    }

    /// Metadata of every channel, sorted by name
    pub fn list(&self) -> Result<Vec<ChannelMetadata>> {
        let mut channels = Vec::new();
        if !self.root.exists() {
            return Ok(channels);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path().join(METADATA_FILE_NAME);
            if entry.file_name().to_string_lossy().starts_with('.') || !path.is_file() {
                continue;
            }
            match ChannelMetadata::load(&path) {
                Ok(meta) => channels.push(meta),
                Err(e) => warn!("Skipping unreadable channel {}: {}", entry.path().display(), e),
            }
        }
        channels.sort_by(|a, b| a.channel.cmp(&b.channel));
        Ok(channels)
    }

    pub fn metadata(&self, name: &str) -> Result<ChannelMetadata> {
        let dir = self.open(name)?;
        ChannelMetadata::load(&dir.join(METADATA_FILE_NAME))
    }

    /// Current state of a channel
    pub fn show(&self, name: &str) -> Result<ChannelStatus> {
        let dir = self.open(name)?;
        let metadata = ChannelMetadata::load(&dir.join(METADATA_FILE_NAME))?;
        let (file_count, total_size) = match self.current_bom(name)? {
            Some(bom) => (bom.len(), bom.total_size()),
            None => (0, 0),
        };
        let package_count = match PackageIndex::load(&dir.join(INDEX_FILE_NAME)) {
            Ok(index) => index.len(),
            Err(_) => 0,
        };
        Ok(ChannelStatus {
            metadata,
            file_count,
            total_size,
            package_count,
            archive_count: self.archives(name)?.len(),
            locked: ChannelLock::is_held(&dir),
            interrupted: ChannelJournal::path_for(&dir).exists(),
        })
    }

    /// BOM of the active tree, `None` for an empty channel
    pub fn current_bom(&self, name: &str) -> Result<Option<BillOfMaterials>> {
        let dir = self.open(name)?;
        let path = dir.join(BOM_FILE_NAME);
        if path.is_file() {
            BillOfMaterials::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Active content directory of a channel
    pub fn content_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.open(name)?.join(CONTENT_DIR_NAME))
    }

    /// Package index of the active tree
    pub fn package_index(&self, name: &str) -> Result<PackageIndex> {
        let dir = self.open(name)?;
        let metadata = ChannelMetadata::load(&dir.join(METADATA_FILE_NAME))?;
        if metadata.is_empty() {
            return Err(Error::ChannelEmpty(name.to_string()));
        }
        let path = dir.join(INDEX_FILE_NAME);
        if path.is_file() {
            PackageIndex::load(&path)
        } else {
            debug!("No stored index for '{}', building from content", name);
            PackageIndex::build(&dir.join(CONTENT_DIR_NAME))
        }
    }

    /// Archived snapshots, most recent first
    pub fn archives(&self, name: &str) -> Result<Vec<ArchiveInfo>> {
        let dir = self.open(name)?;
        let archive_root = dir.join(ARCHIVE_DIR_NAME);
        let mut archives = Vec::new();
        if !archive_root.is_dir() {
            return Ok(archives);
        }
        for entry in fs::read_dir(&archive_root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.join(CONTENT_DIR_NAME).is_dir() {
                debug!("Ignoring incomplete archive {}", path.display());
                continue;
            }
            let snapshot = SnapshotRecord::load(&path.join(SNAPSHOT_FILE_NAME)).ok();
            archives.push(ArchiveInfo {
                id: entry.file_name().to_string_lossy().into_owned(),
                dir: path,
                snapshot,
            });
        }
        archives.sort_by(|a, b| {
            let at = |i: &ArchiveInfo| i.snapshot.as_ref().map(|s| s.archived_at);
            at(b).cmp(&at(a)).then_with(|| b.id.cmp(&a.id))
        });
        Ok(archives)
    }

    /// Resolve an interrupted operation on a channel, if any
    pub fn recover(&self, name: &str) -> Result<RecoveryOutcome> {
        let dir = self.open(name)?;
        let _lock = ChannelLock::acquire(&dir, name, self.lock_timeout)?;
        recovery::recover_channel(&dir, name)
    }

    /// Recovery run at the start of every locked operation
    fn recover_locked(&self, dir: &Path, name: &str) -> Result<Vec<RecoveryOutcome>> {
        let outcome = recovery::recover_channel(dir, name)?;
        if outcome == RecoveryOutcome::Clean {
            Ok(Vec::new())
        } else {
            info!("Channel '{}': {}", name, outcome);
            Ok(vec![outcome])
        }
    }

    /// Make a verified bundle the current content of `channel`
    ///
    /// Publishing the bundle that is already current is a no-op unless
    /// `force` is set; a forced re-publish re-stages the content and records
    /// a new history entry.
    pub fn publish(
        &self,
        channel: &str,
        bundle: &VerifiedBundle,
        force: bool,
    ) -> Result<OperationOutcome> {
        let dir = self.open(channel)?;
        let _lock = ChannelLock::acquire(&dir, channel, self.lock_timeout)?;
        let recovered = self.recover_locked(&dir, channel)?;

        let metadata = ChannelMetadata::load(&dir.join(METADATA_FILE_NAME))?;
        if metadata.current_bundle.as_deref() == Some(bundle.name()) && !force {
            info!(
                "Bundle '{}' is already current in channel '{}', nothing to do",
                bundle.name(),
                channel
            );
            let mut outcome = OperationOutcome::unchanged(Operation::Publish, channel, bundle.name());
            outcome.recovered = recovered;
            return Ok(outcome);
        }

        let source = bundle.content_dir();
        let request = SwapRequest {
            operation: Operation::Publish,
            bundle: bundle.name(),
            source: &source,
            expected: bundle.bom(),
            consumed_archive: None,
            entry: HistoryEntry {
                bundle: bundle.name().to_string(),
                published_at: Utc::now(),
                promoted_from: None,
                action: HistoryAction::Publish,
            },
        };
        let mut outcome = self.apply(&dir, channel, metadata, request)?;
        outcome.recovered = recovered;

        // The channel now holds its own verified copy
        if self.prune_verified {
            match bundle.discard() {
                Ok(()) => debug!("Removed bundle '{}' from verified staging", bundle.name()),
                Err(e) => warn!(
                    "Could not remove bundle '{}' from verified staging: {}",
                    bundle.name(),
                    e
                ),
            }
        }
        Ok(outcome)
    }

    /// Copy the current content of `from` into `to`
    ///
    /// `from` is locked for the duration so its tree cannot change under the
    /// copy, but it is never modified.
    pub fn promote(&self, from: &str, to: &str, force: bool) -> Result<OperationOutcome> {
        if from == to {
            return Err(Error::InvalidOperation(format!(
                "cannot promote channel '{}' onto itself",
                from
            )));
        }
        let from_dir = self.open(from)?;
        let to_dir = self.open(to)?;

        // Fixed order so two opposite promotions cannot deadlock
        let (first, second) = if from < to {
            ((&from_dir, from), (&to_dir, to))
        } else {
            ((&to_dir, to), (&from_dir, from))
        };
        let _first = ChannelLock::acquire(first.0, first.1, self.lock_timeout)?;
        let _second = ChannelLock::acquire(second.0, second.1, self.lock_timeout)?;

        let mut recovered = self.recover_locked(&from_dir, from)?;
        recovered.extend(self.recover_locked(&to_dir, to)?);

        let source_meta = ChannelMetadata::load(&from_dir.join(METADATA_FILE_NAME))?;
        let Some(bundle) = source_meta.current_bundle.clone() else {
            return Err(Error::ChannelEmpty(from.to_string()));
        };
        let expected = BillOfMaterials::load(&from_dir.join(BOM_FILE_NAME))?;

        let metadata = ChannelMetadata::load(&to_dir.join(METADATA_FILE_NAME))?;
        if metadata.current_bundle.as_deref() == Some(bundle.as_str()) && !force {
            info!(
                "Bundle '{}' is already current in channel '{}', nothing to promote",
                bundle, to
            );
            let mut outcome = OperationOutcome::unchanged(Operation::Promote, to, &bundle);
            outcome.recovered = recovered;
            return Ok(outcome);
        }

        let source = from_dir.join(CONTENT_DIR_NAME);
        let request = SwapRequest {
            operation: Operation::Promote,
            bundle: &bundle,
            source: &source,
            expected: &expected,
            consumed_archive: None,
            entry: HistoryEntry {
                bundle: bundle.clone(),
                published_at: Utc::now(),
                promoted_from: Some(from.to_string()),
                action: HistoryAction::Promote,
            },
        };
        let mut outcome = self.apply(&to_dir, to, metadata, request)?;
        outcome.recovered = recovered;
        Ok(outcome)
    }

    /// Restore an archived snapshot as the current content of `channel`
    ///
    /// The snapshot is consumed and the content it replaces is archived in
    /// turn, so rolling back is itself reversible.
    pub fn rollback(&self, channel: &str, archive_id: &str) -> Result<OperationOutcome> {
        let dir = self.open(channel)?;
        let not_found = || Error::ArchiveNotFound {
            channel: channel.to_string(),
            archive: archive_id.to_string(),
        };
        validate_name(archive_id).map_err(|_| not_found())?;

        let _lock = ChannelLock::acquire(&dir, channel, self.lock_timeout)?;
        let recovered = self.recover_locked(&dir, channel)?;

        let archive_dir = dir.join(ARCHIVE_DIR_NAME).join(archive_id);
        if !archive_dir.join(CONTENT_DIR_NAME).is_dir() {
            return Err(not_found());
        }
        let snapshot = SnapshotRecord::load(&archive_dir.join(SNAPSHOT_FILE_NAME))?;
        let expected = BillOfMaterials::load(&archive_dir.join(BOM_FILE_NAME))?;
        let metadata = ChannelMetadata::load(&dir.join(METADATA_FILE_NAME))?;

        let source = archive_dir.join(CONTENT_DIR_NAME);
        let request = SwapRequest {
            operation: Operation::Rollback,
            bundle: &snapshot.bundle,
            source: &source,
            expected: &expected,
            consumed_archive: Some(archive_dir.clone()),
            entry: HistoryEntry {
                bundle: snapshot.bundle.clone(),
                published_at: Utc::now(),
                promoted_from: None,
                action: HistoryAction::Rollback,
            },
        };
        let mut outcome = self.apply(&dir, channel, metadata, request)?;
        outcome.recovered = recovered;
        Ok(outcome)
    }

    /// Run one journaled staged swap; the channel lock must be held
    fn apply(
        &self,
        dir: &Path,
        channel: &str,
        metadata: ChannelMetadata,
        request: SwapRequest<'_>,
    ) -> Result<OperationOutcome> {
        let started = Instant::now();
        let op_id = Uuid::new_v4().to_string();
        info!(
            "Starting {} of '{}' into channel '{}' ({})",
            request.operation, request.bundle, channel, op_id
        );

        let mut journal = ChannelJournal::create(dir)?;
        let result = self.run_swap(dir, channel, &op_id, metadata, &request, &mut journal, started);
        let mut outcome = match result {
            Ok(outcome) => {
                journal.finish()?;
                outcome
            }
            Err(e) => {
                drop(journal);
                warn!("{} of '{}' into '{}' failed: {}", request.operation, request.bundle, channel, e);
                match recovery::recover_channel(dir, channel) {
                    Ok(recovered) => info!("Channel '{}': {}", channel, recovered),
                    Err(re) => error!("Channel '{}' needs recovery: {}", channel, re),
                }
                return Err(e);
            }
        };

        let content = dir.join(CONTENT_DIR_NAME);
        outcome.hook = run_metadata_command(self.metadata_command.as_deref(), &content);
        if outcome.hook == HookOutcome::Succeeded {
            // The command writes repository metadata into the tree
            refresh_bom(dir, channel);
        }
        info!(
            "Channel '{}' now at '{}' ({} in {}ms)",
            channel, request.bundle, request.operation, outcome.duration_ms
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_swap(
        &self,
        dir: &Path,
        channel: &str,
        op_id: &str,
        mut metadata: ChannelMetadata,
        request: &SwapRequest<'_>,
        journal: &mut ChannelJournal,
        started: Instant,
    ) -> Result<OperationOutcome> {
        journal.write(&JournalRecord::Begin {
            op_id: op_id.to_string(),
            operation: request.operation,
            channel: channel.to_string(),
            bundle: request.bundle.to_string(),
            timestamp: Utc::now(),
        })?;

        // Stage
        let stage_name = format!("{}{}", STAGE_PREFIX, op_id);
        let stage_dir = dir.join(&stage_name);
        let stage_inode = match stage_tree(request, &stage_dir) {
            Ok(inode) => inode,
            Err(e) => {
                let _ = fs::remove_dir_all(&stage_dir);
                return Err(e);
            }
        };

        let content = dir.join(CONTENT_DIR_NAME);
        let had_previous = content.exists();
        let archive_id = if had_previous {
            Some(next_archive_id(dir, metadata.current_bundle.as_deref()))
        } else {
            None
        };
        let archive_rel = archive_id
            .as_ref()
            .map(|id| Path::new(ARCHIVE_DIR_NAME).join(id));
        journal.write(&JournalRecord::Staged {
            stage_dir: PathBuf::from(&stage_name),
            stage_inode,
            archive_dir: archive_rel.clone(),
            source_archive: request
                .consumed_archive
                .as_ref()
                .and_then(|p| p.strip_prefix(dir).ok())
                .map(Path::to_path_buf),
        })?;

        // Swap
        let swapped = if had_previous {
            swap::exchange(&stage_dir, &content)
        } else {
            fs::rename(&stage_dir, &content)
        };
        if let Err(e) = swapped {
            let _ = fs::remove_dir_all(&stage_dir);
            return Err(Error::IoError(format!(
                "failed to swap {} into {}: {}",
                stage_dir.display(),
                content.display(),
                e
            )));
        }
        fsutil::sync_dir(dir);
        journal.write(&JournalRecord::Swapped { had_previous })?;

        // Archive the replaced tree
        if let Some(archive_rel) = &archive_rel {
            let archive_dir = dir.join(archive_rel);
            archive_previous(dir, &stage_dir, &archive_dir, &metadata, request)?;
            journal.write(&JournalRecord::Archived {
                archive_dir: archive_rel.clone(),
            })?;
        }

        let package_count = refresh_index(dir);

        // Commit
        metadata.record(request.entry.clone(), self.history_limit);
        journal.write(&JournalRecord::MetadataIntent {
            metadata: metadata.clone(),
        })?;
        request.expected.save(&dir.join(BOM_FILE_NAME))?;
        metadata.save(&dir.join(METADATA_FILE_NAME))?;

        if let Some(consumed) = &request.consumed_archive
            && let Err(e) = fs::remove_dir_all(consumed)
        {
            warn!("Could not remove restored archive {}: {}", consumed.display(), e);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        journal.write(&JournalRecord::Done { duration_ms })?;

        Ok(OperationOutcome {
            operation: request.operation,
            channel: channel.to_string(),
            bundle: request.bundle.to_string(),
            changed: true,
            archive_id,
            package_count,
            hook: HookOutcome::Skipped,
            recovered: Vec::new(),
            duration_ms,
        })
    }
}

/// Copy the source tree into `stage_dir`, verify it, return its inode
fn stage_tree(request: &SwapRequest<'_>, stage_dir: &Path) -> Result<u64> {
    debug!(
        "Staging {} into {}",
        request.source.display(),
        stage_dir.display()
    );
    fsutil::copy_tree(request.source, stage_dir)?;
    request.expected.verify_tree(stage_dir, request.bundle)?;
    Ok(fs::metadata(stage_dir)?.ino())
}

/// File the tree now at `stage_dir` under `archive_dir`
fn archive_previous(
    dir: &Path,
    stage_dir: &Path,
    archive_dir: &Path,
    metadata: &ChannelMetadata,
    request: &SwapRequest<'_>,
) -> Result<()> {
    fs::create_dir_all(archive_dir)?;
    let bom = match BillOfMaterials::load(&dir.join(BOM_FILE_NAME)) {
        Ok(bom) => bom,
        Err(e) => {
            warn!("Channel BOM unavailable ({}), regenerating for archive", e);
            BillOfMaterials::generate(stage_dir)?
        }
    };
    bom.save(&archive_dir.join(BOM_FILE_NAME))?;
    SnapshotRecord {
        bundle: metadata
            .current_bundle
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        channel: metadata.channel.clone(),
        archived_at: Utc::now(),
        replaced_by: request.bundle.to_string(),
        operation: request.operation.to_string(),
        file_count: bom.len(),
        total_size: bom.total_size(),
    }
    .save(&archive_dir.join(SNAPSHOT_FILE_NAME))?;
    fs::rename(stage_dir, archive_dir.join(CONTENT_DIR_NAME))?;
    fsutil::sync_dir(archive_dir);
    debug!("Archived previous content to {}", archive_dir.display());
    Ok(())
}

/// `<bundle>-<timestamp>`, suffixed if that name is already taken
fn next_archive_id(dir: &Path, previous: Option<&str>) -> String {
    let base = format!(
        "{}-{}",
        previous.unwrap_or("unknown"),
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
    );
    let archive_root = dir.join(ARCHIVE_DIR_NAME);
    let mut id = base.clone();
    let mut n = 1;
    while archive_root.join(&id).exists() {
        id = format!("{}-{}", base, n);
        n += 1;
    }
    id
}

/// Rebuild `package_index.json` for the active tree
///
/// The index is derived data; failure leaves no index rather than a stale one.
fn refresh_index(dir: &Path) -> Option<usize> {
    let content = dir.join(CONTENT_DIR_NAME);
    let path = dir.join(INDEX_FILE_NAME);
    if !content.is_dir() {
        let _ = fs::remove_file(&path);
        return None;
    }
    match PackageIndex::build(&content).and_then(|index| index.save(&path).map(|_| index.len())) {
        Ok(count) => {
            debug!("Indexed {} packages in {}", count, dir.display());
            Some(count)
        }
        Err(e) => {
            warn!("Could not rebuild package index for {}: {}", dir.display(), e);
            let _ = fs::remove_file(&path);
            None
        }
    }
}

/// Rewrite `bom.json` from the active tree after a metadata command ran
///
/// A failure leaves the old BOM; the next promotion or rollback from this
/// channel then fails its copy verification instead of spreading a tree
/// nobody hashed.
fn refresh_bom(dir: &Path, channel: &str) {
    let content = dir.join(CONTENT_DIR_NAME);
    match BillOfMaterials::generate(&content).and_then(|bom| bom.save(&dir.join(BOM_FILE_NAME))) {
        Ok(()) => debug!("Refreshed BOM of '{}' after metadata command", channel),
        Err(e) => warn!("Could not refresh BOM of '{}': {}", channel, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{VERIFIED_FILE_NAME, VerificationRecord};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        staging: PathBuf,
        manager: ChannelManager,
    }

    fn fixture() -> Fixture {
        fixture_with(ChannelsConfig {
            history_limit: 3,
            lock_timeout_secs: 0,
            metadata_command: None,
            prune_verified: false,
        })
    }

    fn fixture_with(config: ChannelsConfig) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("verified");
        let manager = ChannelManager::new(tmp.path().join("channels"), &config);
        Fixture {
            _tmp: tmp,
            staging,
            manager,
        }
    }

    /// Lay out a verified bundle the way the verifier leaves it
    fn verified(staging: &Path, name: &str, files: &[(&str, &str)]) -> VerifiedBundle {
        let root = staging.join(name);
        let content = root.join(CONTENT_DIR_NAME);
        for (path, data) in files {
            let path = content.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
        fs::create_dir_all(&content).unwrap();
        let bom = BillOfMaterials::generate(&content).unwrap();
        bom.save(&root.join(BOM_FILE_NAME)).unwrap();
        let record = VerificationRecord {
            bundle: name.to_string(),
            verified_at: Utc::now(),
            archive_sha256: "0".repeat(64),
            signer: "test".to_string(),
            file_count: bom.len(),
            total_size: bom.total_size(),
        };
        fs::write(
            root.join(VERIFIED_FILE_NAME),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();
        VerifiedBundle::load(staging, name).unwrap()
    }

    fn read(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_create_and_list() {
        let f = fixture();
        f.manager.create("testing").unwrap();
        f.manager.create("stable").unwrap();
        assert!(matches!(
            f.manager.create("stable"),
            Err(Error::ChannelExists(_))
        ));
        assert!(matches!(
            f.manager.create("../escape"),
            Err(Error::InvalidName(_))
        ));

        let names: Vec<_> = f.manager.list().unwrap().into_iter().map(|m| m.channel).collect();
        assert_eq!(names, vec!["stable", "testing"]);
        assert!(f.manager.metadata("stable").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_channel() {
        let f = fixture();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "a")]);
        assert!(matches!(
            f.manager.publish("nope", &b1, false),
            Err(Error::ChannelNotFound(_))
        ));
        assert!(matches!(f.manager.show("nope"), Err(Error::ChannelNotFound(_))));
    }

    #[test]
    fn test_publish_into_empty_channel() {
        let f = fixture();
        f.manager.create("testing").unwrap();
        let b1 = verified(&f.staging, "b1", &[("repo/a.txt", "alpha"), ("b.txt", "beta")]);

        let outcome = f.manager.publish("testing", &b1, false).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.archive_id, None);

        let content = f.manager.content_dir("testing").unwrap();
        assert_eq!(read(content.join("repo/a.txt")), "alpha");
        let meta = f.manager.metadata("testing").unwrap();
        assert_eq!(meta.current_bundle.as_deref(), Some("b1"));
        assert_eq!(meta.history.len(), 1);
        assert_eq!(f.manager.current_bom("testing").unwrap().unwrap(), *b1.bom());

        // Staging is left intact with pruning off
        assert!(b1.content_dir().join("b.txt").exists());
        // No journal or stage left behind
        let dir = f.manager.channel_dir("testing");
        assert!(!dir.join(JOURNAL_FILE_NAME).exists());
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGE_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_publish_archives_previous_content() {
        let f = fixture();
        f.manager.create("testing").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        f.manager.publish("testing", &b1, false).unwrap();
        let outcome = f.manager.publish("testing", &b2, false).unwrap();

        let archive_id = outcome.archive_id.unwrap();
        assert!(archive_id.starts_with("b1-"));
        let archives = f.manager.archives("testing").unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].id, archive_id);
        let snapshot = archives[0].snapshot.as_ref().unwrap();
        assert_eq!(snapshot.bundle, "b1");
        assert_eq!(snapshot.replaced_by, "b2");
        assert_eq!(read(archives[0].dir.join("content/a.txt")), "one");
        assert_eq!(
            BillOfMaterials::load(&archives[0].dir.join(BOM_FILE_NAME)).unwrap(),
            *b1.bom()
        );
        assert_eq!(read(f.manager.content_dir("testing").unwrap().join("a.txt")), "two");
    }

    #[test]
    fn test_republish_is_noop_unless_forced() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        f.manager.publish("stable", &b1, false).unwrap();
        let before = f.manager.metadata("stable").unwrap();

        let outcome = f.manager.publish("stable", &b1, false).unwrap();
        assert!(!outcome.changed);
        assert_eq!(f.manager.metadata("stable").unwrap(), before);
        assert!(f.manager.archives("stable").unwrap().is_empty());

        let outcome = f.manager.publish("stable", &b1, true).unwrap();
        assert!(outcome.changed);
        let after = f.manager.metadata("stable").unwrap();
        assert_eq!(after.current_bundle.as_deref(), Some("b1"));
        assert_eq!(after.history.len(), 2);
    }

    #[test]
    fn test_committed_publish_prunes_verified_bundle() {
        let f = fixture_with(ChannelsConfig {
            history_limit: 3,
            lock_timeout_secs: 0,
            metadata_command: None,
            prune_verified: true,
        });
        f.manager.create("testing").unwrap();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);

        let outcome = f.manager.publish("testing", &b1, false).unwrap();
        assert!(outcome.changed);
        assert!(!f.staging.join("b1").exists());
        assert!(crate::bundle::list_verified(&f.staging).unwrap().is_empty());
        assert_eq!(read(f.manager.content_dir("testing").unwrap().join("a.txt")), "one");

        // A publish that fails keeps the staged bundle
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        fs::write(b2.content_dir().join("a.txt"), "tampered").unwrap();
        assert!(f.manager.publish("testing", &b2, false).is_err());
        assert!(f.staging.join("b2").is_dir());

        // So does an idempotent no-op
        let b3 = verified(&f.staging, "b3", &[("a.txt", "three")]);
        f.manager.publish("stable", &b3, false).unwrap();
        let again = verified(&f.staging, "b3", &[("a.txt", "three")]);
        assert!(!f.manager.publish("stable", &again, false).unwrap().changed);
        assert!(f.staging.join("b3").is_dir());
    }

    #[test]
    fn test_history_bounded() {
        let f = fixture();
        f.manager.create("testing").unwrap();
        for i in 0..5 {
            let name = format!("b{}", i);
            let bundle = verified(&f.staging, &name, &[("a.txt", &name)]);
            f.manager.publish("testing", &bundle, false).unwrap();
        }
        let meta = f.manager.metadata("testing").unwrap();
        let bundles: Vec<_> = meta.history.iter().map(|h| h.bundle.as_str()).collect();
        assert_eq!(bundles, vec!["b4", "b3", "b2"]);
    }

    #[test]
    fn test_tampered_staging_is_rejected() {
        let f = fixture();
        f.manager.create("testing").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        f.manager.publish("testing", &b1, false).unwrap();

        let b2 = verified(&f.staging, "b2", &[("a.txt", "two"), ("c.txt", "three")]);
        fs::write(b2.content_dir().join("c.txt"), "tampered").unwrap();

        let err = f.manager.publish("testing", &b2, false).unwrap_err();
        match err {
            Error::ChecksumMismatch { paths, .. } => assert_eq!(paths, vec!["c.txt"]),
            other => panic!("unexpected error: {:?}", other),
        }
        let meta = f.manager.metadata("testing").unwrap();
        assert_eq!(meta.current_bundle.as_deref(), Some("b1"));
        assert_eq!(read(f.manager.content_dir("testing").unwrap().join("a.txt")), "one");
        assert!(!f.manager.channel_dir("testing").join(JOURNAL_FILE_NAME).exists());
    }

    #[test]
    fn test_promote_and_rollback() {
        let f = fixture();
        f.manager.create("testing").unwrap();
        f.manager.create("stable").unwrap();
        let b0 = verified(&f.staging, "b0", &[("a.txt", "zero")]);
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one"), ("sub/x", "x")]);
        f.manager.publish("stable", &b0, false).unwrap();
        f.manager.publish("testing", &b1, false).unwrap();
        let stable_before = BillOfMaterials::generate(&f.manager.content_dir("stable").unwrap()).unwrap();

        let outcome = f.manager.promote("testing", "stable", false).unwrap();
        assert!(outcome.changed);
        let meta = f.manager.metadata("stable").unwrap();
        assert_eq!(meta.current_bundle.as_deref(), Some("b1"));
        assert_eq!(meta.history[0].promoted_from.as_deref(), Some("testing"));
        assert_eq!(meta.history[0].action, HistoryAction::Promote);
        // Source untouched
        assert_eq!(f.manager.metadata("testing").unwrap().history.len(), 1);

        let archive_id = outcome.archive_id.unwrap();
        let outcome = f.manager.rollback("stable", &archive_id).unwrap();
        assert_eq!(outcome.bundle, "b0");
        let restored = BillOfMaterials::generate(&f.manager.content_dir("stable").unwrap()).unwrap();
        assert_eq!(restored, stable_before);

        let meta = f.manager.metadata("stable").unwrap();
        assert_eq!(meta.current_bundle.as_deref(), Some("b0"));
        assert_eq!(meta.history[0].action, HistoryAction::Rollback);

        // The snapshot was consumed and the promoted tree archived in its place
        let archives = f.manager.archives("stable").unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].snapshot.as_ref().unwrap().bundle, "b1");
    }

    #[test]
    fn test_promote_errors() {
        let f = fixture();
        f.manager.create("testing").unwrap();
        f.manager.create("stable").unwrap();
        assert!(matches!(
            f.manager.promote("testing", "stable", false),
            Err(Error::ChannelEmpty(_))
        ));
        assert!(matches!(
            f.manager.promote("testing", "testing", false),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            f.manager.rollback("stable", "b1-missing"),
            Err(Error::ArchiveNotFound { .. })
        ));
        assert!(matches!(
            f.manager.rollback("stable", "../../etc"),
            Err(Error::ArchiveNotFound { .. })
        ));
    }

    #[test]
    fn test_locked_channel_is_conflict() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let dir = f.manager.channel_dir("stable");
        let _held = ChannelLock::acquire(&dir, "stable", Duration::ZERO).unwrap();

        assert!(matches!(
            f.manager.publish("stable", &b1, false),
            Err(Error::PromotionConflict { .. })
        ));
        assert!(f.manager.metadata("stable").unwrap().is_empty());
        assert!(f.manager.show("stable").unwrap().locked);
    }

    #[test]
    fn test_index_and_hook() {
        let f = fixture_with(ChannelsConfig {
            history_limit: 5,
            lock_timeout_secs: 0,
            metadata_command: Some(vec!["false".to_string(), "{dir}".to_string()]),
            prune_verified: false,
        });
        f.manager.create("stable").unwrap();
        let b1 = verified(
            &f.staging,
            "b1",
            &[
                ("Packages/bash-5.1.8-9.el9.x86_64.rpm", "x"),
                ("Packages/openssl-3.0.7-27.el9.x86_64.rpm", "x"),
            ],
        );
        let outcome = f.manager.publish("stable", &b1, false).unwrap();
        assert_eq!(outcome.package_count, Some(2));
        // Hook failure does not undo the publish
        assert!(outcome.hook.is_failure());
        assert_eq!(
            f.manager.metadata("stable").unwrap().current_bundle.as_deref(),
            Some("b1")
        );

        let index = f.manager.package_index("stable").unwrap();
        assert_eq!(index.lookup("bash", "x86_64").unwrap().release, "9.el9");
        let status = f.manager.show("stable").unwrap();
        assert_eq!(status.package_count, 2);
        assert_eq!(status.file_count, 2);
        assert!(!status.interrupted);
    }

    /// Replay the first steps of a publish by hand, then stop as a crash would
    fn interrupted_publish(
        f: &Fixture,
        channel: &str,
        bundle: &VerifiedBundle,
        through: Phase,
    ) -> PathBuf {
        let dir = f.manager.channel_dir(channel);
        let op_id = Uuid::new_v4().to_string();
        let stage_name = format!("{}{}", STAGE_PREFIX, op_id);
        let stage_dir = dir.join(&stage_name);
        let mut journal = ChannelJournal::create(&dir).unwrap();
        journal
            .write(&JournalRecord::Begin {
                op_id,
                operation: Operation::Publish,
                channel: channel.to_string(),
                bundle: bundle.name().to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();
        fsutil::copy_tree(&bundle.content_dir(), &stage_dir).unwrap();
        let mut metadata = ChannelMetadata::load(&dir.join(METADATA_FILE_NAME)).unwrap();
        let archive_rel = Path::new(ARCHIVE_DIR_NAME)
            .join(next_archive_id(&dir, metadata.current_bundle.as_deref()));
        journal
            .write(&JournalRecord::Staged {
                stage_dir: PathBuf::from(&stage_name),
                stage_inode: fs::metadata(&stage_dir).unwrap().ino(),
                archive_dir: Some(archive_rel.clone()),
                source_archive: None,
            })
            .unwrap();
        if through == Phase::Staged {
            return stage_dir;
        }

        swap::exchange(&stage_dir, &dir.join(CONTENT_DIR_NAME)).unwrap();
        if through == Phase::Swapped {
            // Crash before the Swapped record reached the journal
            return stage_dir;
        }
        journal.write(&JournalRecord::Swapped { had_previous: true }).unwrap();
        fs::create_dir_all(dir.join(&archive_rel)).unwrap();
        fs::rename(&stage_dir, dir.join(&archive_rel).join(CONTENT_DIR_NAME)).unwrap();
        journal
            .write(&JournalRecord::Archived {
                archive_dir: archive_rel,
            })
            .unwrap();
        if through == Phase::Archived {
            return stage_dir;
        }

        metadata.record(
            HistoryEntry {
                bundle: bundle.name().to_string(),
                published_at: Utc::now(),
                promoted_from: None,
                action: HistoryAction::Publish,
            },
            10,
        );
        journal
            .write(&JournalRecord::MetadataIntent { metadata })
            .unwrap();
        stage_dir
    }

    #[test]
    fn test_recover_before_swap_keeps_content() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        f.manager.publish("stable", &b1, false).unwrap();

        let stage = interrupted_publish(&f, "stable", &b2, Phase::Staged);
        assert!(f.manager.show("stable").unwrap().interrupted);
        match f.manager.recover("stable").unwrap() {
            RecoveryOutcome::RolledBack {
                content_restored,
                orphaned,
                ..
            } => {
                assert!(!content_restored);
                assert_eq!(orphaned.as_deref(), Some(stage.as_path()));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(read(f.manager.content_dir("stable").unwrap().join("a.txt")), "one");
        assert_eq!(f.manager.recover("stable").unwrap(), RecoveryOutcome::Clean);
    }

    #[test]
    fn test_recover_after_unjournaled_swap_rolls_back() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        f.manager.publish("stable", &b1, false).unwrap();

        let stage = interrupted_publish(&f, "stable", &b2, Phase::Swapped);
        assert_eq!(read(f.manager.content_dir("stable").unwrap().join("a.txt")), "two");

        let outcome = f.manager.recover("stable").unwrap();
        assert!(matches!(
            outcome,
            RecoveryOutcome::RolledBack {
                content_restored: true,
                ..
            }
        ));
        assert_eq!(read(f.manager.content_dir("stable").unwrap().join("a.txt")), "one");
        // The new tree is left orphaned for manual cleanup
        assert_eq!(read(stage.join("a.txt")), "two");
        assert_eq!(
            f.manager.metadata("stable").unwrap().current_bundle.as_deref(),
            Some("b1")
        );
    }

    #[test]
    fn test_recover_restores_tree_parked_by_rename_fallback() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        f.manager.publish("stable", &b1, false).unwrap();

        // Rename fallback cut short before its last step
        let stage = interrupted_publish(&f, "stable", &b2, Phase::Staged);
        let dir = f.manager.channel_dir("stable");
        let content = dir.join(CONTENT_DIR_NAME);
        let parked = dir.join(format!("{}{}", swap::PARKED_PREFIX, Uuid::new_v4()));
        fs::rename(&content, &parked).unwrap();
        fs::rename(&stage, &content).unwrap();

        let outcome = f.manager.recover("stable").unwrap();
        assert!(matches!(
            outcome,
            RecoveryOutcome::RolledBack {
                content_restored: true,
                ..
            }
        ));
        assert_eq!(read(content.join("a.txt")), "one");
        assert!(!parked.exists());
        assert_eq!(read(stage.join("a.txt")), "two");
        assert_eq!(
            f.manager.metadata("stable").unwrap().current_bundle.as_deref(),
            Some("b1")
        );
    }

    #[test]
    fn test_recover_restores_parked_tree_when_content_missing() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        f.manager.publish("stable", &b1, false).unwrap();

        // Only the first rename of the fallback happened
        let stage = interrupted_publish(&f, "stable", &b2, Phase::Staged);
        let dir = f.manager.channel_dir("stable");
        let parked = dir.join(format!("{}{}", swap::PARKED_PREFIX, Uuid::new_v4()));
        fs::rename(dir.join(CONTENT_DIR_NAME), &parked).unwrap();

        match f.manager.recover("stable").unwrap() {
            RecoveryOutcome::RolledBack {
                content_restored,
                orphaned,
                ..
            } => {
                assert!(content_restored);
                assert_eq!(orphaned.as_deref(), Some(stage.as_path()));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(read(f.manager.content_dir("stable").unwrap().join("a.txt")), "one");
        assert!(!parked.exists());
    }

    #[test]
    fn test_recover_after_archive_rolls_back() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        f.manager.publish("stable", &b1, false).unwrap();

        interrupted_publish(&f, "stable", &b2, Phase::Archived);
        // The next publish resolves the interrupted one first
        let b3 = verified(&f.staging, "b3", &[("a.txt", "three")]);
        let outcome = f.manager.publish("stable", &b3, false).unwrap();
        assert_eq!(outcome.recovered.len(), 1);
        assert!(outcome.archive_id.unwrap().starts_with("b1-"));

        let archives = f.manager.archives("stable").unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(read(archives[0].dir.join("content/a.txt")), "one");
    }

    #[test]
    fn test_recover_after_metadata_intent_rolls_forward() {
        let f = fixture();
        f.manager.create("stable").unwrap();
        let b1 = verified(&f.staging, "b1", &[("a.txt", "one")]);
        let b2 = verified(&f.staging, "b2", &[("a.txt", "two")]);
        f.manager.publish("stable", &b1, false).unwrap();

        interrupted_publish(&f, "stable", &b2, Phase::MetadataIntent);
        assert!(matches!(
            f.manager.recover("stable").unwrap(),
            RecoveryOutcome::RolledForward { .. }
        ));
        let meta = f.manager.metadata("stable").unwrap();
        assert_eq!(meta.current_bundle.as_deref(), Some("b2"));
        assert_eq!(f.manager.current_bom("stable").unwrap().unwrap(), *b2.bom());
        assert_eq!(f.manager.archives("stable").unwrap().len(), 1);
    }
}
