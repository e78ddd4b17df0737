// src/manifest/store.rs

//! Manifest store
//!
//! Collected manifests are filed per host:
//!
//! ```text
//! <root>/processed/<host_id>/latest/manifest.json
//! <root>/processed/<host_id>/latest/manifest.json.sha256
//! <root>/processed/<host_id>/<capture-timestamp>/manifest.json   superseded
//! ```
//!
//! Importing a newer capture moves the previous `latest` aside under its own
//! capture timestamp; an older capture is filed as history only.

use super::{HostManifest, MANIFEST_FILE_NAME};
use crate::error::{Error, Result, validate_name};
use crate::fsutil;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PROCESSED_DIR_NAME: &str = "processed";
const LATEST_DIR_NAME: &str = "latest";

/// Where an imported manifest ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredManifest {
    pub host_id: String,
    pub path: PathBuf,
    /// Whether it became the host's latest manifest
    pub is_latest: bool,
}

/// One line of `manifest list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSummary {
    pub host_id: String,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub os: String,
    pub package_count: usize,
}

/// Directory of per-host manifests
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR_NAME)
    }

    fn host_dir(&self, host_id: &str) -> Result<PathBuf> {
        validate_name(host_id)?;
        Ok(self.processed_dir().join(host_id))
    }

    /// Path of a host's latest manifest
    pub fn latest_path(&self, host_id: &str) -> Result<PathBuf> {
        Ok(self
            .host_dir(host_id)?
            .join(LATEST_DIR_NAME)
            .join(MANIFEST_FILE_NAME))
    }

    /// Import a manifest file, verifying its sidecar checksum when present
    pub fn import(&self, path: &Path) -> Result<StoredManifest> {
        let manifest = HostManifest::load(path)?;
        self.store(&manifest)
    }

    /// File a manifest under its host
    pub fn store(&self, manifest: &HostManifest) -> Result<StoredManifest> {
        let host_dir = self.host_dir(&manifest.host_id)?;
        fs::create_dir_all(&host_dir)?;
        let latest_dir = host_dir.join(LATEST_DIR_NAME);
        let latest_file = latest_dir.join(MANIFEST_FILE_NAME);

        let current = if latest_file.is_file() {
            match HostManifest::load(&latest_file) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("Existing latest manifest for '{}' unreadable: {}", manifest.host_id, e);
                    None
                }
            }
        } else {
            None
        };

        if let Some(current) = &current
            && manifest.timestamp <= current.timestamp
        {
            // Older (or same) capture: keep latest, file as history
            let dir = unique_dir(&host_dir, &timestamp_name(&manifest.timestamp));
            let path = dir.join(MANIFEST_FILE_NAME);
            manifest.save(&path)?;
            info!(
                "Filed older manifest for '{}' at {}",
                manifest.host_id,
                path.display()
            );
            return Ok(StoredManifest {
                host_id: manifest.host_id.clone(),
                path,
                is_latest: false,
            });
        }

        // Write the new capture beside latest, then rotate
        let incoming = host_dir.join(format!(".incoming-{}", Uuid::new_v4()));
        manifest.save(&incoming.join(MANIFEST_FILE_NAME))?;

        if latest_dir.exists() {
            let name = match &current {
                Some(m) => timestamp_name(&m.timestamp),
                None => format!("unreadable-{}", timestamp_name(&Utc::now())),
            };
            let superseded = unique_dir(&host_dir, &name);
            fs::rename(&latest_dir, &superseded)?;
            debug!("Superseded manifest moved to {}", superseded.display());
        }
        fs::rename(&incoming, &latest_dir)?;
        fsutil::sync_dir(&host_dir);

        info!(
            "Stored manifest for '{}' ({} packages)",
            manifest.host_id,
            manifest.packages.len()
        );
        Ok(StoredManifest {
            host_id: manifest.host_id.clone(),
            path: latest_file,
            is_latest: true,
        })
    }

    /// Latest manifest of a host
    pub fn load_latest(&self, host_id: &str) -> Result<HostManifest> {
        let path = self.latest_path(host_id)?;
        if !path.is_file() {
            return Err(Error::ManifestError(format!(
                "no manifest stored for host '{}'",
                host_id
            )));
        }
        HostManifest::load(&path)
    }

    /// Hosts with a latest manifest, sorted
    pub fn hosts(&self) -> Result<Vec<String>> {
        let dir = self.processed_dir();
        let mut hosts = Vec::new();
        if !dir.is_dir() {
            return Ok(hosts);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.path().join(LATEST_DIR_NAME).join(MANIFEST_FILE_NAME).is_file() {
                hosts.push(name);
            }
        }
        hosts.sort();
        Ok(hosts)
    }

    /// Summaries of every host's latest manifest
    pub fn list(&self) -> Result<Vec<ManifestSummary>> {
        let mut summaries = Vec::new();
        for host in self.hosts()? {
            match self.load_latest(&host) {
                Ok(m) => summaries.push(ManifestSummary {
                    host_id: m.host_id,
                    hostname: m.hostname,
                    timestamp: m.timestamp,
                    os: format!("{} {}", m.os_release.id, m.os_release.version),
                    package_count: m.packages.len(),
                }),
                Err(e) => warn!("Skipping manifest for '{}': {}", host, e),
            }
        }
        Ok(summaries)
    }
}

fn timestamp_name(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `<parent>/<name>`, suffixed until it does not exist
fn unique_dir(parent: &Path, name: &str) -> PathBuf {
    let mut candidate = parent.join(name);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}-{}", name, n));
        n += 1;
    }
    candidate
}
