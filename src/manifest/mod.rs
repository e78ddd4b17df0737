// src/manifest/mod.rs

//! Host manifests
//!
//! A manifest is a portable, checksummed record of what one managed host has
//! installed: every package (NEVRA plus install time) and the environment
//! facts needed to interpret it. Manifests are captured on the host, carried
//! to the update engine and never mutated; a newer capture supersedes an
//! older one.
//!
//! The installed-package list comes from a [`PackageSource`]; the real one
//! queries the RPM database ([`RpmDbSource`]), tests inject fixed lists.

mod rpmdb;
mod store;

pub use rpmdb::{HostFacts, RPM_QUERY_FORMAT, RpmDbSource};
pub use store::{ManifestStore, ManifestSummary, StoredManifest};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::hash::{ChecksumLine, sha256_bytes};
use crate::version::{Evr, parse_epoch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of a stored manifest
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

fn default_epoch() -> String {
    "0".to_string()
}

/// One installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(default = "default_epoch")]
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    /// Seconds since the epoch; 0 when unknown
    #[serde(default)]
    pub installtime: i64,
}

impl PackageRecord {
    pub fn evr(&self) -> Result<Evr> {
        Evr::from_parts(&self.epoch, &self.version, &self.release)
    }
}

/// Parse one line of `rpm -qa --queryformat` output ([`RPM_QUERY_FORMAT`])
///
/// `name|epoch|version|release|arch|installtime`; an epoch of `(none)` or
/// empty is recorded as `0`.
pub fn parse_rpm_qa_line(line: &str) -> Result<PackageRecord> {
    let parts: Vec<&str> = line.trim().split('|').collect();
    if parts.len() != 6 {
        return Err(Error::ManifestError(format!(
            "expected 6 fields in rpm query line, got {}: {}",
            parts.len(),
            line
        )));
    }
    if parts[0].is_empty() {
        return Err(Error::ManifestError(format!("package without name: {}", line)));
    }
    let epoch = parse_epoch(parts[1])?;
    let installtime = match parts[5].trim() {
        "" | "(none)" => 0,
        raw => raw.parse().map_err(|_| {
            Error::ManifestError(format!("invalid install time '{}' for {}", raw, parts[0]))
        })?,
    };
    Ok(PackageRecord {
        name: parts[0].to_string(),
        epoch: epoch.to_string(),
        version: parts[2].to_string(),
        release: parts[3].to_string(),
        arch: parts[4].to_string(),
        installtime,
    })
}

/// Something that can list installed packages
pub trait PackageSource {
    fn installed_packages(&self) -> Result<Vec<PackageRecord>>;
}

/// `ID` and `VERSION_ID` from os-release
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub id: String,
    pub version: String,
}

/// Everything captured about one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostManifest {
    pub host_id: String,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub os_release: OsRelease,
    pub kernel: String,
    pub arch: String,
    pub packages: Vec<PackageRecord>,
    #[serde(default)]
    pub enabled_repos: Vec<String>,
}

impl HostManifest {
    /// Pretty JSON with a trailing newline; the exact bytes the sidecar covers
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ManifestError(format!("invalid host manifest: {}", e)))
    }

    /// Read a manifest, checking its `.sha256` sidecar when one is present
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            Error::ManifestError(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        let sidecar = sidecar_path(path);
        if sidecar.is_file() {
            let expected = ChecksumLine::parse(&fs::read_to_string(&sidecar)?)?;
            let actual = sha256_bytes(&bytes);
            if expected.hash != actual {
                return Err(Error::ChecksumMismatch {
                    subject: format!("manifest {}", path.display()),
                    paths: vec![path.display().to_string()],
                });
            }
            debug!("Manifest checksum OK for {}", path.display());
        }
        let content = String::from_utf8(bytes)
            .map_err(|_| Error::ManifestError(format!("{} is not UTF-8", path.display())))?;
        Self::from_json(&content)
    }

    /// Write the manifest and its `.sha256` sidecar
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| MANIFEST_FILE_NAME.to_string());
        fsutil::write_atomic(path, json.as_bytes())?;
        let line = ChecksumLine::new(sha256_bytes(json.as_bytes()), file_name);
        fsutil::write_atomic(&sidecar_path(path), line.render().as_bytes())
    }
}

/// `manifest.json` -> `manifest.json.sha256`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Captures a [`HostManifest`] from a package source and host facts
pub struct ManifestBuilder<S: PackageSource> {
    source: S,
    /// Filesystem root facts are read from (`/` outside tests)
    root: PathBuf,
    host_id: Option<String>,
}

impl<S: PackageSource> ManifestBuilder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            root: PathBuf::from("/"),
            host_id: None,
        }
    }

    /// Read os-release, machine-id and repo files under `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Operator-assigned host id; otherwise the machine id is used
    pub fn with_host_id(mut self, host_id: Option<String>) -> Self {
        self.host_id = host_id;
        self
    }

    pub fn capture(&self) -> Result<HostManifest> {
        let facts = HostFacts::collect(&self.root, self.host_id.as_deref())?;
        let mut packages = self.source.installed_packages()?;
        packages.sort_by(|a, b| {
            (a.name.as_str(), a.arch.as_str(), a.version.as_str(), a.release.as_str()).cmp(&(
                b.name.as_str(),
                b.arch.as_str(),
                b.version.as_str(),
                b.release.as_str(),
            ))
        });
        info!(
            "Captured {} packages for host '{}' ({} {})",
            packages.len(),
            facts.host_id,
            facts.os_release.id,
            facts.os_release.version
        );
        Ok(HostManifest {
            host_id: facts.host_id,
            hostname: facts.hostname,
            timestamp: Utc::now(),
            os_release: facts.os_release,
            kernel: facts.kernel,
            arch: facts.arch,
            packages,
            enabled_repos: facts.enabled_repos,
        })
    }
}
