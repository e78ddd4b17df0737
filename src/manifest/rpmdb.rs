// src/manifest/rpmdb.rs

//! Installed-package and host-fact collection
//!
//! Packages come from the local RPM database via the `rpm` command-line tool.
//! Facts come from `/etc/os-release`, `uname`, the hostname, `*.repo` files
//! and `/etc/machine-id`.

use super::{OsRelease, PackageRecord, PackageSource, parse_rpm_qa_line};
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Query format matching [`parse_rpm_qa_line`]
pub const RPM_QUERY_FORMAT: &str =
    "%{NAME}|%{EPOCH}|%{VERSION}|%{RELEASE}|%{ARCH}|%{INSTALLTIME}\n";

/// Reads installed packages with `rpm -qa`
#[derive(Debug, Default)]
pub struct RpmDbSource {
    /// Alternate RPM database root (`rpm --root`)
    root: Option<String>,
}

impl RpmDbSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl PackageSource for RpmDbSource {
    fn installed_packages(&self) -> Result<Vec<PackageRecord>> {
        debug!("Querying installed RPM packages");

        let mut command = Command::new("rpm");
        if let Some(root) = &self.root {
            command.args(["--root", root]);
        }
        let output = command
            .args(["-qa", "--queryformat", RPM_QUERY_FORMAT])
            .output()
            .map_err(|e| {
                Error::ManifestError(format!("Failed to run rpm: {}. Is rpm installed?", e))
            })?;

        if !output.status.success() {
            return Err(Error::ManifestError(format!(
                "rpm -qa failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let mut packages = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_rpm_qa_line(line) {
                Ok(pkg) => packages.push(pkg),
                Err(e) => warn!("Skipping unparseable rpm entry: {}", e),
            }
        }

        debug!("Found {} installed packages", packages.len());
        Ok(packages)
    }
}

/// Environment facts recorded in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub host_id: String,
    pub hostname: String,
    pub os_release: OsRelease,
    pub kernel: String,
    pub arch: String,
    pub enabled_repos: Vec<String>,
}

impl HostFacts {
    /// Collect facts, reading configuration files under `root`
    pub fn collect(root: &Path, host_id: Option<&str>) -> Result<Self> {
        let os_release = match fs::read_to_string(root.join("etc/os-release")) {
            Ok(content) => parse_os_release(&content),
            Err(e) => {
                warn!("Cannot read os-release: {}", e);
                OsRelease {
                    id: "unknown".to_string(),
                    version: "unknown".to_string(),
                }
            }
        };

        let (kernel, arch) = match nix::sys::utsname::uname() {
            Ok(uts) => (
                uts.release().to_string_lossy().into_owned(),
                uts.machine().to_string_lossy().into_owned(),
            ),
            Err(e) => {
                warn!("uname failed: {}", e);
                ("unknown".to_string(), std::env::consts::ARCH.to_string())
            }
        };

        let hostname = nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|e| {
                warn!("gethostname failed: {}", e);
                "localhost".to_string()
            });

        let host_id = match host_id {
            Some(id) => id.to_string(),
            None => machine_uuid(root).unwrap_or_else(|| {
                let id = Uuid::new_v4().to_string();
                warn!("No machine id available, generated host id {}", id);
                id
            }),
        };

        Ok(Self {
            host_id,
            hostname,
            os_release,
            kernel,
            arch,
            enabled_repos: enabled_repos(&root.join("etc/yum.repos.d")),
        })
    }
}

/// Pull `ID` and `VERSION_ID` out of os-release content
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key {
            "ID" => release.id = value,
            "VERSION_ID" => release.version = value,
            _ => {}
        }
    }
    release
}

/// `/etc/machine-id` formatted as a UUID
fn machine_uuid(root: &Path) -> Option<String> {
    let raw = fs::read_to_string(root.join("etc/machine-id")).ok()?;
    match Uuid::parse_str(raw.trim()) {
        Ok(uuid) => Some(uuid.hyphenated().to_string()),
        Err(e) => {
            warn!("Ignoring malformed machine-id: {}", e);
            None
        }
    }
}

/// Repository ids enabled in `*.repo` files under `dir`
///
/// A section without an `enabled` key counts as enabled, as dnf treats it.
pub fn enabled_repos(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "repo"))
        .collect();
    files.sort();

    let mut repos = Vec::new();
    for file in files {
        match fs::read_to_string(&file) {
            Ok(content) => repos.extend(parse_repo_file(&content)),
            Err(e) => warn!("Cannot read {}: {}", file.display(), e),
        }
    }
    repos.sort();
    repos.dedup();
    repos
}

fn parse_repo_file(content: &str) -> Vec<String> {
    let mut repos = Vec::new();
    let mut current: Option<(String, bool)> = None;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            if let Some((id, true)) = current.take() {
                repos.push(id);
            }
            current = Some((section.trim().to_string(), true));
            continue;
        }
        if let Some((key, value)) = line.split_once('=')
            && key.trim() == "enabled"
            && let Some((_, enabled)) = current.as_mut()
        {
            *enabled = matches!(value.trim(), "1" | "true" | "yes" | "True");
        }
    }
    if let Some((id, true)) = current {
        repos.push(id);
    }
    repos
}
