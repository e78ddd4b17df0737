// src/updates.rs

//! Update computation
//!
//! For each host, every installed package is looked up by name+arch in the
//! channel's package index and compared with RPM ordering. Only strictly
//! newer available builds are reported; equal versions, downgrades and
//! packages the channel does not carry are left out. A version that cannot
//! be parsed costs that one package, not the whole host.

use crate::channel::{ChannelManager, IndexEntry, PackageIndex};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::manifest::{HostManifest, ManifestStore, PackageRecord};
use crate::version::Evr;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the run summary in a report directory
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// One available update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUpdate {
    pub name: String,
    pub arch: String,
    /// Installed EVR, epoch omitted when 0
    pub installed: String,
    pub available: String,
}

/// Updates available to one host from one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUpdateReport {
    pub host_id: String,
    pub hostname: String,
    pub os_id: String,
    pub os_version: String,
    pub channel: String,
    pub computed_at: DateTime<Utc>,
    pub updates: Vec<PackageUpdate>,
    /// Packages skipped because a version could not be parsed, and similar
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl HostUpdateReport {
    pub fn update_count(&self) -> usize {
        self.updates.len()
    }
}

/// Per-host line of the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub host_id: String,
    pub update_count: usize,
    pub warning_count: usize,
}

/// Run-level summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub generated_at: DateTime<Utc>,
    pub channel: String,
    pub host_count: usize,
    pub hosts_with_updates: usize,
    pub total_updates: usize,
    pub hosts: Vec<HostSummary>,
}

/// Reports for every host plus the summary
#[derive(Debug, Clone)]
pub struct UpdateRun {
    pub summary: UpdateSummary,
    pub reports: Vec<HostUpdateReport>,
}

/// Whether `available` is strictly newer than `installed`
pub fn is_update_available(installed: &Evr, available: &Evr) -> bool {
    available > installed
}

/// Compute one host's updates against a channel index
pub fn compute_host(manifest: &HostManifest, index: &PackageIndex, channel: &str) -> HostUpdateReport {
    let mut report = HostUpdateReport {
        host_id: manifest.host_id.clone(),
        hostname: manifest.hostname.clone(),
        os_id: manifest.os_release.id.clone(),
        os_version: manifest.os_release.version.clone(),
        channel: channel.to_string(),
        computed_at: Utc::now(),
        updates: Vec::new(),
        warnings: Vec::new(),
    };
    if manifest.packages.is_empty() {
        report.warnings.push("no packages found in manifest".to_string());
        return report;
    }

    for pkg in &manifest.packages {
        let Some(available) = index.lookup(&pkg.name, &pkg.arch) else {
            continue;
        };
        match compare(pkg, available) {
            Ok(Some(update)) => report.updates.push(update),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Skipping {}.{} for host '{}': {}",
                    pkg.name, pkg.arch, manifest.host_id, e
                );
                report
                    .warnings
                    .push(format!("{}.{}: {}", pkg.name, pkg.arch, e));
            }
        }
    }
    report.updates.sort_by(|a, b| (&a.name, &a.arch).cmp(&(&b.name, &b.arch)));
    report.updates.dedup();
    debug!(
        "Host '{}': {} updates, {} warnings",
        report.host_id,
        report.updates.len(),
        report.warnings.len()
    );
    report
}

fn compare(pkg: &PackageRecord, available: &IndexEntry) -> Result<Option<PackageUpdate>> {
    let installed = pkg.evr()?;
    let candidate = available.evr()?;
    Ok(is_update_available(&installed, &candidate).then(|| PackageUpdate {
        name: pkg.name.clone(),
        arch: pkg.arch.clone(),
        installed: installed.to_string(),
        available: candidate.to_string(),
    }))
}

/// Compute every host in parallel and summarize
pub fn compute_all(manifests: &[HostManifest], index: &PackageIndex, channel: &str) -> UpdateRun {
    let reports: Vec<HostUpdateReport> = manifests
        .par_iter()
        .map(|m| compute_host(m, index, channel))
        .collect();
    let summary = summarize(&reports, channel);
    UpdateRun { summary, reports }
}

/// Build the run summary for a set of host reports
pub fn summarize(reports: &[HostUpdateReport], channel: &str) -> UpdateSummary {
    UpdateSummary {
        generated_at: Utc::now(),
        channel: channel.to_string(),
        host_count: reports.len(),
        hosts_with_updates: reports.iter().filter(|r| r.update_count() > 0).count(),
        total_updates: reports.iter().map(HostUpdateReport::update_count).sum(),
        hosts: reports
            .iter()
            .map(|r| HostSummary {
                host_id: r.host_id.clone(),
                update_count: r.update_count(),
                warning_count: r.warnings.len(),
            })
            .collect(),
    }
}

/// Runs update computation over stored manifests and a channel
pub struct UpdateEngine<'a> {
    store: &'a ManifestStore,
    channels: &'a ChannelManager,
}

impl<'a> UpdateEngine<'a> {
    pub fn new(store: &'a ManifestStore, channels: &'a ChannelManager) -> Self {
        Self { store, channels }
    }

    /// Compute updates from `channel` for the given hosts, or all stored hosts
    ///
    /// A host whose manifest cannot be loaded still gets a report, with the
    /// failure recorded as a warning.
    pub fn run(&self, channel: &str, hosts: &[String]) -> Result<UpdateRun> {
        let index = self.channels.package_index(channel)?;
        let hosts = if hosts.is_empty() {
            self.store.hosts()?
        } else {
            hosts.to_vec()
        };
        if hosts.is_empty() {
            return Err(Error::ManifestError("no host manifests stored".to_string()));
        }
        info!(
            "Computing updates from channel '{}' ({} packages) for {} hosts",
            channel,
            index.len(),
            hosts.len()
        );

        let mut manifests = Vec::new();
        let mut failed = Vec::new();
        for host in &hosts {
            match self.store.load_latest(host) {
                Ok(m) => manifests.push(m),
                Err(e) => {
                    warn!("No usable manifest for host '{}': {}", host, e);
                    failed.push(missing_manifest_report(host, channel, &e));
                }
            }
        }

        let mut run = compute_all(&manifests, &index, channel);
        run.reports.extend(failed);
        run.reports.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        run.summary = summarize(&run.reports, channel);
        Ok(run)
    }
}

fn missing_manifest_report(host: &str, channel: &str, err: &Error) -> HostUpdateReport {
    HostUpdateReport {
        host_id: host.to_string(),
        hostname: String::new(),
        os_id: "unknown".to_string(),
        os_version: "unknown".to_string(),
        channel: channel.to_string(),
        computed_at: Utc::now(),
        updates: Vec::new(),
        warnings: vec![format!("manifest unavailable: {}", err)],
    }
}

/// Write `<host>.json` per host and `summary.json` into `dir`
pub fn write_reports(run: &UpdateRun, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for report in &run.reports {
        let path = dir.join(format!("{}.json", report.host_id));
        fsutil::write_json_atomic(&path, report)?;
        written.push(path);
    }
    let summary = dir.join(SUMMARY_FILE_NAME);
    fsutil::write_json_atomic(&summary, &run.summary)?;
    written.push(summary);
    Ok(written)
}
