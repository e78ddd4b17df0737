// src/commands/manifest.rs
//! Host manifest commands

use airlock::config::Config;
use airlock::manifest::{ManifestBuilder, ManifestStore, RpmDbSource};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Capture this host's manifest
pub fn cmd_manifest_capture(
    config: &Config,
    output: Option<&Path>,
    host_id: Option<String>,
    store: bool,
) -> Result<()> {
    let host_id = host_id.or_else(|| config.manifest.host_id.clone());
    let manifest = ManifestBuilder::new(RpmDbSource::new())
        .with_host_id(host_id)
        .capture()
        .context("Failed to capture host manifest")?;

    if let Some(path) = output {
        manifest
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!(
            "Wrote manifest for '{}' ({} packages) to {}",
            manifest.host_id,
            manifest.packages.len(),
            path.display()
        );
    }
    if store {
        let stored = ManifestStore::new(&config.paths.manifests)
            .store(&manifest)
            .context("Failed to store manifest")?;
        println!("Stored manifest at {}", stored.path.display());
    }
    if output.is_none() && !store {
        print!("{}", manifest.to_json()?);
    }
    Ok(())
}

/// Import a manifest carried from a host
pub fn cmd_manifest_import(config: &Config, file: &Path) -> Result<()> {
    info!("Importing manifest {}", file.display());
    let stored = ManifestStore::new(&config.paths.manifests)
        .import(file)
        .with_context(|| format!("Failed to import {}", file.display()))?;
    if stored.is_latest {
        println!("Imported manifest for '{}'", stored.host_id);
    } else {
        println!(
            "Manifest for '{}' is older than the stored one; filed as history at {}",
            stored.host_id,
            stored.path.display()
        );
    }
    Ok(())
}

/// List stored hosts
pub fn cmd_manifest_list(config: &Config) -> Result<()> {
    let summaries = ManifestStore::new(&config.paths.manifests).list()?;
    if summaries.is_empty() {
        println!("No manifests in {}", config.paths.manifests.display());
        return Ok(());
    }
    println!("Hosts:");
    for s in summaries {
        println!(
            "  {:<36} {:<24} {:<10} {:>5} packages  captured {}",
            s.host_id,
            s.hostname,
            s.os,
            s.package_count,
            s.timestamp.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
