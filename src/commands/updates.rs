// src/commands/updates.rs
//! Update computation commands

use super::channel_manager;
use airlock::config::Config;
use airlock::manifest::ManifestStore;
use airlock::updates::{UpdateEngine, write_reports};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Compute updates for stored hosts against a channel
pub fn cmd_updates_compute(
    config: &Config,
    channel: &str,
    hosts: &[String],
    output: Option<&Path>,
) -> Result<()> {
    info!("Computing updates against channel '{}'", channel);
    let store = ManifestStore::new(&config.paths.manifests);
    let channels = channel_manager(config);
    let run = UpdateEngine::new(&store, &channels)
        .run(channel, hosts)
        .with_context(|| format!("Failed to compute updates against '{}'", channel))?;

    for report in &run.reports {
        println!(
            "{} ({}): {} update(s)",
            report.host_id,
            report.hostname,
            report.update_count()
        );
        for update in &report.updates {
            println!(
                "    {}.{}  {} -> {}",
                update.name, update.arch, update.installed, update.available
            );
        }
        for warning in &report.warnings {
            println!("    warning: {}", warning);
        }
    }
    println!(
        "{} host(s), {} with updates, {} update(s) total",
        run.summary.host_count, run.summary.hosts_with_updates, run.summary.total_updates
    );

    if let Some(dir) = output {
        let written = write_reports(&run, dir)
            .with_context(|| format!("Failed to write reports to {}", dir.display()))?;
        println!("Wrote {} report file(s) to {}", written.len(), dir.display());
    }
    Ok(())
}
