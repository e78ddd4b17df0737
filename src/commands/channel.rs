// src/commands/channel.rs
//! Lifecycle channel commands

use super::{channel_manager, print_outcome};
use airlock::bundle::VerifiedBundle;
use airlock::channel::RecoveryOutcome;
use airlock::config::Config;
use anyhow::{Context, Result};
use tracing::info;

/// Create an empty channel
pub fn cmd_channel_create(config: &Config, name: &str) -> Result<()> {
    info!("Creating channel: {}", name);
    channel_manager(config)
        .create(name)
        .with_context(|| format!("Failed to create channel '{}'", name))?;
    println!("Created channel: {}", name);
    Ok(())
}

/// List channels and what they carry
pub fn cmd_channel_list(config: &Config) -> Result<()> {
    let channels = channel_manager(config).list()?;
    if channels.is_empty() {
        println!("No channels in {}", config.paths.channels.display());
        return Ok(());
    }
    println!("Channels:");
    for meta in channels {
        let current = meta.current_bundle.as_deref().unwrap_or("(empty)");
        println!(
            "  {:<16} {:<32} updated {}",
            meta.channel,
            current,
            meta.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

/// Show one channel in detail
pub fn cmd_channel_show(config: &Config, name: &str) -> Result<()> {
    let status = channel_manager(config)
        .show(name)
        .with_context(|| format!("Failed to read channel '{}'", name))?;
    let meta = &status.metadata;

    println!("Channel: {}", meta.channel);
    println!("  Created:  {}", meta.created.to_rfc3339());
    println!("  Current:  {}", meta.current_bundle.as_deref().unwrap_or("(empty)"));
    println!("  Updated:  {}", meta.last_updated.to_rfc3339());
    println!("  Files:    {} ({} bytes)", status.file_count, status.total_size);
    println!("  Packages: {}", status.package_count);
    println!("  Archives: {}", status.archive_count);
    if status.locked {
        println!("  LOCKED: an operation is in progress");
    }
    if status.interrupted {
        println!("  INTERRUPTED: run `airlock channel recover {}`", meta.channel);
    }
    if !meta.history.is_empty() {
        println!("  History:");
        for entry in &meta.history {
            let from = entry
                .promoted_from
                .as_ref()
                .map(|c| format!(" from {}", c))
                .unwrap_or_default();
            println!(
                "    {} {:<8} {}{}",
                entry.published_at.format("%Y-%m-%d %H:%M:%S"),
                entry.action,
                entry.bundle,
                from
            );
        }
    }
    Ok(())
}

/// List archived snapshots usable for rollback
pub fn cmd_channel_archives(config: &Config, name: &str) -> Result<()> {
    let archives = channel_manager(config)
        .archives(name)
        .with_context(|| format!("Failed to read archives of '{}'", name))?;
    if archives.is_empty() {
        println!("No archives for channel '{}'", name);
        return Ok(());
    }
    println!("Archives of '{}' (most recent first):", name);
    for archive in archives {
        match &archive.snapshot {
            Some(snap) => println!(
                "  {}  {} files, replaced by {} ({})",
                archive.id, snap.file_count, snap.replaced_by, snap.operation
            ),
            None => println!("  {}  (no snapshot record)", archive.id),
        }
    }
    Ok(())
}

/// Publish a staged, verified bundle
pub fn cmd_channel_publish(config: &Config, channel: &str, bundle: &str, force: bool) -> Result<()> {
    info!("Publishing '{}' to channel '{}'", bundle, channel);
    let verified = VerifiedBundle::load(&config.paths.staging, bundle)
        .with_context(|| format!("Bundle '{}' has not been verified", bundle))?;
    let outcome = channel_manager(config)
        .publish(channel, &verified, force)
        .with_context(|| format!("Failed to publish '{}' to '{}'", bundle, channel))?;
    print_outcome(&outcome);
    Ok(())
}

/// Promote one channel's content into another
pub fn cmd_channel_promote(config: &Config, from: &str, to: &str, force: bool) -> Result<()> {
    info!("Promoting channel '{}' to '{}'", from, to);
    let outcome = channel_manager(config)
        .promote(from, to, force)
        .with_context(|| format!("Failed to promote '{}' to '{}'", from, to))?;
    print_outcome(&outcome);
    Ok(())
}

/// Restore an archived snapshot
pub fn cmd_channel_rollback(config: &Config, channel: &str, archive_id: &str) -> Result<()> {
    info!("Rolling back channel '{}' to {}", channel, archive_id);
    let outcome = channel_manager(config)
        .rollback(channel, archive_id)
        .with_context(|| format!("Failed to roll back '{}' to {}", channel, archive_id))?;
    print_outcome(&outcome);
    Ok(())
}

/// Resolve an interrupted operation
pub fn cmd_channel_recover(config: &Config, name: &str) -> Result<()> {
    let outcome = channel_manager(config)
        .recover(name)
        .with_context(|| format!("Failed to recover channel '{}'", name))?;
    match outcome {
        RecoveryOutcome::Clean => println!("Channel '{}' has no interrupted operation", name),
        other => println!("Channel '{}': {}", name, other),
    }
    Ok(())
}
