// src/commands/mod.rs
//! Command implementations for airlock
//!
//! Each handler loads what it needs from the configuration, calls into the
//! library and prints a short human-readable result. Errors propagate as
//! `anyhow::Error` with context; `main` turns them into a non-zero exit.

mod bom;
mod bundle;
mod channel;
mod completions;
mod key;
mod manifest;
mod updates;

pub use bom::{cmd_bom_generate, cmd_bom_verify};
pub use bundle::{cmd_bundle_create, cmd_bundle_verify};
pub use channel::{
    cmd_channel_archives, cmd_channel_create, cmd_channel_list, cmd_channel_promote,
    cmd_channel_publish, cmd_channel_recover, cmd_channel_rollback, cmd_channel_show,
};
pub use completions::cmd_completions;
pub use key::cmd_key_generate;
pub use manifest::{cmd_manifest_capture, cmd_manifest_import, cmd_manifest_list};
pub use updates::cmd_updates_compute;

use airlock::channel::{ChannelManager, OperationOutcome};
use airlock::config::Config;

/// Channel manager rooted at the configured channel directory
fn channel_manager(config: &Config) -> ChannelManager {
    ChannelManager::new(&config.paths.channels, &config.channels)
}

/// Shared output for publish, promote and rollback
fn print_outcome(outcome: &OperationOutcome) {
    for recovered in &outcome.recovered {
        println!("Recovered interrupted operation: {}", recovered);
    }
    if !outcome.changed {
        println!(
            "Channel '{}' already carries '{}'; nothing to do (use --force to republish)",
            outcome.channel, outcome.bundle
        );
        return;
    }
    println!(
        "{} of '{}' into '{}' complete ({} ms)",
        outcome.operation, outcome.bundle, outcome.channel, outcome.duration_ms
    );
    if let Some(id) = &outcome.archive_id {
        println!("  Previous content archived as {}", id);
    }
    match outcome.package_count {
        Some(count) => println!("  Package index: {} packages", count),
        None => println!("  Package index: unavailable"),
    }
    if let airlock::channel::HookOutcome::Failed(reason) = &outcome.hook {
        println!("  WARNING: metadata command failed: {}", reason);
    }
}
