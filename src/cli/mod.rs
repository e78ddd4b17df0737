// src/cli/mod.rs
//! CLI definitions for airlock
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! Connected side:
//! - `bom` - Generate and check bills of materials
//! - `key` - Signing key management
//! - `bundle create` - Package a content tree as a signed bundle
//!
//! Isolated side:
//! - `bundle verify` - Verify an incoming bundle and stage it
//! - `channel` - Lifecycle channels (publish, promote, rollback)
//! - `manifest` - Host manifests (capture on hosts, import centrally)
//! - `updates` - Per-host update reports against a channel

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod bom;
mod bundle;
mod channel;
mod key;
mod manifest;
mod updates;

pub use bom::BomCommands;
pub use bundle::BundleCommands;
pub use channel::ChannelCommands;
pub use key::KeyCommands;
pub use manifest::ManifestCommands;
pub use updates::UpdatesCommands;

#[derive(Parser)]
#[command(name = "airlock")]
#[command(author = "Airlock Contributors")]
#[command(version)]
#[command(about = "Verified bundle transfer and lifecycle channels across an air gap", long_about = None)]
pub struct Cli {
    /// Configuration file (default: /etc/airlock/airlock.toml if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host manifest capture and collection
    #[command(subcommand)]
    Manifest(ManifestCommands),

    /// Bill of materials generation and checking
    #[command(subcommand)]
    Bom(BomCommands),

    /// Signing key management
    #[command(subcommand)]
    Key(KeyCommands),

    /// Bundle packaging and verification
    #[command(subcommand)]
    Bundle(BundleCommands),

    /// Lifecycle channel management
    #[command(subcommand)]
    Channel(ChannelCommands),

    /// Update computation
    #[command(subcommand)]
    Updates(UpdatesCommands),

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
