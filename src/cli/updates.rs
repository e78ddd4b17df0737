// src/cli/updates.rs
//! Update computation commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum UpdatesCommands {
    /// Compare host manifests against a channel's packages
    Compute {
        /// Channel to compare against
        #[arg(long)]
        channel: String,

        /// Only these hosts (repeatable; default: every stored host)
        #[arg(long = "host", value_name = "ID")]
        hosts: Vec<String>,

        /// Write per-host reports and summary.json into this directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
}
