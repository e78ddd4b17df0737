// src/cli/manifest.rs
//! Host manifest commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ManifestCommands {
    /// Capture this host's installed packages
    Capture {
        /// Write the manifest here (a `.sha256` sidecar is written beside it)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Host id to record instead of the configured one or the machine id
        #[arg(long, value_name = "ID")]
        host_id: Option<String>,

        /// Also file the manifest in the local manifest store
        #[arg(long)]
        store: bool,
    },

    /// Import a carried manifest into the manifest store
    Import {
        /// Manifest file
        file: PathBuf,
    },

    /// List hosts with a stored manifest
    List,
}
