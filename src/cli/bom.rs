// src/cli/bom.rs
//! Bill of materials commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum BomCommands {
    /// Hash a content tree
    Generate {
        /// Content directory
        dir: PathBuf,

        /// Write the BOM here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Check a content tree against a BOM
    Verify {
        /// Content directory
        dir: PathBuf,

        /// BOM file
        bom: PathBuf,
    },
}
