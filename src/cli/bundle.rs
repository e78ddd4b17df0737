// src/cli/bundle.rs
//! Bundle commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum BundleCommands {
    /// Package a content tree as a signed bundle
    Create {
        /// Content directory to package
        source: PathBuf,

        /// Bundle name
        #[arg(short, long)]
        name: String,

        /// Armored secret signing key
        #[arg(short, long, value_name = "SECRET")]
        key: PathBuf,

        /// Output directory (default: current directory)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Verify an incoming bundle against the trusted keys
    Verify {
        /// Bundle name
        name: String,

        /// Directory holding the bundle artifacts (default: paths.incoming)
        #[arg(short, long, value_name = "DIR")]
        incoming: Option<PathBuf>,

        /// Run every check without staging the content
        #[arg(long)]
        check_only: bool,
    },
}
