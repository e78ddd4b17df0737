// src/cli/key.rs
//! Signing key commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Generate a bundle signing key pair
    Generate {
        /// OpenPGP user id, e.g. "Airlock Signing <airlock@example.com>"
        #[arg(long, value_name = "UID")]
        user_id: String,

        /// Where to write the armored secret key (mode 0600)
        #[arg(long, value_name = "FILE")]
        secret: PathBuf,

        /// Where to write the armored public key for the isolated side
        #[arg(long, value_name = "FILE")]
        public: PathBuf,
    },
}
