// src/cli/channel.rs
//! Lifecycle channel commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum ChannelCommands {
    /// Create an empty channel
    Create {
        /// Channel name
        name: String,
    },

    /// List channels
    List,

    /// Show a channel's current bundle, history and health
    Show {
        /// Channel name
        name: String,
    },

    /// List a channel's archived snapshots, most recent first
    Archives {
        /// Channel name
        name: String,
    },

    /// Publish a verified bundle into a channel
    Publish {
        /// Target channel
        channel: String,

        /// Verified bundle name (as staged by `bundle verify`)
        bundle: String,

        /// Republish even if the bundle is already current
        #[arg(long)]
        force: bool,
    },

    /// Copy one channel's current content into another
    Promote {
        /// Source channel
        from: String,

        /// Target channel
        to: String,

        /// Promote even if the target already carries the same bundle
        #[arg(long)]
        force: bool,
    },

    /// Restore an archived snapshot
    Rollback {
        /// Channel name
        channel: String,

        /// Archive id (see `channel archives`)
        archive_id: String,
    },

    /// Resolve an interrupted publish, promote or rollback
    Recover {
        /// Channel name
        name: String,
    },
}
