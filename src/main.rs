// src/main.rs

use airlock::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{
    BomCommands, BundleCommands, ChannelCommands, Cli, Commands, KeyCommands, ManifestCommands,
    UpdatesCommands,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Completions need no configuration
    if let Commands::Completions { shell } = &cli.command {
        return commands::cmd_completions(*shell);
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Manifest(cmd) => match cmd {
            ManifestCommands::Capture {
                output,
                host_id,
                store,
            } => commands::cmd_manifest_capture(&config, output.as_deref(), host_id, store),
            ManifestCommands::Import { file } => commands::cmd_manifest_import(&config, &file),
            ManifestCommands::List => commands::cmd_manifest_list(&config),
        },

        Commands::Bom(cmd) => match cmd {
            BomCommands::Generate { dir, output } => {
                commands::cmd_bom_generate(&dir, output.as_deref())
            }
            BomCommands::Verify { dir, bom } => commands::cmd_bom_verify(&dir, &bom),
        },

        Commands::Key(cmd) => match cmd {
            KeyCommands::Generate {
                user_id,
                secret,
                public,
            } => commands::cmd_key_generate(&user_id, &secret, &public),
        },

        Commands::Bundle(cmd) => match cmd {
            BundleCommands::Create {
                source,
                name,
                key,
                output,
            } => commands::cmd_bundle_create(&source, &name, &key, output.as_deref()),
            BundleCommands::Verify {
                name,
                incoming,
                check_only,
            } => commands::cmd_bundle_verify(&config, &name, incoming.as_deref(), check_only),
        },

        Commands::Channel(cmd) => match cmd {
            ChannelCommands::Create { name } => commands::cmd_channel_create(&config, &name),
            ChannelCommands::List => commands::cmd_channel_list(&config),
            ChannelCommands::Show { name } => commands::cmd_channel_show(&config, &name),
            ChannelCommands::Archives { name } => commands::cmd_channel_archives(&config, &name),
            ChannelCommands::Publish {
                channel,
                bundle,
                force,
            } => commands::cmd_channel_publish(&config, &channel, &bundle, force),
            ChannelCommands::Promote { from, to, force } => {
                commands::cmd_channel_promote(&config, &from, &to, force)
            }
            ChannelCommands::Rollback {
                channel,
                archive_id,
            } => commands::cmd_channel_rollback(&config, &channel, &archive_id),
            ChannelCommands::Recover { name } => commands::cmd_channel_recover(&config, &name),
        },

        Commands::Updates(cmd) => match cmd {
            UpdatesCommands::Compute {
                channel,
                hosts,
                output,
            } => commands::cmd_updates_compute(&config, &channel, &hosts, output.as_deref()),
        },

        Commands::Completions { .. } => Ok(()),
    }
}
