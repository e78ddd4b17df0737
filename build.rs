// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: channel name
fn channel_arg(id: &'static str, help: &'static str) -> Arg {
    Arg::new(id).required(true).value_name("NAME").help(help)
}

/// Common argument: --force
fn force_arg(help: &'static str) -> Arg {
    Arg::new("force").long("force").action(ArgAction::SetTrue).help(help)
}

fn build_cli() -> Command {
    Command::new("airlock")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Airlock Contributors")
        .about("Verified bundle transfer and lifecycle channels across an air gap")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file (default: /etc/airlock/airlock.toml if present)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging (RUST_LOG still wins when set)"),
        )
        .subcommand(
            Command::new("manifest")
                .about("Host manifest capture and collection")
                .subcommand(
                    Command::new("capture")
                        .about("Capture this host's installed packages")
                        .arg(Arg::new("output").short('o').long("output").value_name("FILE"))
                        .arg(Arg::new("host_id").long("host-id").value_name("ID"))
                        .arg(Arg::new("store").long("store").action(ArgAction::SetTrue)),
                )
                .subcommand(
                    Command::new("import")
                        .about("Import a carried manifest into the manifest store")
                        .arg(Arg::new("file").required(true).help("Manifest file")),
                )
                .subcommand(Command::new("list").about("List hosts with a stored manifest")),
        )
        .subcommand(
            Command::new("bom")
                .about("Bill of materials generation and checking")
                .subcommand(
                    Command::new("generate")
                        .about("Hash a content tree")
                        .arg(Arg::new("dir").required(true).help("Content directory"))
                        .arg(Arg::new("output").short('o').long("output").value_name("FILE")),
                )
                .subcommand(
                    Command::new("verify")
                        .about("Check a content tree against a BOM")
                        .arg(Arg::new("dir").required(true).help("Content directory"))
                        .arg(Arg::new("bom").required(true).help("BOM file")),
                ),
        )
        .subcommand(
            Command::new("key").about("Signing key management").subcommand(
                Command::new("generate")
                    .about("Generate a bundle signing key pair")
                    .arg(Arg::new("user_id").long("user-id").required(true).value_name("UID"))
                    .arg(Arg::new("secret").long("secret").required(true).value_name("FILE"))
                    .arg(Arg::new("public").long("public").required(true).value_name("FILE")),
            ),
        )
        .subcommand(
            Command::new("bundle")
                .about("Bundle packaging and verification")
                .subcommand(
                    Command::new("create")
                        .about("Package a content tree as a signed bundle")
                        .arg(Arg::new("source").required(true).help("Content directory"))
                        .arg(Arg::new("name").short('n').long("name").required(true))
                        .arg(Arg::new("key").short('k').long("key").required(true).value_name("SECRET"))
                        .arg(Arg::new("output").short('o').long("output").value_name("DIR")),
                )
                .subcommand(
                    Command::new("verify")
                        .about("Verify an incoming bundle against the trusted keys")
                        .arg(Arg::new("name").required(true).help("Bundle name"))
                        .arg(Arg::new("incoming").short('i').long("incoming").value_name("DIR"))
                        .arg(
                            Arg::new("check_only")
                                .long("check-only")
                                .action(ArgAction::SetTrue)
                                .help("Run every check without staging the content"),
                        ),
                ),
        )
        .subcommand(
            Command::new("channel")
                .about("Lifecycle channel management")
                .subcommand(
                    Command::new("create")
                        .about("Create an empty channel")
                        .arg(channel_arg("name", "Channel name")),
                )
                .subcommand(Command::new("list").about("List channels"))
                .subcommand(
                    Command::new("show")
                        .about("Show a channel's current bundle, history and health")
                        .arg(channel_arg("name", "Channel name")),
                )
                .subcommand(
                    Command::new("archives")
                        .about("List a channel's archived snapshots")
                        .arg(channel_arg("name", "Channel name")),
                )
                .subcommand(
                    Command::new("publish")
                        .about("Publish a verified bundle into a channel")
                        .arg(channel_arg("channel", "Target channel"))
                        .arg(Arg::new("bundle").required(true).help("Verified bundle name"))
                        .arg(force_arg("Republish even if the bundle is already current")),
                )
                .subcommand(
                    Command::new("promote")
                        .about("Copy one channel's current content into another")
                        .arg(channel_arg("from", "Source channel"))
                        .arg(channel_arg("to", "Target channel"))
                        .arg(force_arg("Promote even if the target carries the same bundle")),
                )
                .subcommand(
                    Command::new("rollback")
                        .about("Restore an archived snapshot")
                        .arg(channel_arg("channel", "Channel name"))
                        .arg(Arg::new("archive_id").required(true).help("Archive id")),
                )
                .subcommand(
                    Command::new("recover")
                        .about("Resolve an interrupted publish, promote or rollback")
                        .arg(channel_arg("name", "Channel name")),
                ),
        )
        .subcommand(
            Command::new("updates").about("Update computation").subcommand(
                Command::new("compute")
                    .about("Compare host manifests against a channel's packages")
                    .arg(Arg::new("channel").long("channel").required(true).value_name("NAME"))
                    .arg(
                        Arg::new("host")
                            .long("host")
                            .value_name("ID")
                            .action(ArgAction::Append)
                            .help("Only these hosts (repeatable)"),
                    )
                    .arg(Arg::new("output").short('o').long("output").value_name("DIR")),
            ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("airlock.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
