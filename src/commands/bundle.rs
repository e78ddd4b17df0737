// src/commands/bundle.rs
//! Bundle packaging and verification commands

use airlock::bundle::{BundlePackager, BundleVerifier};
use airlock::config::Config;
use airlock::signing::{SigningKey, TrustedKeys};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Package a content tree as a signed bundle
pub fn cmd_bundle_create(
    source: &Path,
    name: &str,
    key_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let key = SigningKey::load(key_path)
        .with_context(|| format!("Failed to load signing key {}", key_path.display()))?;
    let output = output.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

    let bundle = BundlePackager::new(&output)
        .create(source, name, &key)
        .with_context(|| format!("Failed to create bundle '{}'", name))?;

    println!("Created bundle '{}' in {}", name, output.display());
    println!("  Files:   {} ({} bytes)", bundle.file_count, bundle.content_size);
    println!("  Archive: {} ({} bytes)", bundle.files.archive_file_name(), bundle.archive_size);
    println!("  SHA-256: {}", bundle.archive_sha256);
    println!("  Signer:  {}", bundle.signer);
    Ok(())
}

/// Verify an incoming bundle, staging it unless `check_only`
pub fn cmd_bundle_verify(
    config: &Config,
    name: &str,
    incoming: Option<&Path>,
    check_only: bool,
) -> Result<()> {
    let incoming = incoming.unwrap_or(config.paths.incoming.as_path());
    if config.trust.keys.is_empty() {
        anyhow::bail!("No trusted keys configured (trust.keys); refusing to verify");
    }
    let trusted = TrustedKeys::from_files(&config.trust.keys)
        .context("Failed to load trusted keys")?;
    info!(
        "Verifying bundle '{}' from {} against {} trusted key(s)",
        name,
        incoming.display(),
        trusted.len()
    );

    let verifier = BundleVerifier::new(&trusted, &config.paths.staging);
    if check_only {
        let report = verifier
            .check(incoming, name)
            .with_context(|| format!("Bundle '{}' rejected", name))?;
        println!("Bundle '{}' passed all checks (not staged)", report.bundle);
        println!("  Files:   {} ({} bytes)", report.file_count, report.total_size);
        println!("  SHA-256: {}", report.archive_sha256);
        println!("  Signer:  {}", report.signature.fingerprint);
        return Ok(());
    }

    let bundle = verifier
        .verify(incoming, name)
        .with_context(|| format!("Bundle '{}' rejected", name))?;
    let record = bundle.record();
    println!("Bundle '{}' verified and staged", bundle.name());
    println!("  Files:   {} ({} bytes)", record.file_count, record.total_size);
    println!("  Signer:  {}", record.signer);
    println!("  Content: {}", bundle.content_dir().display());
    Ok(())
}
