// src/commands/key.rs
//! Signing key commands

use airlock::fsutil;
use airlock::signing::SigningKey;
use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::info;

/// Generate a signing key pair and write both halves
pub fn cmd_key_generate(user_id: &str, secret: &Path, public: &Path) -> Result<()> {
    for path in [secret, public] {
        if path.exists() {
            anyhow::bail!("Refusing to overwrite existing {}", path.display());
        }
    }

    info!("Generating signing key for {}", user_id);
    let key = SigningKey::generate(user_id).context("Failed to generate signing key")?;

    fsutil::write_atomic(secret, &key.secret_armored()?)
        .with_context(|| format!("Failed to write {}", secret.display()))?;
    fs::set_permissions(secret, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict {}", secret.display()))?;
    fsutil::write_atomic(public, &key.public_armored()?)
        .with_context(|| format!("Failed to write {}", public.display()))?;

    println!("Generated key {}", key.fingerprint());
    println!("  Secret key: {} (keep on the connected side)", secret.display());
    println!("  Public key: {} (add to trust.keys on the isolated side)", public.display());
    Ok(())
}
