// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use airlock::bundle::{BundlePackager, BundleVerifier, VerifiedBundle};
use airlock::channel::ChannelManager;
use airlock::config::Config;
use airlock::signing::{SigningKey, TrustedKeys};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write `files` (relative path, content) under `root`
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(root).unwrap();
    for (path, data) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
}

/// A trusted key set holding only `key`
pub fn trust(key: &SigningKey) -> TrustedKeys {
    let mut keys = TrustedKeys::new();
    keys.add_bytes(&key.public_armored().unwrap()).unwrap();
    keys
}

/// A connected side and an isolated side sharing one temp directory
///
/// Keep the struct alive for the duration of the test; dropping it removes
/// everything.
pub struct Airgap {
    pub tmp: TempDir,
    pub config: Config,
    pub key: SigningKey,
}

impl Airgap {
    /// Fresh layout with a signing key trusted through the config
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let key = SigningKey::generate("Airlock Test <test@example.com>").unwrap();
        let public = tmp.path().join("trusted/k1.asc");
        fs::create_dir_all(public.parent().unwrap()).unwrap();
        fs::write(&public, key.public_armored().unwrap()).unwrap();

        let mut config = Config::default();
        config.paths.channels = tmp.path().join("channels");
        config.paths.incoming = tmp.path().join("incoming");
        config.paths.staging = tmp.path().join("verified");
        config.paths.manifests = tmp.path().join("manifests");
        config.trust.keys = vec![public];
        config.channels.history_limit = 3;
        config.channels.lock_timeout_secs = 0;

        Self { tmp, config, key }
    }

    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn manager(&self) -> ChannelManager {
        ChannelManager::new(&self.config.paths.channels, &self.config.channels)
    }

    pub fn trusted(&self) -> TrustedKeys {
        TrustedKeys::from_files(&self.config.trust.keys).unwrap()
    }

    /// Source tree for bundle `name` on the connected side
    pub fn source(&self, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let dir = self.path().join("sources").join(name);
        write_tree(&dir, files);
        dir
    }

    /// Package `files` as bundle `name` straight into the incoming area
    pub fn ship(&self, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let source = self.source(name, files);
        BundlePackager::new(&self.config.paths.incoming)
            .create(&source, name, &self.key)
            .unwrap();
        source
    }

    /// Verify an incoming bundle against the configured trust set and stage it
    pub fn receive(&self, name: &str) -> VerifiedBundle {
        let trusted = self.trusted();
        BundleVerifier::new(&trusted, &self.config.paths.staging)
            .verify(&self.config.paths.incoming, name)
            .unwrap()
    }

    /// Ship, receive and publish in one go
    pub fn publish(&self, channel: &str, name: &str, files: &[(&str, &[u8])]) {
        self.ship(name, files);
        let bundle = self.receive(name);
        self.manager().publish(channel, &bundle, false).unwrap();
    }
}

/// Every file under `root` as (relative path, bytes), sorted
pub fn snapshot_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(root).unwrap();
            files.push((
                rel.to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            ));
        }
    }
    files
}
