// src/channel/index.rs

//! Channel package index
//!
//! `package_index.json` maps `"name.arch"` to the best (highest EVR) package
//! available in a channel's content. It is derived data, regenerated after
//! every content swap, and is what the update engine reads.
//!
//! Sources, in order of preference:
//!
//! 1. a shipped `.package_cache.json` at the root of the content tree
//! 2. RPM headers of every `*.rpm` file
//! 3. the NEVRA encoded in the file name, for RPMs whose header cannot be read

use crate::error::{Error, Result};
use crate::fsutil;
use crate::version::{Evr, Nevra};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const INDEX_FILE_NAME: &str = "package_index.json";
pub const PACKAGE_CACHE_FILE_NAME: &str = ".package_cache.json";

/// Best available build of one name+arch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl IndexEntry {
    pub fn key(&self) -> String {
        index_key(&self.name, &self.arch)
    }

    pub fn evr(&self) -> Result<Evr> {
        Evr::from_parts(&self.epoch, &self.version, &self.release)
    }
}

/// Index key for a package
pub fn index_key(name: &str, arch: &str) -> String {
    format!("{}.{}", name, arch)
}

/// Shape of entries in a shipped package cache; name and arch may be implied by the key
#[derive(Debug, Deserialize)]
struct CacheEntry {
    name: Option<String>,
    #[serde(default)]
    epoch: Option<serde_json::Value>,
    version: String,
    release: String,
    arch: Option<String>,
}

/// name.arch -> best available package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageIndex {
    packages: BTreeMap<String, IndexEntry>,
}

impl PackageIndex {
    /// Derive the index for a content tree
    pub fn build(content: &Path) -> Result<Self> {
        let cache = content.join(PACKAGE_CACHE_FILE_NAME);
        if cache.is_file() {
            debug!("Building package index from {}", cache.display());
            return Self::from_cache(&fs::read_to_string(&cache)?);
        }
        Self::from_rpms(content)
    }

    /// Parse a `.package_cache.json` document
    pub fn from_cache(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, CacheEntry> = serde_json::from_str(content)
            .map_err(|e| Error::ParseError(format!("invalid package cache: {}", e)))?;

        let mut index = Self::default();
        for (key, entry) in raw {
            let (key_name, key_arch) = key.rsplit_once('.').unwrap_or((key.as_str(), ""));
            let name = entry.name.unwrap_or_else(|| key_name.to_string());
            let arch = entry.arch.unwrap_or_else(|| key_arch.to_string());
            if name.is_empty() || arch.is_empty() {
                warn!("Skipping package cache entry '{}' without name or arch", key);
                continue;
            }
            let epoch = match entry.epoch {
                None | Some(serde_json::Value::Null) => "0".to_string(),
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
            };
            index.offer(IndexEntry {
                name,
                epoch,
                version: entry.version,
                release: entry.release,
                arch,
            });
        }
        Ok(index)
    }

    /// Scan every `*.rpm` under `content`
    pub fn from_rpms(content: &Path) -> Result<Self> {
        let mut index = Self::default();
        for entry in WalkDir::new(content).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if !file_name.ends_with(".rpm") || file_name.ends_with(".src.rpm") {
                continue;
            }
            match read_rpm_header(entry.path()) {
                Ok(pkg) => index.offer(pkg),
                Err(header_err) => match Nevra::parse(&file_name) {
                    Ok(nevra) => {
                        debug!(
                            "Using file name for {} (header unreadable: {})",
                            file_name, header_err
                        );
                        index.offer(IndexEntry {
                            name: nevra.name,
                            epoch: nevra.evr.epoch.to_string(),
                            version: nevra.evr.version,
                            release: nevra.evr.release,
                            arch: nevra.arch,
                        });
                    }
                    Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
                },
            }
        }
        debug!("Indexed {} packages under {}", index.len(), content.display());
        Ok(index)
    }

    /// Insert `entry` unless an equal or newer build is already indexed
    pub fn offer(&mut self, entry: IndexEntry) {
        let evr = match entry.evr() {
            Ok(evr) => evr,
            Err(e) => {
                warn!("Skipping {} in package index: {}", entry.key(), e);
                return;
            }
        };
        let key = entry.key();
        let newer = match self.packages.get(&key).map(IndexEntry::evr) {
            Some(Ok(existing)) => evr > existing,
            _ => true,
        };
        if newer {
            self.packages.insert(key, entry);
        }
    }

    pub fn lookup(&self, name: &str, arch: &str) -> Option<&IndexEntry> {
        self.packages.get(&index_key(name, arch))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.packages.values()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("cannot read package index {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::ParseError(format!("invalid package index: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::write_json_atomic(path, self)
    }
}

fn read_rpm_header(path: &Path) -> Result<IndexEntry> {
    let metadata = rpm::PackageMetadata::open(path)
        .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
    let field = |what: &str, r: std::result::Result<&str, rpm::Error>| {
        r.map(str::to_string)
            .map_err(|e| Error::ParseError(format!("{}: no {}: {}", path.display(), what, e)))
    };
    Ok(IndexEntry {
        name: field("name", metadata.get_name())?,
        // Packages without an epoch tag have epoch 0
        epoch: metadata.get_epoch().map(|e| e.to_string()).unwrap_or_else(|_| "0".to_string()),
        version: field("version", metadata.get_version())?,
        release: field("release", metadata.get_release())?,
        arch: field("arch", metadata.get_arch())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CACHE: &str = r#"{
        "bash.x86_64": {"name": "bash", "epoch": "0", "version": "5.1.8", "release": "9.el9", "arch": "x86_64"},
        "openssl.x86_64": {"epoch": 1, "version": "3.0.7", "release": "27.el9"},
        "broken.x86_64": {"version": "1 0", "release": "1"}
    }"#;

    #[test]
    fn test_from_cache() {
        let index = PackageIndex::from_cache(CACHE).unwrap();
        assert_eq!(index.len(), 2);
        let openssl = index.lookup("openssl", "x86_64").unwrap();
        assert_eq!(openssl.name, "openssl");
        assert_eq!(openssl.epoch, "1");
        assert!(index.lookup("broken", "x86_64").is_none());
        assert!(index.lookup("bash", "aarch64").is_none());
    }

    #[test]
    fn test_offer_keeps_highest() {
        let mut index = PackageIndex::default();
        let entry = |v: &str, r: &str| IndexEntry {
            name: "foo".to_string(),
            epoch: "0".to_string(),
            version: v.to_string(),
            release: r.to_string(),
            arch: "noarch".to_string(),
        };
        index.offer(entry("1.3", "1"));
        index.offer(entry("1.2", "9"));
        index.offer(entry("1.10", "1"));
        assert_eq!(index.lookup("foo", "noarch").unwrap().version, "1.10");
    }

    #[test]
    fn test_build_from_file_names() {
        let tmp = TempDir::new().unwrap();
        let pkgs = tmp.path().join("Packages");
        fs::create_dir_all(&pkgs).unwrap();
        // Not real RPMs; the header read fails and the file name is used
        fs::write(pkgs.join("bash-5.1.8-6.el9.x86_64.rpm"), b"x").unwrap();
        fs::write(pkgs.join("bash-5.1.8-9.el9.x86_64.rpm"), b"x").unwrap();
        fs::write(pkgs.join("bash-5.1.8-9.el9.src.rpm"), b"x").unwrap();
        fs::write(pkgs.join("notes.txt"), b"x").unwrap();

        let index = PackageIndex::build(tmp.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("bash", "x86_64").unwrap().release, "9.el9");
    }

    #[test]
    fn test_cache_takes_precedence_and_roundtrips() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PACKAGE_CACHE_FILE_NAME), CACHE).unwrap();
        fs::write(tmp.path().join("zsh-5.8-9.el9.x86_64.rpm"), b"x").unwrap();
        let index = PackageIndex::build(tmp.path()).unwrap();
        assert!(index.lookup("zsh", "x86_64").is_none());

        let path = tmp.path().join(INDEX_FILE_NAME);
        index.save(&path).unwrap();
        assert_eq!(PackageIndex::load(&path).unwrap(), index);
    }
}
