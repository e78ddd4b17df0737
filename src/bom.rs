// src/bom.rs

//! Bill of Materials generation and comparison
//!
//! A BOM lists every regular file under a content tree with its size and
//! SHA-256, sorted by `/`-separated relative path. Generating a BOM twice over
//! an unmodified tree yields byte-identical JSON:
//!
//! ```json
//! {"files":[{"path":"Packages/a.rpm","size":1024,"sha256":"..."}]}
//! ```
//!
//! Any file that cannot be read aborts generation with `TreeUnreadable`; a BOM
//! with silently missing entries would be worse than no BOM at all.

use crate::error::{Error, Result};
use crate::fsutil::{self, relative_key};
use crate::hash::{Sha256Hash, sha256_file};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File name used for a BOM stored beside a content tree
pub const BOM_FILE_NAME: &str = "bom.json";

/// One file in a BOM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomEntry {
    /// Path relative to the tree root, `/`-separated
    pub path: String,
    pub size: u64,
    pub sha256: Sha256Hash,
}

/// Canonical checksum manifest of a content tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillOfMaterials {
    files: Vec<BomEntry>,
}

/// Entry-by-entry differences between an expected and an actual BOM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BomDiff {
    /// In the expected BOM but absent from the tree
    pub missing: Vec<String>,
    /// In the tree but not in the expected BOM
    pub extra: Vec<String>,
    /// Present in both with a different size or hash
    pub changed: Vec<String>,
}

impl BomDiff {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.changed.is_empty()
    }

    /// All offending paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .missing
            .iter()
            .chain(&self.extra)
            .chain(&self.changed)
            .cloned()
            .collect();
        all.sort();
        all.dedup();
        all
    }

    /// Convert into a `ChecksumMismatch` error if anything differs
    pub fn into_result(self, subject: &str) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        Err(Error::ChecksumMismatch {
            subject: subject.to_string(),
            paths: self.paths(),
        })
    }
}

impl BillOfMaterials {
    /// Build a BOM from entries, sorting them and rejecting duplicates
    pub fn from_entries(mut files: Vec<BomEntry>) -> Result<Self> {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        for pair in files.windows(2) {
            if pair[0].path == pair[1].path {
                return Err(Error::ParseError(format!(
                    "duplicate BOM entry: {}",
                    pair[0].path
                )));
            }
        }
        for entry in &files {
            fsutil::sanitize_relative(&entry.path)?;
        }
        Ok(Self { files })
    }

    /// Generate a BOM for every regular file under `root`
    pub fn generate(root: &Path) -> Result<Self> {
        Self::generate_excluding(root, &[])
    }

    /// Generate a BOM of `root` that leaves out `bom_path` when it lies inside the tree
    ///
    /// `bom_path` need not exist yet, so `bom generate DIR -o DIR/bom.json`
    /// and a later `bom verify` agree on the same file set.
    pub fn generate_for(root: &Path, bom_path: &Path) -> Result<Self> {
        match key_within(root, bom_path) {
            Some(key) => {
                debug!("Excluding {} from BOM of {}", key, root.display());
                Self::generate_excluding(root, &[key.as_str()])
            }
            None => Self::generate(root),
        }
    }

    /// Generate a BOM, skipping the given relative paths (e.g. the BOM file itself)
    pub fn generate_excluding(root: &Path, exclude: &[&str]) -> Result<Self> {
        let metadata = fs::metadata(root).map_err(|e| Error::TreeUnreadable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(Error::TreeUnreadable {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let files = scan_tree(root, exclude)?;
        debug!("Hashing {} files under {}", files.len(), root.display());

        let entries = files
            .par_iter()
            .map(|(key, path)| {
                let (sha256, size) = sha256_file(path).map_err(|e| Error::TreeUnreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                Ok(BomEntry {
                    path: key.clone(),
                    size,
                    sha256,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_entries(entries)
    }

    pub fn entries(&self) -> &[BomEntry] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn get(&self, path: &str) -> Option<&BomEntry> {
        self.files
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// Canonical JSON encoding
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Parse and validate a BOM document
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: BillOfMaterials = serde_json::from_str(content)
            .map_err(|e| Error::ParseError(format!("invalid BOM: {}", e)))?;
        Self::from_entries(raw.files)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("cannot read BOM {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::write_atomic(path, self.to_json()?.as_bytes())
    }

    /// Compare this (expected) BOM against an actual one
    pub fn diff(&self, actual: &BillOfMaterials) -> BomDiff {
        let expected: BTreeMap<&str, &BomEntry> =
            self.files.iter().map(|e| (e.path.as_str(), e)).collect();
        let found: BTreeMap<&str, &BomEntry> =
            actual.files.iter().map(|e| (e.path.as_str(), e)).collect();

        let mut diff = BomDiff::default();
        for (path, want) in &expected {
            match found.get(path) {
                None => diff.missing.push(path.to_string()),
                Some(got) if got.size != want.size || got.sha256 != want.sha256 => {
                    diff.changed.push(path.to_string())
                }
                Some(_) => {}
            }
        }
        for path in found.keys() {
            if !expected.contains_key(path) {
                diff.extra.push(path.to_string());
            }
        }
        diff
    }

    /// Re-derive the BOM of `root` and require an exact match
    ///
    /// Fails with `ChecksumMismatch` listing every missing, extra or changed path.
    pub fn verify_tree(&self, root: &Path, subject: &str) -> Result<()> {
        let actual = Self::generate(root)?;
        let diff = self.diff(&actual);
        if !diff.is_clean() {
            warn!(
                "BOM mismatch for {}: {} missing, {} extra, {} changed",
                subject,
                diff.missing.len(),
                diff.extra.len(),
                diff.changed.len()
            );
        }
        diff.into_result(subject)
    }
}

/// Key of `path` relative to `root`, if it resolves to somewhere inside it
fn key_within(root: &Path, path: &Path) -> Option<String> {
    let root = fs::canonicalize(root).ok()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let full = fs::canonicalize(parent).ok()?.join(path.file_name()?);
    relative_key(&root, &full).ok()
}

/// Collect (relative key, absolute path) for every regular file under root
fn scan_tree(root: &Path, exclude: &[&str]) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() {
            warn!("Skipping symlink in content tree: {}", entry.path().display());
            continue;
        }
        if !file_type.is_file() {
            warn!("Skipping special file in content tree: {}", entry.path().display());
            continue;
        }

        let key = relative_key(root, entry.path())?;
        if exclude.contains(&key.as_str()) {
            continue;
        }
        files.push((key, entry.into_path()));
    }

    Ok(files)
}
