// src/bundle/mod.rs

//! Transportable bundles
//!
//! A bundle named `N` is four sibling files:
//!
//! - `N.tar.gz` - deterministic archive of the content tree
//! - `N.tar.gz.sha256` - `hash  N.tar.gz`
//! - `N.tar.gz.asc` - armored detached signature over the archive
//! - `N.bom.json` - bill of materials of the content tree
//!
//! [`packager`] produces them on the connected side; [`verifier`] checks them
//! on the isolated side and moves accepted content into the verified staging
//! area as a [`VerifiedBundle`], the only thing a channel will publish.

pub mod archive;
pub mod packager;
pub mod verifier;

pub use packager::{BundlePackager, PackagedBundle};
pub use verifier::{BundleVerifier, RejectionRecord, VerificationReport};

use crate::bom::{BOM_FILE_NAME, BillOfMaterials};
use crate::error::{Error, Result, validate_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Record written beside verified content
pub const VERIFIED_FILE_NAME: &str = "verified.json";

/// Directory holding the extracted tree of a verified bundle
pub const CONTENT_DIR_NAME: &str = "content";

/// Paths of the four artifacts making up a bundle
#[derive(Debug, Clone)]
pub struct BundleFiles {
    dir: PathBuf,
    name: String,
}

impl BundleFiles {
    pub fn new(dir: &Path, name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_file_name(&self) -> String {
        format!("{}.tar.gz", self.name)
    }

    pub fn archive(&self) -> PathBuf {
        self.dir.join(self.archive_file_name())
    }

    pub fn checksum(&self) -> PathBuf {
        self.dir.join(format!("{}.tar.gz.sha256", self.name))
    }

    pub fn signature(&self) -> PathBuf {
        self.dir.join(format!("{}.tar.gz.asc", self.name))
    }

    pub fn bom(&self) -> PathBuf {
        self.dir.join(format!("{}.bom.json", self.name))
    }

    /// Diagnostic left in the incoming area when a bundle is rejected
    pub fn rejection(&self) -> PathBuf {
        self.dir.join(format!("{}.rejected.json", self.name))
    }

    /// All four artifacts, signature last
    pub fn artifacts(&self) -> [PathBuf; 4] {
        [self.archive(), self.bom(), self.checksum(), self.signature()]
    }

    /// Artifacts that are absent or not regular files
    pub fn missing(&self) -> Vec<String> {
        self.artifacts()
            .iter()
            .filter(|p| !p.is_file())
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }

    /// Whether any artifact of this bundle already exists
    pub fn any_exist(&self) -> bool {
        self.artifacts().iter().any(|p| p.exists())
    }
}

/// Provenance recorded when a bundle passes verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub bundle: String,
    pub verified_at: DateTime<Utc>,
    pub archive_sha256: String,
    /// Fingerprint of the trusted certificate that validated the signature
    pub signer: String,
    pub file_count: usize,
    pub total_size: u64,
}

/// A bundle that passed every check and sits in the verified staging area
///
/// Only the verifier creates these on disk; [`VerifiedBundle::load`] re-reads
/// one for publishing.
#[derive(Debug, Clone)]
pub struct VerifiedBundle {
    root: PathBuf,
    bom: BillOfMaterials,
    record: VerificationRecord,
}

impl VerifiedBundle {
    /// Load `<staging>/<name>` written by a previous verification
    pub fn load(staging: &Path, name: &str) -> Result<Self> {
        validate_name(name)?;
        let root = staging.join(name);
        let record_path = root.join(VERIFIED_FILE_NAME);
        if !record_path.is_file() {
            return Err(Error::BundleStructureInvalid {
                bundle: name.to_string(),
                reason: format!("not in verified staging area {}", staging.display()),
            });
        }
        let record: VerificationRecord = serde_json::from_str(&fs::read_to_string(&record_path)?)?;
        if record.bundle != name {
            return Err(Error::BundleStructureInvalid {
                bundle: name.to_string(),
                reason: format!("verification record names '{}'", record.bundle),
            });
        }
        let bom = BillOfMaterials::load(&root.join(BOM_FILE_NAME))?;
        if !root.join(CONTENT_DIR_NAME).is_dir() {
            return Err(Error::BundleStructureInvalid {
                bundle: name.to_string(),
                reason: "verified content directory missing".to_string(),
            });
        }
        Ok(Self { root, bom, record })
    }

    pub fn name(&self) -> &str {
        &self.record.bundle
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join(CONTENT_DIR_NAME)
    }

    pub fn bom(&self) -> &BillOfMaterials {
        &self.bom
    }

    pub fn record(&self) -> &VerificationRecord {
        &self.record
    }

    /// Remove this bundle from the verified staging area
    ///
    /// The tree is renamed to a hidden name first, so an interrupted removal
    /// never leaves anything that still loads as verified.
    pub fn discard(&self) -> Result<()> {
        let parent = self.root.parent().unwrap_or_else(|| Path::new("."));
        let doomed = parent.join(format!(".discard-{}", Uuid::new_v4()));
        fs::rename(&self.root, &doomed)?;
        fs::remove_dir_all(&doomed)?;
        Ok(())
    }
}

/// List bundle names present in the verified staging area
pub fn list_verified(staging: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !staging.exists() {
        return Ok(names);
    }
    for entry in fs::read_dir(staging)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.path().join(VERIFIED_FILE_NAME).is_file() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
