// src/bundle/verifier.rs

//! Bundle verifier
//!
//! Checks a received bundle in a fixed order and stops at the first failure:
//!
//! 1. all four artifacts present (`BundleStructureInvalid`)
//! 2. archive SHA-256 matches the shipped checksum file (`ChecksumMismatch`)
//! 3. detached signature validates against the trusted set (`SignatureInvalid`)
//! 4. extracted tree matches the shipped BOM exactly (`ChecksumMismatch`,
//!    listing every offending path)
//!
//! Extraction happens in a scratch directory inside the staging area. Only a
//! bundle that passes all checks is moved into `<staging>/<name>/`; a rejected
//! bundle leaves its artifacts untouched and gets a `<name>.rejected.json`
//! diagnostic beside them. Verifying a bundle again while its staged copy
//! from the same artifacts is still present returns that copy.

use super::archive::extract_archive;
use super::{BundleFiles, CONTENT_DIR_NAME, VERIFIED_FILE_NAME, VerificationRecord, VerifiedBundle};
use crate::bom::{BOM_FILE_NAME, BillOfMaterials};
use crate::error::{Error, Result};
use crate::fsutil::{self, sync_dir};
use crate::hash::{ChecksumLine, sha256_file};
use crate::signing::{self, TrustedKeys, VerifiedSignature};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of a verification run that passed every check
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub bundle: String,
    pub archive_sha256: String,
    pub signature: VerifiedSignature,
    pub file_count: usize,
    pub total_size: u64,
}

/// Diagnostic written next to a rejected bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub bundle: String,
    /// Name of the failed check (`structure`, `checksum`, `signature`, ...)
    pub check: String,
    pub error: String,
    /// Offending files, for checksum mismatches
    pub files: Vec<String>,
    pub rejected_at: DateTime<Utc>,
}

impl RejectionRecord {
    pub fn from_error(bundle: &str, err: &Error) -> Self {
        Self {
            bundle: bundle.to_string(),
            check: err.check().to_string(),
            error: err.to_string(),
            files: err.paths(),
            rejected_at: Utc::now(),
        }
    }
}

/// Verifies bundles against an explicit trusted key set
pub struct BundleVerifier<'a> {
    trusted: &'a TrustedKeys,
    staging_dir: PathBuf,
}

impl<'a> BundleVerifier<'a> {
    pub fn new(trusted: &'a TrustedKeys, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            trusted,
            staging_dir: staging_dir.into(),
        }
    }

    /// Run the full protocol without staging anything
    ///
    /// Extraction uses a throwaway temporary directory.
    pub fn check(&self, incoming: &Path, name: &str) -> Result<VerificationReport> {
        let files = BundleFiles::new(incoming, name)?;
        let scratch = tempfile::Builder::new()
            .prefix(".airlock-check-")
            .tempdir()?;
        self.run(&files, &scratch.path().join(CONTENT_DIR_NAME))
            .map(|(report, _)| report)
    }

    /// Verify `<incoming>/<name>.*` and move accepted content into staging
    ///
    /// On rejection the incoming artifacts stay where they are and a
    /// `<name>.rejected.json` diagnostic is written beside them.
    pub fn verify(&self, incoming: &Path, name: &str) -> Result<VerifiedBundle> {
        let files = BundleFiles::new(incoming, name)?;
        match self.verify_and_stage(&files) {
            Ok(bundle) => {
                // A stale diagnostic from an earlier failed attempt is obsolete
                let _ = fs::remove_file(files.rejection());
                Ok(bundle)
            }
            Err(err) => {
                warn!("Rejected bundle '{}': {}", name, err);
                let record = RejectionRecord::from_error(name, &err);
                if let Err(e) = fsutil::write_json_atomic(&files.rejection(), &record) {
                    warn!("Could not write rejection record for '{}': {}", name, e);
                }
                Err(err)
            }
        }
    }

    fn verify_and_stage(&self, files: &BundleFiles) -> Result<VerifiedBundle> {
        let name = files.name();
        let target = self.staging_dir.join(name);
        if target.exists() {
            return self.already_staged(files);
        }

        fs::create_dir_all(&self.staging_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(".airlock-verify-")
            .tempdir_in(&self.staging_dir)?;
        let bundle_dir = scratch.path().join(name);
        let content = bundle_dir.join(CONTENT_DIR_NAME);

        let (report, bom) = self.run(files, &content)?;

        bom.save(&bundle_dir.join(BOM_FILE_NAME))?;
        let record = VerificationRecord {
            bundle: name.to_string(),
            verified_at: Utc::now(),
            archive_sha256: report.archive_sha256.clone(),
            signer: report.signature.fingerprint.clone(),
            file_count: report.file_count,
            total_size: report.total_size,
        };
        fsutil::write_json_atomic(&bundle_dir.join(VERIFIED_FILE_NAME), &record)?;

        // Same filesystem: a single rename makes the whole bundle appear at once
        fs::rename(&bundle_dir, &target)?;
        sync_dir(&self.staging_dir);

        info!(
            "Bundle '{}' verified ({} files, signer {})",
            name, report.file_count, report.signature.fingerprint
        );
        VerifiedBundle::load(&self.staging_dir, name)
    }

    /// Accept a repeat verification of a bundle staged from the same artifacts
    ///
    /// Anything else already staged under the name is a conflict.
    fn already_staged(&self, files: &BundleFiles) -> Result<VerifiedBundle> {
        let name = files.name();
        let conflict = || {
            Error::BundleExists(format!(
                "{} (already in {})",
                name,
                self.staging_dir.display()
            ))
        };
        let staged = VerifiedBundle::load(&self.staging_dir, name).map_err(|_| conflict())?;
        if !files.missing().is_empty() {
            return Err(conflict());
        }
        let (archive_sha256, _) = sha256_file(&files.archive())?;
        let shipped = BillOfMaterials::load(&files.bom()).ok();
        if archive_sha256.to_string() != staged.record().archive_sha256
            || shipped.as_ref() != Some(staged.bom())
        {
            debug!("Staged '{}' was verified from different artifacts", name);
            return Err(conflict());
        }
        info!("Bundle '{}' is already verified and staged", name);
        Ok(staged)
    }

    fn run(&self, files: &BundleFiles, extract_to: &Path) -> Result<(VerificationReport, BillOfMaterials)> {
        let name = files.name();

        // 0. Structure
        let missing = files.missing();
        if !missing.is_empty() {
            return Err(Error::BundleStructureInvalid {
                bundle: name.to_string(),
                reason: format!("missing artifact(s): {}", missing.join(", ")),
            });
        }

        // 1. Whole-archive checksum
        let checksum_text = fs::read_to_string(files.checksum())?;
        let expected = ChecksumLine::parse(&checksum_text).map_err(|e| {
            Error::BundleStructureInvalid {
                bundle: name.to_string(),
                reason: format!("unreadable checksum file: {}", e),
            }
        })?;
        if expected.filename != files.archive_file_name() {
            return Err(Error::BundleStructureInvalid {
                bundle: name.to_string(),
                reason: format!(
                    "checksum file names '{}', expected '{}'",
                    expected.filename,
                    files.archive_file_name()
                ),
            });
        }
        let (actual, _) = sha256_file(&files.archive())?;
        if actual != expected.hash {
            debug!("archive sha256 {} != shipped {}", actual, expected.hash);
            return Err(Error::ChecksumMismatch {
                subject: name.to_string(),
                paths: vec![files.archive_file_name()],
            });
        }
        debug!("Archive checksum ok for '{}'", name);

        // 2. Signature
        let signature = signing::verify_file(&files.archive(), &files.signature(), self.trusted)?;
        debug!("Signature ok for '{}' (key {})", name, signature.signing_key);

        // 3. Extract and compare against the shipped BOM
        let bom = BillOfMaterials::load(&files.bom()).map_err(|e| Error::BundleStructureInvalid {
            bundle: name.to_string(),
            reason: format!("unreadable BOM: {}", e),
        })?;
        extract_archive(&files.archive(), extract_to, name)?;
        bom.verify_tree(extract_to, name)?;

        let report = VerificationReport {
            bundle: name.to_string(),
            archive_sha256: actual.to_string(),
            signature,
            file_count: bom.len(),
            total_size: bom.total_size(),
        };
        Ok((report, bom))
    }
}
