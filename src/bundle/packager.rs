// src/bundle/packager.rs

//! Bundle packager
//!
//! Builds the four bundle artifacts in a private temporary directory inside
//! the output location and renames them into place only after every step has
//! succeeded. The signature is renamed last, so an interrupted packaging run
//! can never leave a set the verifier would accept.

use super::BundleFiles;
use super::archive::write_archive;
use crate::bom::BillOfMaterials;
use crate::error::{Error, Result};
use crate::fsutil::sync_dir;
use crate::hash::{ChecksumLine, Sha256Hash, sha256_file};
use crate::signing::{self, SigningKey};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Summary of a freshly created bundle
#[derive(Debug, Clone)]
pub struct PackagedBundle {
    pub files: BundleFiles,
    pub archive_sha256: Sha256Hash,
    pub archive_size: u64,
    pub file_count: usize,
    pub content_size: u64,
    pub signer: String,
}

/// Creates signed bundles in an output directory
pub struct BundlePackager {
    output_dir: PathBuf,
}

impl BundlePackager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Package `source` as bundle `name`, signed with `key`
    pub fn create(&self, source: &Path, name: &str, key: &SigningKey) -> Result<PackagedBundle> {
        let files = BundleFiles::new(&self.output_dir, name)?;
        fs::create_dir_all(&self.output_dir)?;
        if files.any_exist() {
            return Err(Error::BundleExists(name.to_string()));
        }

        info!("Packaging {} as bundle '{}'", source.display(), name);

        // Build everything in a scratch directory on the same filesystem
        let scratch = tempfile::Builder::new()
            .prefix(".airlock-pack-")
            .tempdir_in(&self.output_dir)?;
        let staged = BundleFiles::new(scratch.path(), name)?;

        // 1. BOM
        let bom = BillOfMaterials::generate(source)?;
        debug!("BOM covers {} files ({} bytes)", bom.len(), bom.total_size());
        bom.save(&staged.bom())?;

        // 2. Archive
        write_archive(source, &bom, &staged.archive())?;

        // 3. Whole-archive checksum
        let (archive_sha256, archive_size) = sha256_file(&staged.archive())?;
        let line = ChecksumLine::new(archive_sha256.clone(), staged.archive_file_name());
        fs::write(staged.checksum(), line.render())?;

        // 4. Detached signature
        let signature = signing::sign_file(&staged.archive(), key)?;
        fs::write(staged.signature(), signature)?;

        // 5. Publish into the output directory, signature last
        let moves: Vec<(PathBuf, PathBuf)> = staged
            .artifacts()
            .into_iter()
            .zip(files.artifacts())
            .collect();
        let mut done: Vec<&PathBuf> = Vec::new();
        for (from, to) in &moves {
            if let Err(e) = fs::rename(from, to) {
                warn!("Failed to place {}: {}; removing partial bundle", to.display(), e);
                for placed in done {
                    let _ = fs::remove_file(placed);
                }
                return Err(e.into());
            }
            done.push(to);
        }
        sync_dir(&self.output_dir);

        info!(
            "Created bundle '{}' ({} files, archive sha256 {})",
            name,
            bom.len(),
            archive_sha256
        );

        Ok(PackagedBundle {
            files,
            archive_sha256,
            archive_size,
            file_count: bom.len(),
            content_size: bom.total_size(),
            signer: key.fingerprint(),
        })
    }
}
