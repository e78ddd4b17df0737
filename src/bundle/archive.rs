// src/bundle/archive.rs

//! Deterministic tar.gz archives of content trees
//!
//! Entries are written in BOM order with normalized ownership and mtime, so
//! the same tree always produces the same archive bytes. Extraction accepts
//! only regular files and directories and refuses any path escaping the
//! destination.

use crate::bom::BillOfMaterials;
use crate::error::{Error, Result};
use crate::fsutil::sanitize_relative;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;

/// Fallback mtime when SOURCE_DATE_EPOCH is unset (2024-01-01 00:00:00 UTC)
const DEFAULT_MTIME: u64 = 1704067200;

fn normalized_mtime() -> u64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_MTIME)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    // Keep the executable bit, drop everything else
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

fn header(entry_type: EntryType, mode: u32, size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    header
}

/// Archive exactly the files listed in `bom` from `root` into `output`
///
/// A file whose size no longer matches the BOM aborts the archive; the tree
/// changed underneath us.
pub fn write_archive(root: &Path, bom: &BillOfMaterials, output: &Path) -> Result<()> {
    let mtime = normalized_mtime();
    let file = File::create(output)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);

    // Parent directories first, sorted
    let mut dirs = BTreeSet::new();
    for entry in bom.entries() {
        let mut parts: Vec<&str> = entry.path.split('/').collect();
        parts.pop();
        for i in 1..=parts.len() {
            dirs.insert(parts[..i].join("/"));
        }
    }
    for dir in &dirs {
        let mut h = header(EntryType::Directory, 0o755, 0, mtime);
        builder.append_data(&mut h, format!("{}/", dir), io::empty())?;
    }

    for entry in bom.entries() {
        let path = root.join(&entry.path);
        let handle = File::open(&path).map_err(|e| Error::TreeUnreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let metadata = handle.metadata()?;
        if metadata.len() != entry.size {
            return Err(Error::ChecksumMismatch {
                subject: format!("{} (changed while archiving)", root.display()),
                paths: vec![entry.path.clone()],
            });
        }
        let mut h = header(EntryType::Regular, file_mode(&metadata), entry.size, mtime);
        builder.append_data(&mut h, &entry.path, handle.take(entry.size))?;
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| Error::IoError(e.to_string()))?
        .sync_all()?;

    debug!(
        "Wrote archive {} ({} files, {} dirs)",
        output.display(),
        bom.len(),
        dirs.len()
    );
    Ok(())
}

/// Extract a bundle archive into `dest`
///
/// Any entry that is not a regular file or directory, or whose path escapes
/// `dest`, makes the whole archive invalid.
pub fn extract_archive(archive: &Path, dest: &Path, bundle: &str) -> Result<()> {
    let invalid = |reason: String| Error::BundleStructureInvalid {
        bundle: bundle.to_string(),
        reason,
    };

    fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    tar.set_unpack_xattrs(false);

    let entries = tar
        .entries()
        .map_err(|e| invalid(format!("unreadable archive: {}", e)))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| invalid(format!("corrupt archive entry: {}", e)))?;

        let entry_type = entry.header().entry_type();
        let raw_path = entry
            .path()
            .map_err(|e| invalid(format!("bad entry path: {}", e)))?
            .to_string_lossy()
            .into_owned();

        match entry_type {
            EntryType::Regular | EntryType::Directory => {}
            other => {
                return Err(invalid(format!(
                    "unsupported entry type {:?} for {}",
                    other, raw_path
                )));
            }
        }

        if raw_path.trim_end_matches('/') == "." {
            continue;
        }
        sanitize_relative(&raw_path)
            .map_err(|_| invalid(format!("entry escapes archive root: {}", raw_path)))?;

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| invalid(format!("failed to extract {}: {}", raw_path, e)))?;
        if !unpacked {
            return Err(invalid(format!("entry escapes archive root: {}", raw_path)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_file;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("Packages/sub")).unwrap();
        fs::write(tmp.path().join("Packages/a.rpm"), b"aaaa").unwrap();
        fs::write(tmp.path().join("Packages/sub/b.rpm"), b"bb").unwrap();
        fs::write(tmp.path().join("README"), b"readme").unwrap();
        tmp
    }

    #[test]
    fn test_archive_is_deterministic() {
        let src = tree();
        let out = TempDir::new().unwrap();
        let bom = BillOfMaterials::generate(src.path()).unwrap();

        let a = out.path().join("a.tar.gz");
        let b = out.path().join("b.tar.gz");
        write_archive(src.path(), &bom, &a).unwrap();
        write_archive(src.path(), &bom, &b).unwrap();
        assert_eq!(sha256_file(&a).unwrap().0, sha256_file(&b).unwrap().0);
    }

    #[test]
    fn test_extract_roundtrip() {
        let src = tree();
        let out = TempDir::new().unwrap();
        let bom = BillOfMaterials::generate(src.path()).unwrap();
        let archive = out.path().join("x.tar.gz");
        write_archive(src.path(), &bom, &archive).unwrap();

        let dest = out.path().join("dest");
        extract_archive(&archive, &dest, "x").unwrap();
        bom.verify_tree(&dest, "x").unwrap();
        assert_eq!(fs::read(dest.join("Packages/sub/b.rpm")).unwrap(), b"bb");
    }

    #[test]
    fn test_extract_rejects_symlink_entries() {
        let out = TempDir::new().unwrap();
        let archive = out.path().join("evil.tar.gz");
        {
            let file = File::create(&archive).unwrap();
            let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
            let mut h = Header::new_gnu();
            h.set_entry_type(EntryType::Symlink);
            h.set_size(0);
            h.set_mode(0o777);
            builder.append_link(&mut h, "link", "/etc/passwd").unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let err = extract_archive(&archive, &out.path().join("dest"), "evil").unwrap_err();
        assert!(matches!(err, Error::BundleStructureInvalid { .. }));
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let out = TempDir::new().unwrap();
        let archive = out.path().join("junk.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();
        let err = extract_archive(&archive, &out.path().join("dest"), "junk").unwrap_err();
        assert!(matches!(err, Error::BundleStructureInvalid { .. }));
    }
}
