// src/fsutil.rs

//! Filesystem helpers shared by the packager, verifier and channel manager
//!
//! Every file airlock writes that someone else may read (BOMs, metadata,
//! checksum files) goes through [`write_atomic`]: write a temp file in the
//! same directory, fsync, rename. Directory moves fall back to copy+delete
//! when the source and destination are on different filesystems.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Write bytes to `path` atomically (temp file + fsync + rename)
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".airlock-tmp-")
        .tempfile_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::IoError(e.error.to_string()))?;
    sync_dir(parent);
    Ok(())
}

/// Serialize `value` as pretty JSON (with trailing newline) and write atomically
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

/// Best-effort fsync of a directory so a rename inside it is durable
pub fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        // Not all filesystems support fsync on directories
        let _ = handle.sync_all();
    }
}

/// Move a file or directory, falling back to copy + delete across filesystems
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            log::debug!(
                "Cross-filesystem move detected ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );
            if src.is_dir() {
                copy_tree(src, dst)?;
                fs::remove_dir_all(src)?;
            } else {
                fs::copy(src, dst)?;
                File::open(dst)?.sync_all()?;
                fs::remove_file(src)?;
            }
            if let Some(parent) = dst.parent() {
                sync_dir(parent);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Recursively copy a tree of directories and regular files
///
/// Symlinks and special files are not carried; content trees are plain files.
/// File permissions are preserved by `fs::copy`.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            log::warn!("Not copying non-regular file {}", entry.path().display());
        }
    }
    Ok(())
}

/// Convert a path relative to `root` into a `/`-separated UTF-8 string
pub fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| Error::TreeUnreadable {
        path: path.to_path_buf(),
        reason: format!("not under {}", root.display()),
    })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(c) => parts.push(c.to_str().ok_or_else(|| {
                Error::TreeUnreadable {
                    path: path.to_path_buf(),
                    reason: "path is not valid UTF-8".to_string(),
                }
            })?),
            _ => {
                return Err(Error::TreeUnreadable {
                    path: path.to_path_buf(),
                    reason: "unexpected path component".to_string(),
                })
            }
        }
    }
    Ok(parts.join("/"))
}

/// Validate a relative path read from an untrusted manifest or archive
///
/// Rejects absolute paths, `..`, and empty paths; returns the normalized path.
pub fn sanitize_relative(path: &str) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::ParseError(format!(
                    "path escapes its root: {}",
                    path
                )));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(Error::ParseError("empty path".to_string()));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub/file.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(tmp.path().join("sub"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".airlock-tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_copy_tree_and_move() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/c.txt"), b"c").unwrap();
        fs::write(src.join("top.txt"), b"t").unwrap();

        let copy = tmp.path().join("copy");
        copy_tree(&src, &copy).unwrap();
        assert_eq!(fs::read(copy.join("a/b/c.txt")).unwrap(), b"c");
        assert!(src.join("top.txt").exists());

        let moved = tmp.path().join("moved");
        move_path(&copy, &moved).unwrap();
        assert!(!copy.exists());
        assert_eq!(fs::read(moved.join("top.txt")).unwrap(), b"t");
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/srv/content");
        assert_eq!(
            relative_key(root, Path::new("/srv/content/Packages/a.rpm")).unwrap(),
            "Packages/a.rpm"
        );
        assert!(relative_key(root, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_sanitize_relative() {
        assert_eq!(
            sanitize_relative("./Packages/a.rpm").unwrap(),
            PathBuf::from("Packages/a.rpm")
        );
        assert!(sanitize_relative("../etc/passwd").is_err());
        assert!(sanitize_relative("/etc/passwd").is_err());
        assert!(sanitize_relative("a/../../b").is_err());
        assert!(sanitize_relative("").is_err());
        assert!(sanitize_relative(".").is_err());
    }
}
