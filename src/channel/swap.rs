// src/channel/swap.rs

//! Atomic directory exchange
//!
//! On Linux, `renameat2(RENAME_EXCHANGE)` swaps two directory entries in one
//! step, so a reader of the channel sees either the old tree or the new one.
//! Where the kernel or filesystem refuses the flag we fall back to three
//! renames through a temporary name, which leaves a brief window where the
//! target path does not exist but never exposes a partial tree. If that
//! sequence is cut short, the displaced tree stays parked under
//! [`PARKED_PREFIX`] where [`find_parked`] lets recovery put it back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name prefix of a tree moved aside by the rename fallback
pub const PARKED_PREFIX: &str = ".swap-";

/// Swap the directory entries `a` and `b`; both must exist
pub fn exchange(a: &Path, b: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        match rename_exchange(a, b) {
            Ok(()) => {
                log::debug!("Exchanged {} <-> {}", a.display(), b.display());
                return Ok(());
            }
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::EINVAL) | Some(libc::ENOSYS) | Some(libc::EOPNOTSUPP)
                ) =>
            {
                log::debug!("RENAME_EXCHANGE unsupported here ({}), using rename sequence", e);
            }
            Err(e) => return Err(e),
        }
    }

    exchange_by_rename(a, b)
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn rename_exchange(a: &Path, b: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let a_c = CString::new(a.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let b_c = CString::new(b.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: both pointers come from live CStrings and AT_FDCWD resolves
    // relative paths against the working directory. The kernel reads only the
    // two path strings.
    let ret = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            a_c.as_ptr(),
            libc::AT_FDCWD,
            b_c.as_ptr(),
            libc::RENAME_EXCHANGE,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Three-step fallback: b -> tmp, a -> b, tmp -> a
fn exchange_by_rename(a: &Path, b: &Path) -> io::Result<()> {
    let parent = b.parent().unwrap_or_else(|| Path::new("."));
    let tmp = parent.join(format!("{}{}", PARKED_PREFIX, Uuid::new_v4()));

    fs::rename(b, &tmp)?;
    if let Err(e) = fs::rename(a, b) {
        // Put b back before reporting
        let _ = fs::rename(&tmp, b);
        return Err(e);
    }
    fs::rename(&tmp, a)?;
    Ok(())
}

/// A directory in `parent` left parked by an unfinished rename fallback
pub fn find_parked(parent: &Path) -> io::Result<Option<PathBuf>> {
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(PARKED_PREFIX)
            && entry.file_type()?.is_dir()
        {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}
