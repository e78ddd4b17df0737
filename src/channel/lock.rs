// src/channel/lock.rs

//! Per-channel exclusive lock
//!
//! Every Publish, Promote and Rollback holds `<channel>/.lock` for its whole
//! duration. The lock is an `flock(LOCK_EX)` on an open file, so the kernel
//! drops it if the holder crashes. A `.lock.pid` sidecar names the holder for
//! diagnostics; finding one when we acquire the lock means the previous holder
//! died without cleaning up.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const LOCK_FILE_NAME: &str = ".lock";
pub const PID_FILE_NAME: &str = ".lock.pid";

/// Upper bound on a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Exclusive lock on one channel, released on drop
pub struct ChannelLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    dir: PathBuf,
    channel: String,
}

impl ChannelLock {
    /// Acquire the lock, retrying with exponential backoff until `timeout`
    ///
    /// A zero timeout means a single attempt. Contention past the deadline is
    /// a `PromotionConflict` naming the holder's PID when known.
    pub fn acquire(dir: &Path, channel: &str, timeout: Duration) -> Result<Self> {
        let lock_path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_millis(50);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let holder = Self::holder_pid(dir);
                        log::warn!(
                            "Channel '{}' still locked after {:?} (holder {:?})",
                            channel,
                            timeout,
                            holder
                        );
                        return Err(Error::PromotionConflict {
                            channel: channel.to_string(),
                            holder,
                        });
                    }
                    let sleep = delay.min(deadline - now);
                    log::debug!("Channel '{}' locked, retrying in {:?}", channel, sleep);
                    std::thread::sleep(sleep);
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    return Err(Error::IoError(format!(
                        "Failed to lock channel '{}': {}",
                        channel, e
                    )));
                }
            }
        }

        let lock = Self {
            file,
            dir: dir.to_path_buf(),
            channel: channel.to_string(),
        };

        if let Some(stale) = Self::holder_pid(dir) {
            log::warn!(
                "Replacing stale lock record for channel '{}' (pid {} exited without releasing)",
                channel,
                stale
            );
        }
        fs::write(dir.join(PID_FILE_NAME), std::process::id().to_string())?;
        log::debug!("Acquired lock on channel '{}'", channel);
        Ok(lock)
    }

    /// PID recorded by the current or last holder
    pub fn holder_pid(dir: &Path) -> Option<u32> {
        fs::read_to_string(dir.join(PID_FILE_NAME))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Whether some process currently holds the lock
    pub fn is_held(dir: &Path) -> bool {
        let Ok(file) = File::open(dir.join(LOCK_FILE_NAME)) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = fs2::FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for ChannelLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.dir.join(PID_FILE_NAME));
        // flock is released when the file is closed
        log::debug!("Released lock on channel '{}'", self.channel);
    }
}
