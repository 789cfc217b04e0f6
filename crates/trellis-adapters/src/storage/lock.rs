//! Cross-process exclusion for writable stores.
//!
//! The lock is a file created with `create_new` holding the owner's PID. It
//! is removed when the [`LockFile`] drops. A lock left behind by a process
//! that no longer exists is taken over.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use trellis_common::utils::error::{Error, Result};

pub const LOCK_FILE: &str = "lock";

#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Takes the lock in `dir`.
    ///
    /// # Errors
    ///
    /// `StorageOpen` if a live process holds it or the file cannot be created.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        // One retry: the first attempt may find a stale lock and clear it.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    file.sync_all()?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let owner = std::fs::read_to_string(&path)
                        .ok()
                        .and_then(|s| s.trim().parse::<u32>().ok());
                    match owner {
                        Some(pid) if pid != std::process::id() && process_alive(pid) => {
                            return Err(Error::StorageOpen(format!(
                                "{} is locked by process {pid}",
                                dir.display()
                            )));
                        }
                        _ => {
                            tracing::warn!(path = %path.display(), ?owner, "removing stale lock file");
                            std::fs::remove_file(&path)?;
                        }
                    }
                }
                Err(e) => {
                    return Err(Error::StorageOpen(format!("cannot create {}: {e}", path.display())));
                }
            }
        }
        Err(Error::StorageOpen(format!("{} is locked by another process", dir.display())))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove lock file: {e}");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let lock = LockFile::acquire(dir.path()).unwrap();
        let contents = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "not a pid").unwrap();
        let lock = LockFile::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_owner_blocks() {
        let dir = tempdir().unwrap();
        // PID 1 always exists on Linux.
        std::fs::write(dir.path().join(LOCK_FILE), "1").unwrap();
        let err = LockFile::acquire(dir.path()).unwrap_err();
        assert!(err.to_string().contains("locked by process 1"));
    }
}
