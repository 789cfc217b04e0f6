//! A store directory on disk: meta file, lock, snapshot and WAL together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use trellis_common::types::{EpochId, TxId};
use trellis_common::utils::error::{Error, Result};
use trellis_core::graph::{Mutation, StoreSnapshot};

use super::lock::LockFile;
use super::meta::StoreMeta;
use super::snapshot::SnapshotFile;
use super::wal::{AdaptiveFlusher, DurabilityMode, WalConfig, WalManager, WalRecord, WalRecovery};

pub const WAL_FILE: &str = "wal.log";

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryOptions {
    pub read_only: bool,
    pub durability: DurabilityMode,
}

/// State found on disk at open time.
#[derive(Debug, Default)]
pub struct Recovered {
    pub snapshot: Option<SnapshotFile>,
    /// Commits newer than the snapshot, in order.
    pub commits: Vec<WalRecord>,
    /// Bytes of torn or corrupt WAL tail that were dropped.
    pub discarded_bytes: u64,
}

impl Recovered {
    /// The epoch the store reaches once everything is applied.
    #[must_use]
    pub fn last_epoch(&self) -> EpochId {
        let base = self.snapshot.as_ref().map_or(EpochId::INITIAL, |s| s.epoch);
        self.commits.iter().map(WalRecord::epoch).fold(base, EpochId::max)
    }
}

/// An opened store directory.
///
/// Writable directories hold the lock file and a WAL writer until
/// [`close`](Self::close); read-only ones hold nothing.
#[derive(Debug)]
pub struct StoreDirectory {
    root: PathBuf,
    read_only: bool,
    wal: Option<Arc<WalManager>>,
    flusher: Mutex<Option<AdaptiveFlusher>>,
    lock: Mutex<Option<LockFile>>,
}

fn open_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::StorageOpen(format!("{context}: {err}"))
}

impl StoreDirectory {
    /// Opens or creates the store at `root` and reads back its contents.
    ///
    /// # Errors
    ///
    /// `StorageOpen` when the path is not a directory, holds something other
    /// than a Trellis store, is locked by another process, cannot be read, or
    /// (read-only) does not exist. Nothing acquired here outlives a failure.
    pub fn open(root: impl AsRef<Path>, options: DirectoryOptions) -> Result<(Self, Recovered)> {
        let root = root.as_ref().to_path_buf();
        let shown = root.display().to_string();

        match std::fs::metadata(&root) {
            Ok(meta) if !meta.is_dir() => {
                return Err(Error::StorageOpen(format!("{shown} exists and is not a directory")));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if options.read_only {
                    return Err(Error::StorageOpen(format!("no database at {shown} to open read-only")));
                }
                std::fs::create_dir_all(&root).map_err(|e| open_error(&format!("cannot create {shown}"), e))?;
            }
            Err(e) => return Err(open_error(&format!("cannot access {shown}"), e)),
        }

        let meta = StoreMeta::read(&root)?;
        if meta.is_none() {
            let mut entries = std::fs::read_dir(&root).map_err(|e| open_error(&format!("cannot list {shown}"), e))?;
            if entries.next().is_some() {
                return Err(Error::StorageOpen(format!(
                    "{shown} is not empty and is not a Trellis database"
                )));
            }
            if options.read_only {
                return Err(Error::StorageOpen(format!("no database at {shown} to open read-only")));
            }
        }

        let lock = if options.read_only {
            None
        } else {
            Some(LockFile::acquire(&root)?)
        };
        if meta.is_none() {
            StoreMeta::current()
                .write(&root)
                .map_err(|e| open_error(&format!("cannot initialize {shown}"), e))?;
            tracing::info!(path = %shown, "created new store");
        }

        let snapshot = SnapshotFile::read(&root)?;
        let snapshot_epoch = snapshot.as_ref().map_or(EpochId::INITIAL, |s| s.epoch);

        let wal_path = root.join(WAL_FILE);
        let recovery = if options.read_only {
            WalRecovery::new(&wal_path).read_only()
        } else {
            WalRecovery::new(&wal_path)
        };
        let log = recovery.recover().map_err(|e| open_error("cannot read WAL", e))?;
        let commits: Vec<WalRecord> = log
            .records
            .into_iter()
            .filter(|r| matches!(r, WalRecord::Commit { epoch, .. } if *epoch > snapshot_epoch))
            .collect();

        let (wal, flusher) = if options.read_only {
            (None, None)
        } else {
            let wal = Arc::new(
                WalManager::with_config(
                    &wal_path,
                    WalConfig {
                        durability: options.durability,
                    },
                )
                .map_err(|e| open_error("cannot open WAL", e))?,
            );
            let flusher = match options.durability {
                DurabilityMode::Adaptive { target_interval_ms } => {
                    Some(AdaptiveFlusher::start(Arc::clone(&wal), target_interval_ms)?)
                }
                DurabilityMode::Sync | DurabilityMode::NoSync => None,
            };
            (Some(wal), flusher)
        };

        tracing::debug!(
            path = %shown,
            snapshot_epoch = snapshot_epoch.as_u64(),
            commits = commits.len(),
            "store directory opened"
        );

        let directory = Self {
            root,
            read_only: options.read_only,
            wal,
            flusher: Mutex::new(flusher),
            lock: Mutex::new(lock),
        };
        let recovered = Recovered {
            snapshot,
            commits,
            discarded_bytes: log.discarded,
        };
        Ok((directory, recovered))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn wal(&self) -> Result<&WalManager> {
        self.wal
            .as_deref()
            .ok_or_else(|| Error::execution("store was opened read-only"))
    }

    /// Logs a committed transaction. Must succeed before the commit is published.
    pub fn log_commit(&self, tx_id: TxId, epoch: EpochId, mutations: Vec<Mutation>) -> Result<u64> {
        self.wal()?.append(&WalRecord::Commit {
            tx_id,
            epoch,
            mutations,
        })
    }

    /// Writes a full snapshot and empties the WAL.
    pub fn checkpoint(&self, store: StoreSnapshot, epoch: EpochId) -> Result<()> {
        let wal = self.wal()?;
        let bytes = SnapshotFile { epoch, store }.write(&self.root)?;
        wal.truncate()?;
        wal.append(&WalRecord::Checkpoint { epoch })?;
        tracing::info!(path = %self.root.display(), epoch = epoch.as_u64(), bytes, "checkpoint written");
        Ok(())
    }

    /// Current WAL size in bytes (0 when read-only).
    #[must_use]
    pub fn wal_size(&self) -> u64 {
        self.wal.as_ref().map_or(0, |w| w.size())
    }

    /// Stops the flusher, syncs the WAL and releases the lock. Idempotent.
    pub fn close(&self) -> Result<()> {
        if let Some(mut flusher) = self.flusher.lock().take() {
            flusher.shutdown()?;
        }
        if let Some(wal) = &self.wal {
            wal.sync()?;
        }
        drop(self.lock.lock().take());
        Ok(())
    }
}

impl Drop for StoreDirectory {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.root.display(), "error closing store directory: {e}");
        }
    }
}
