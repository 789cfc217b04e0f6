//! The append-only log file.
//!
//! Each record is framed as `[len u32 LE][crc32 u32 LE][payload]`, where the
//! checksum covers the payload only. A frame is either fully present and
//! valid or it marks the end of the log; see [`WalRecovery`](super::WalRecovery).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use trellis_common::utils::error::{Error, Result};

use super::WalRecord;
use super::record::encode;

/// Bytes of framing in front of every payload.
pub const FRAME_HEADER_LEN: usize = 8;

/// When appended records reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurabilityMode {
    /// fsync after every commit.
    #[default]
    Sync,
    /// A background thread fsyncs roughly every `target_interval_ms`.
    Adaptive { target_interval_ms: u64 },
    /// Leave it to the OS.
    NoSync,
}

#[derive(Debug, Clone, Default)]
pub struct WalConfig {
    pub durability: DurabilityMode,
}

/// What the log needs from the file underneath it.
pub(crate) trait LogFile: Write + Send {
    fn set_len(&self, size: u64) -> io::Result<()>;
    fn sync_data(&self) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

impl LogFile for File {
    fn set_len(&self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }

    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

struct LogState {
    file: Box<dyn LogFile>,
    /// Set when a failed append could not be undone. The file may end in a
    /// partial frame, so nothing more may be appended behind it.
    poisoned: Option<String>,
}

impl LogState {
    /// Cuts the file back to `size` after a failed append.
    fn rewind(&mut self, size: u64, cause: &io::Error) {
        match self.file.set_len(size) {
            Ok(()) => tracing::warn!(size, error = %cause, "WAL append failed, partial record removed"),
            Err(e) => {
                tracing::error!(size, error = %cause, truncate_error = %e, "WAL append failed and could not be undone");
                self.poisoned = Some(format!("{cause}; truncating the partial record failed: {e}"));
            }
        }
    }
}

/// Writer for one log file.
///
/// Every append writes one whole frame straight to the file, so the file
/// length always equals [`size`](Self::size). A failed append is cut back
/// off the file before the error is returned.
pub struct WalManager {
    path: PathBuf,
    config: WalConfig,
    log: Mutex<LogState>,
    size: AtomicU64,
    records: AtomicU64,
}

impl WalManager {
    /// Opens (or creates) the log at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, WalConfig::default())
    }

    /// Opens the log and positions the writer at its end.
    ///
    /// Callers are expected to have run recovery first so the file ends on a
    /// frame boundary.
    pub fn with_config(path: impl AsRef<Path>, config: WalConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self::from_file(path, config, Box::new(file), size))
    }

    /// Wraps an already open file of `size` bytes that appends at its end.
    pub(crate) fn from_file(path: PathBuf, config: WalConfig, file: Box<dyn LogFile>, size: u64) -> Self {
        Self {
            path,
            config,
            log: Mutex::new(LogState { file, poisoned: None }),
            size: AtomicU64::new(size),
            records: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn durability(&self) -> DurabilityMode {
        self.config.durability
    }

    /// Appends a record; returns the log size after the append.
    ///
    /// In [`DurabilityMode::Sync`] the record is on disk when this returns.
    /// On error the record is not in the log.
    pub fn append(&self, record: &WalRecord) -> Result<u64> {
        let payload = encode(record)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::Serialization(format!("WAL record of {} bytes is too large", payload.len())))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut log = self.log.lock();
        if let Some(reason) = &log.poisoned {
            return Err(Error::Internal(format!("WAL is unusable after a failed append: {reason}")));
        }
        let start = self.size.load(Ordering::Acquire);
        let mut written = log.file.write_all(&frame);
        if written.is_ok() && self.config.durability == DurabilityMode::Sync {
            written = log.file.sync_data();
        }
        if let Err(e) = written {
            log.rewind(start, &e);
            return Err(e.into());
        }
        let size = start + frame.len() as u64;
        self.size.store(size, Ordering::Release);
        drop(log);

        self.records.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(bytes = frame.len(), size, "appended WAL record");
        Ok(size)
    }

    /// Pushes anything the file layer still holds to the OS.
    pub fn flush(&self) -> Result<()> {
        self.log.lock().file.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs.
    pub fn sync(&self) -> Result<()> {
        let mut log = self.log.lock();
        log.file.flush()?;
        log.file.sync_data()?;
        Ok(())
    }

    /// Empties the log once its contents are covered by a snapshot.
    ///
    /// This also clears the poisoned state: an empty file has no partial frame.
    pub fn truncate(&self) -> Result<()> {
        let mut log = self.log.lock();
        log.file.flush()?;
        log.file.set_len(0)?;
        log.file.sync_all()?;
        log.poisoned = None;
        self.size.store(0, Ordering::Release);
        self.records.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Size of the log in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Records appended through this manager since open or the last truncate.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("path", &self.path)
            .field("durability", &self.config.durability)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex as PMutex;
    use tempfile::tempdir;
    use trellis_common::types::EpochId;

    use super::*;
    use crate::storage::wal::WalRecovery;

    #[test]
    fn test_append_and_size() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path().join("wal.log")).unwrap();
        assert_eq!(wal.size(), 0);
        let size = wal.append(&WalRecord::Checkpoint { epoch: EpochId::new(1) }).unwrap();
        assert!(size > FRAME_HEADER_LEN as u64);
        assert_eq!(std::fs::metadata(wal.path()).unwrap().len(), size);
        assert_eq!(wal.record_count(), 1);
    }

    #[test]
    fn test_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WalManager::open(&path).unwrap();
        wal.append(&WalRecord::Checkpoint { epoch: EpochId::new(1) }).unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.size(), 0);
        wal.append(&WalRecord::Checkpoint { epoch: EpochId::new(2) }).unwrap();
        drop(wal);

        let recovered = WalRecovery::new(&path).recover().unwrap();
        assert_eq!(recovered.records, vec![WalRecord::Checkpoint { epoch: EpochId::new(2) }]);
    }

    /// An in-memory log file whose writes fail once `budget` bytes are used.
    #[derive(Clone, Default)]
    struct FlakyFile {
        bytes: Arc<PMutex<Vec<u8>>>,
        budget: Arc<PMutex<Option<usize>>>,
        refuse_truncate: Arc<PMutex<bool>>,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut budget = self.budget.lock();
            let n = budget.map_or(buf.len(), |left| left.min(buf.len()));
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
            }
            if let Some(left) = budget.as_mut() {
                *left -= n;
            }
            self.bytes.lock().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for FlakyFile {
        fn set_len(&self, size: u64) -> io::Result<()> {
            if *self.refuse_truncate.lock() {
                return Err(io::Error::other("read-only file system"));
            }
            self.bytes.lock().resize(size as usize, 0);
            Ok(())
        }

        fn sync_data(&self) -> io::Result<()> {
            Ok(())
        }

        fn sync_all(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn flaky_wal(file: &FlakyFile) -> WalManager {
        WalManager::from_file(
            PathBuf::from("flaky.log"),
            WalConfig::default(),
            Box::new(file.clone()),
            0,
        )
    }

    fn checkpoint(epoch: u64) -> WalRecord {
        WalRecord::Checkpoint {
            epoch: EpochId::new(epoch),
        }
    }

    #[test]
    fn test_failed_append_leaves_no_partial_frame() {
        let file = FlakyFile::default();
        let wal = flaky_wal(&file);
        let size = wal.append(&checkpoint(1)).unwrap();

        // Room for the header and part of the payload only.
        *file.budget.lock() = Some(FRAME_HEADER_LEN + 1);
        assert!(matches!(wal.append(&checkpoint(2)), Err(Error::Io(_))));
        assert_eq!(wal.size(), size);
        assert_eq!(wal.record_count(), 1);
        assert_eq!(file.bytes.lock().len() as u64, size);

        *file.budget.lock() = None;
        let after = wal.append(&checkpoint(3)).unwrap();
        assert_eq!(file.bytes.lock().len() as u64, after);
        assert_eq!(after, 2 * size);
        // The surviving frames are the first and third records.
        let bytes = file.bytes.lock().clone();
        let second = &bytes[size as usize..];
        let len = u32::from_le_bytes(second[..4].try_into().unwrap()) as usize;
        let payload = &second[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];
        assert_eq!(u32::from_le_bytes(second[4..8].try_into().unwrap()), crc32fast::hash(payload));
        assert_eq!(crate::storage::wal::decode::<WalRecord>(payload).unwrap(), checkpoint(3));
    }

    #[test]
    fn test_append_that_cannot_be_undone_poisons_the_log() {
        let file = FlakyFile::default();
        let wal = flaky_wal(&file);
        *file.budget.lock() = Some(3);
        *file.refuse_truncate.lock() = true;
        assert!(wal.append(&checkpoint(1)).is_err());

        *file.budget.lock() = None;
        let err = wal.append(&checkpoint(2)).unwrap_err();
        assert!(err.to_string().contains("unusable"), "{err}");
        assert_eq!(file.bytes.lock().len(), 3);

        *file.refuse_truncate.lock() = false;
        wal.truncate().unwrap();
        assert!(wal.append(&checkpoint(3)).is_ok());
    }

    #[test]
    fn test_no_sync_needs_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WalManager::with_config(
            &path,
            WalConfig {
                durability: DurabilityMode::NoSync,
            },
        )
        .unwrap();
        wal.append(&WalRecord::Checkpoint { epoch: EpochId::new(1) }).unwrap();
        wal.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), wal.size());
    }
}
