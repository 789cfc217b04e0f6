//! Full-store snapshots written at checkpoints.
//!
//! `snapshot.bin` is `[crc32 u32 LE][bincode payload]`. It is written to a
//! temporary file and renamed into place, so a crash leaves either the old
//! or the new snapshot.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use trellis_common::types::EpochId;
use trellis_common::utils::error::{Error, Result};
use trellis_core::graph::StoreSnapshot;

use super::wal::{decode, encode};

pub const SNAPSHOT_FILE: &str = "snapshot.bin";
const SNAPSHOT_TMP: &str = "snapshot.bin.tmp";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Every commit up to and including this epoch is in `store`.
    pub epoch: EpochId,
    pub store: StoreSnapshot,
}

impl SnapshotFile {
    pub fn write(&self, dir: &Path) -> Result<u64> {
        let payload = encode(self)?;
        let tmp = dir.join(SNAPSHOT_TMP);
        let mut file = File::create(&tmp)?;
        file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
        sync_dir(dir);
        Ok(payload.len() as u64 + 4)
    }

    /// Reads the snapshot. `Ok(None)` if none was ever written.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(SNAPSHOT_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = || Error::StorageOpen(format!("snapshot {} is corrupt", path.display()));
        let (header, payload) = bytes.split_at_checked(4).ok_or_else(corrupt)?;
        let checksum = u32::from_le_bytes(header.try_into().map_err(|_| corrupt())?);
        if crc32fast::hash(payload) != checksum {
            return Err(corrupt());
        }
        let snapshot = decode(payload)
            .map_err(|e| Error::StorageOpen(format!("cannot decode snapshot {}: {e}", path.display())))?;
        Ok(Some(snapshot))
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), "directory fsync failed: {e}");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        assert!(SnapshotFile::read(dir.path()).unwrap().is_none());

        let file = SnapshotFile {
            epoch: EpochId::new(5),
            store: StoreSnapshot::default(),
        };
        file.write(dir.path()).unwrap();
        let back = SnapshotFile::read(dir.path()).unwrap().unwrap();
        assert_eq!(back.epoch, EpochId::new(5));
        assert!(!dir.path().join(SNAPSHOT_TMP).exists());
    }

    #[test]
    fn test_corrupt_snapshot_fails() {
        let dir = tempdir().unwrap();
        SnapshotFile::default().write(dir.path()).unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(SnapshotFile::read(dir.path()), Err(Error::StorageOpen(_))));

        std::fs::write(&path, [1u8, 2]).unwrap();
        assert!(matches!(SnapshotFile::read(dir.path()), Err(Error::StorageOpen(_))));
    }
}
