//! Reading the log back after a restart.

use std::fs::OpenOptions;
use std::io::Read;
use std::path::{Path, PathBuf};

use trellis_common::utils::error::Result;

use super::WalRecord;
use super::log::FRAME_HEADER_LEN;
use super::record::decode;

/// What recovery found in the log.
#[derive(Debug, Default)]
pub struct RecoveredLog {
    /// Intact records, in append order.
    pub records: Vec<WalRecord>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Bytes past the valid prefix (a torn or corrupt tail).
    pub discarded: u64,
}

/// Replays a log file.
pub struct WalRecovery {
    path: PathBuf,
    truncate_tail: bool,
}

impl WalRecovery {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            truncate_tail: true,
        }
    }

    /// Leave a bad tail on disk instead of cutting it off (for read-only opens).
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.truncate_tail = false;
        self
    }

    /// Reads every intact frame. Stops at the first short, oversized,
    /// checksum-failing or undecodable frame and treats the rest as garbage.
    ///
    /// A missing file is an empty log.
    pub fn recover(&self) -> Result<RecoveredLog> {
        let mut bytes = Vec::new();
        match OpenOptions::new().read(true).open(&self.path) {
            Ok(mut file) => {
                file.read_to_end(&mut bytes)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecoveredLog::default()),
            Err(e) => return Err(e.into()),
        }

        let mut out = RecoveredLog::default();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let Some(record) = read_frame(&bytes[pos..]) else {
                break;
            };
            let (record, frame_len) = record;
            out.records.push(record);
            pos += frame_len;
        }
        out.valid_len = pos as u64;
        out.discarded = (bytes.len() - pos) as u64;

        if out.discarded > 0 {
            tracing::warn!(
                path = %self.path.display(),
                valid = out.valid_len,
                discarded = out.discarded,
                "WAL has a torn or corrupt tail"
            );
            if self.truncate_tail {
                let file = OpenOptions::new().write(true).open(&self.path)?;
                file.set_len(out.valid_len)?;
                file.sync_all()?;
            }
        }
        tracing::debug!(records = out.records.len(), "WAL recovery complete");
        Ok(out)
    }
}

fn read_frame(bytes: &[u8]) -> Option<(WalRecord, usize)> {
    let header = bytes.get(..FRAME_HEADER_LEN)?;
    let len = u32::from_le_bytes(header[0..4].try_into().ok()?) as usize;
    let checksum = u32::from_le_bytes(header[4..8].try_into().ok()?);
    let payload = bytes.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN.checked_add(len)?)?;
    if crc32fast::hash(payload) != checksum {
        return None;
    }
    let record = decode(payload).ok()?;
    Some((record, FRAME_HEADER_LEN + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::WalManager;
    use std::io::Write;
    use tempfile::tempdir;
    use trellis_common::types::{EpochId, TxId};

    fn commit(epoch: u64) -> WalRecord {
        WalRecord::Commit {
            tx_id: TxId::new(epoch + 10),
            epoch: EpochId::new(epoch),
            mutations: Vec::new(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let log = WalRecovery::new(dir.path().join("nope.log")).recover().unwrap();
        assert!(log.records.is_empty());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WalManager::open(&path).unwrap();
        wal.append(&commit(1)).unwrap();
        let good = wal.append(&commit(2)).unwrap();
        drop(wal);

        // Half a frame: a header promising more bytes than follow.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3, 4, 5]).unwrap();
        drop(file);

        let log = WalRecovery::new(&path).recover().unwrap();
        assert_eq!(log.records, vec![commit(1), commit(2)]);
        assert_eq!(log.valid_len, good);
        assert_eq!(log.discarded, 9);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good);
    }

    #[test]
    fn test_corrupt_frame_ends_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WalManager::open(&path).unwrap();
        let first = wal.append(&commit(1)).unwrap();
        wal.append(&commit(2)).unwrap();
        drop(wal);

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let log = WalRecovery::new(&path).read_only().recover().unwrap();
        assert_eq!(log.records, vec![commit(1)]);
        assert_eq!(log.valid_len, first);
        // Read-only recovery leaves the file alone.
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, bytes.len());
    }
}
