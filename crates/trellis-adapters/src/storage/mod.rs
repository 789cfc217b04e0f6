//! Durable storage for on-disk stores.
//!
//! A store directory contains:
//!
//! | File | Contents |
//! | ---- | -------- |
//! | `trellis.meta` | magic and format version (JSON) |
//! | `snapshot.bin` | the whole graph as of the last checkpoint |
//! | `wal.log` | commits since that checkpoint |
//! | `lock` | PID of the process that has the store open for writing |
//!
//! The format is implementation-defined and may change between versions.

mod directory;
mod lock;
mod meta;
mod snapshot;
pub mod wal;

pub use directory::{DirectoryOptions, Recovered, StoreDirectory, WAL_FILE};
pub use lock::{LOCK_FILE, LockFile};
pub use meta::{FORMAT_VERSION, META_FILE, StoreMeta};
pub use snapshot::{SNAPSHOT_FILE, SnapshotFile};
pub use wal::DurabilityMode;
