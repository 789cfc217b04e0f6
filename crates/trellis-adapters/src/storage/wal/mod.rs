//! Write-ahead log.
//!
//! A committed transaction is appended as one [`WalRecord`] before its
//! versions become visible, so a crash never loses an acknowledged commit.
//! On open, [`WalRecovery`] replays the intact prefix on top of the last
//! snapshot.
//!
//! | Durability mode | What it does |
//! | --------------- | ------------ |
//! | [`Sync`](DurabilityMode::Sync) | fsync on every commit |
//! | [`Adaptive`](DurabilityMode::Adaptive) | background fsync by an [`AdaptiveFlusher`] |
//! | [`NoSync`](DurabilityMode::NoSync) | left to the OS |

mod flusher;
mod log;
mod record;
mod recovery;

pub use flusher::{AdaptiveFlusher, FlusherStats};
pub use log::{DurabilityMode, FRAME_HEADER_LEN, WalConfig, WalManager};
pub use record::WalRecord;
pub(crate) use record::{decode, encode};
pub use recovery::{RecoveredLog, WalRecovery};
