//! WAL record types and their binary encoding.

use serde::{Deserialize, Serialize};
use trellis_common::types::{EpochId, TxId};
use trellis_common::utils::error::{Error, Result};
use trellis_core::graph::Mutation;

/// A record in the write-ahead log.
///
/// Only committed work is logged: a transaction's mutations are appended as
/// one record after it has passed every check, so replay never has to undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    /// A committed transaction.
    Commit {
        tx_id: TxId,
        /// The epoch the commit published.
        epoch: EpochId,
        mutations: Vec<Mutation>,
    },

    /// Everything up to `epoch` is in the snapshot.
    Checkpoint { epoch: EpochId },
}

impl WalRecord {
    /// The epoch this record brings the store to.
    #[must_use]
    pub fn epoch(&self) -> EpochId {
        match self {
            Self::Commit { epoch, .. } | Self::Checkpoint { epoch } => *epoch,
        }
    }
}

/// Encodes a value with the standard bincode configuration.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Decodes a value written by [`encode`].
pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(value)
}
