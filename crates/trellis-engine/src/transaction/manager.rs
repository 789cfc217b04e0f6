//! Transaction manager.
//!
//! Hands out transaction ids, tracks the published epoch and guards the
//! single writer slot. Conflict detection on individual entities lives in the
//! store's version chains; this type only decides who may write at all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use trellis_common::types::{EpochId, TxId};
use trellis_common::utils::error::{Error, Result, TransactionError};
use trellis_common::utils::hash::{FxHashMap, fx_map};
use trellis_core::TxView;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Information about an active transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxInfo {
    pub state: TxState,
    /// Snapshot epoch for reads.
    pub start_epoch: EpochId,
}

/// Manages transaction ids, epochs and the writer slot.
pub struct TransactionManager {
    next_tx_id: AtomicU64,
    current_epoch: AtomicU64,
    transactions: RwLock<FxHashMap<TxId, TxInfo>>,
    /// The one transaction allowed to write, if any.
    writer: Mutex<Option<TxId>>,
    /// Epochs read by open auto-commit cursors, with reference counts.
    pins: Mutex<BTreeMap<EpochId, usize>>,
}

impl TransactionManager {
    /// Creates a manager whose first snapshot is `epoch`.
    #[must_use]
    pub fn new(epoch: EpochId) -> Self {
        Self {
            // TxId 0 is invalid and 1 belongs to recovery; user transactions start at 2.
            next_tx_id: AtomicU64::new(2),
            current_epoch: AtomicU64::new(epoch.as_u64()),
            transactions: RwLock::new(fx_map()),
            writer: Mutex::new(None),
            pins: Mutex::new(BTreeMap::new()),
        }
    }

    /// Begins a transaction reading at the current epoch.
    pub fn begin(&self) -> TxId {
        let tx_id = TxId::new(self.next_tx_id.fetch_add(1, Ordering::Relaxed));
        // Read the epoch under the lock so min_active_epoch never misses it.
        let mut transactions = self.transactions.write();
        let start_epoch = self.current_epoch();
        transactions.insert(
            tx_id,
            TxInfo {
                state: TxState::Active,
                start_epoch,
            },
        );
        drop(transactions);
        tracing::trace!(tx = %tx_id, epoch = %start_epoch, "begin");
        tx_id
    }

    fn active(&self, tx_id: TxId) -> Result<TxInfo> {
        let info = self
            .transactions
            .read()
            .get(&tx_id)
            .copied()
            .ok_or_else(|| Error::Transaction(TransactionError::InvalidState("Transaction not found".into())))?;
        if info.state != TxState::Active {
            return Err(Error::Transaction(TransactionError::InvalidState(
                "Transaction is not active".into(),
            )));
        }
        Ok(info)
    }

    /// The view a statement of `tx_id` reads and writes through.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is unknown or already finished.
    pub fn view(&self, tx_id: TxId) -> Result<TxView> {
        let info = self.active(tx_id)?;
        Ok(TxView::new(info.start_epoch, tx_id))
    }

    /// Claims the writer slot for `tx_id`. Never waits.
    ///
    /// # Errors
    ///
    /// Returns a write conflict if another transaction holds the slot.
    pub fn acquire_writer(&self, tx_id: TxId) -> Result<()> {
        self.active(tx_id)?;
        let mut writer = self.writer.lock();
        match *writer {
            Some(holder) if holder != tx_id => Err(Error::Transaction(TransactionError::WriteConflict(
                format!("transaction {holder} holds the write lock"),
            ))),
            _ => {
                *writer = Some(tx_id);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn holds_writer(&self, tx_id: TxId) -> bool {
        *self.writer.lock() == Some(tx_id)
    }

    /// The epoch the writer's commit will be stamped with.
    ///
    /// # Errors
    ///
    /// Fails if `tx_id` does not hold the writer slot.
    pub fn commit_epoch(&self, tx_id: TxId) -> Result<EpochId> {
        if !self.holds_writer(tx_id) {
            return Err(Error::Transaction(TransactionError::InvalidState(
                "Transaction does not hold the write lock".into(),
            )));
        }
        Ok(self.current_epoch().next())
    }

    /// Makes everything stamped with `epoch` visible to new snapshots.
    pub fn publish(&self, epoch: EpochId) {
        self.current_epoch.fetch_max(epoch.as_u64(), Ordering::AcqRel);
    }

    /// Ends a transaction and releases the writer slot if it held it.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is unknown or already finished.
    pub fn finish(&self, tx_id: TxId, state: TxState) -> Result<()> {
        self.active(tx_id)?;
        self.transactions.write().remove(&tx_id);
        let mut writer = self.writer.lock();
        if *writer == Some(tx_id) {
            *writer = None;
        }
        tracing::trace!(tx = %tx_id, ?state, "finished");
        Ok(())
    }

    #[must_use]
    pub fn current_epoch(&self) -> EpochId {
        EpochId::new(self.current_epoch.load(Ordering::Acquire))
    }

    /// Pins the current epoch, keeping the versions visible there alive
    /// until the pin drops.
    ///
    /// The epoch is read and registered under one lock, so a concurrent
    /// [`min_active_epoch`](Self::min_active_epoch) either sees the pin or
    /// was computed before the epoch it pins was read.
    #[must_use]
    pub fn pin_current(self: &Arc<Self>) -> SnapshotPin {
        let mut pins = self.pins.lock();
        let epoch = self.current_epoch();
        *pins.entry(epoch).or_insert(0) += 1;
        drop(pins);
        SnapshotPin {
            manager: Arc::clone(self),
            epoch,
        }
    }

    fn unpin(&self, epoch: EpochId) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&epoch) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&epoch);
            }
        }
    }

    /// The oldest epoch any transaction or open cursor still reads.
    #[must_use]
    pub fn min_active_epoch(&self) -> EpochId {
        let pins = self.pins.lock();
        let transactions = self.transactions.read();
        let current = self.current_epoch();
        let tx_min = transactions.values().map(|t| t.start_epoch).min();
        let pin_min = pins.keys().next().copied();
        [Some(current), tx_min, pin_min]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(current)
    }

    /// Number of transactions not yet committed or rolled back.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.transactions.read().len()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("current_epoch", &self.current_epoch())
            .field("active", &self.active_count())
            .field("writer", &*self.writer.lock())
            .finish()
    }
}

/// Registration of a read snapshot; see [`TransactionManager::pin_current`].
pub struct SnapshotPin {
    manager: Arc<TransactionManager>,
    epoch: EpochId,
}

impl SnapshotPin {
    #[must_use]
    pub fn epoch(&self) -> EpochId {
        self.epoch
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.manager.unpin(self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_commit() {
        let mgr = TransactionManager::new(EpochId::INITIAL);
        let tx = mgr.begin();
        assert_eq!(mgr.active_count(), 1);
        mgr.acquire_writer(tx).unwrap();
        let epoch = mgr.commit_epoch(tx).unwrap();
        assert_eq!(epoch, EpochId::new(1));
        mgr.publish(epoch);
        mgr.finish(tx, TxState::Committed).unwrap();
        assert_eq!(mgr.current_epoch(), EpochId::new(1));
        assert_eq!(mgr.active_count(), 0);
        assert!(!mgr.holds_writer(tx));
    }

    #[test]
    fn test_finish_twice_is_invalid() {
        let mgr = TransactionManager::new(EpochId::INITIAL);
        let tx = mgr.begin();
        mgr.finish(tx, TxState::Aborted).unwrap();
        let err = mgr.finish(tx, TxState::Aborted).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::InvalidState(_))));
    }

    #[test]
    fn test_writer_slot_fails_fast() {
        let mgr = TransactionManager::new(EpochId::INITIAL);
        let a = mgr.begin();
        let b = mgr.begin();
        mgr.acquire_writer(a).unwrap();
        mgr.acquire_writer(a).unwrap();
        let err = mgr.acquire_writer(b).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::WriteConflict(_))));
        assert!(mgr.commit_epoch(b).is_err());

        mgr.finish(a, TxState::Aborted).unwrap();
        mgr.acquire_writer(b).unwrap();
    }

    #[test]
    fn test_start_epoch_snapshot() {
        let mgr = TransactionManager::new(EpochId::new(5));
        let reader = mgr.begin();
        mgr.publish(EpochId::new(6));
        let later = mgr.begin();
        assert_eq!(mgr.view(reader).unwrap().epoch, EpochId::new(5));
        assert_eq!(mgr.view(later).unwrap().epoch, EpochId::new(6));
    }

    #[test]
    fn test_min_active_epoch() {
        let mgr = Arc::new(TransactionManager::new(EpochId::new(3)));
        assert_eq!(mgr.min_active_epoch(), EpochId::new(3));

        let pin = mgr.pin_current();
        assert_eq!(pin.epoch(), EpochId::new(3));
        mgr.publish(EpochId::new(4));
        let tx = mgr.begin();
        assert_eq!(mgr.min_active_epoch(), EpochId::new(3));

        drop(pin);
        assert_eq!(mgr.min_active_epoch(), EpochId::new(4));
        mgr.finish(tx, TxState::Committed).unwrap();
        mgr.publish(EpochId::new(7));
        assert_eq!(mgr.min_active_epoch(), EpochId::new(7));
    }

    #[test]
    fn test_pin_current_never_below_reclaim_floor() {
        use std::sync::atomic::AtomicBool;

        let mgr = Arc::new(TransactionManager::new(EpochId::new(1)));
        let done = AtomicBool::new(false);
        // Highest epoch any vacuum pass was allowed to reclaim up to.
        let floor = AtomicU64::new(0);

        std::thread::scope(|s| {
            s.spawn(|| {
                for epoch in 2..20_000 {
                    mgr.publish(EpochId::new(epoch));
                }
                done.store(true, Ordering::Release);
            });
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    floor.fetch_max(mgr.min_active_epoch().as_u64(), Ordering::AcqRel);
                }
            });
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let pin = mgr.pin_current();
                    assert!(floor.load(Ordering::Acquire) <= pin.epoch().as_u64());
                    assert!(mgr.min_active_epoch() <= pin.epoch());
                }
            });
        });
        assert_eq!(mgr.min_active_epoch(), EpochId::new(19_999));
    }
}
