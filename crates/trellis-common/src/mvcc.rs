//! MVCC (Multi-Version Concurrency Control) primitives.
//!
//! Every node and relationship owns a [`VersionChain`]. A writer never edits
//! a version another snapshot may be looking at: it pushes a new version
//! stamped [`EpochId::PENDING`] and marks the superseded one as deleted by
//! itself. Commit rewrites the pending stamps to the commit epoch; rollback
//! drops the writer's versions and clears its deletion marks. Readers pick
//! the newest version visible to `(snapshot epoch, own tx)`.

use std::collections::VecDeque;

use crate::types::{EpochId, TxId};

/// Tracks when a version was created and deleted, and by whom.
#[derive(Debug, Clone, Copy)]
pub struct VersionInfo {
    pub created_epoch: EpochId,
    pub created_by: TxId,
    /// Set once some transaction deletes or supersedes this version.
    pub deleted_epoch: Option<EpochId>,
    pub deleted_by: Option<TxId>,
}

impl VersionInfo {
    #[must_use]
    pub fn new(created_epoch: EpochId, created_by: TxId) -> Self {
        Self {
            created_epoch,
            created_by,
            deleted_epoch: None,
            deleted_by: None,
        }
    }

    /// Checks if this version is visible to a transaction reading at
    /// `viewing_epoch`.
    ///
    /// A transaction sees its own creations and never its own deletions.
    /// Everything else is decided by committed epochs alone, so pending work
    /// of other transactions is invisible.
    #[must_use]
    pub fn is_visible_to(&self, viewing_epoch: EpochId, viewing_tx: TxId) -> bool {
        let own = viewing_tx.is_valid();
        let created = (own && self.created_by == viewing_tx)
            || self.created_epoch.is_visible_at(viewing_epoch);
        if !created {
            return false;
        }
        if own && self.deleted_by == Some(viewing_tx) {
            return false;
        }
        !self
            .deleted_epoch
            .is_some_and(|deleted| deleted.is_visible_at(viewing_epoch))
    }

    /// Visibility for a reader that owns no transaction.
    #[must_use]
    pub fn is_visible_at(&self, epoch: EpochId) -> bool {
        self.is_visible_to(epoch, TxId::INVALID)
    }

    fn is_pending_for(&self, tx: TxId) -> bool {
        self.created_by == tx && self.created_epoch.is_pending()
    }
}

/// A single version of data.
#[derive(Debug, Clone)]
pub struct Version<T> {
    pub info: VersionInfo,
    pub data: T,
}

/// All versions of a single entity, newest first.
#[derive(Debug, Clone)]
pub struct VersionChain<T> {
    versions: VecDeque<Version<T>>,
}

impl<T> VersionChain<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            versions: VecDeque::new(),
        }
    }

    /// Creates a chain whose only version was written by `created_by`.
    ///
    /// Pass [`EpochId::PENDING`] for a live insert and a real epoch when
    /// loading already-committed data.
    #[must_use]
    pub fn with_initial(data: T, created_epoch: EpochId, created_by: TxId) -> Self {
        let mut chain = Self::new();
        chain.add_version(data, created_epoch, created_by);
        chain
    }

    /// Pushes a new head version.
    pub fn add_version(&mut self, data: T, created_epoch: EpochId, created_by: TxId) {
        self.versions.push_front(Version {
            info: VersionInfo::new(created_epoch, created_by),
            data,
        });
    }

    /// Finds the version a transaction reading at `epoch` sees.
    #[must_use]
    pub fn visible_to(&self, epoch: EpochId, tx: TxId) -> Option<&T> {
        self.versions
            .iter()
            .find(|v| v.info.is_visible_to(epoch, tx))
            .map(|v| &v.data)
    }

    #[must_use]
    pub fn visible_at(&self, epoch: EpochId) -> Option<&T> {
        self.visible_to(epoch, TxId::INVALID)
    }

    /// The newest committed version that no committed transaction deleted.
    #[must_use]
    pub fn latest_committed(&self) -> Option<&T> {
        self.visible_at(EpochId::new(u64::MAX - 1))
    }

    /// Marks the version visible to `tx` as deleted by `tx`.
    ///
    /// Returns `false` if nothing is visible.
    pub fn mark_deleted(&mut self, epoch: EpochId, tx: TxId) -> bool {
        match self.versions.iter_mut().find(|v| v.info.is_visible_to(epoch, tx)) {
            Some(version) => {
                version.info.deleted_epoch = Some(EpochId::PENDING);
                version.info.deleted_by = Some(tx);
                true
            }
            None => false,
        }
    }

    /// Checks if `tx` created or deleted any version in this chain.
    #[must_use]
    pub fn modified_by(&self, tx: TxId) -> bool {
        self.versions
            .iter()
            .any(|v| v.info.created_by == tx || v.info.deleted_by == Some(tx))
    }

    /// First-updater-wins check for a writer whose snapshot is `start_epoch`.
    ///
    /// Conflicts with anything another transaction committed after the
    /// snapshot and with anything another transaction still has pending.
    #[must_use]
    pub fn has_conflict(&self, start_epoch: EpochId, our_tx: TxId) -> bool {
        self.versions.iter().any(|v| {
            let created = v.info.created_by != our_tx && v.info.created_epoch > start_epoch;
            let deleted = v.info.deleted_by.is_some_and(|by| by != our_tx)
                && v.info.deleted_epoch.is_some_and(|e| e > start_epoch);
            created || deleted
        })
    }

    /// Stamps every pending change of `tx` with the commit epoch.
    pub fn finalize(&mut self, tx: TxId, commit_epoch: EpochId) {
        for version in &mut self.versions {
            if version.info.is_pending_for(tx) {
                version.info.created_epoch = commit_epoch;
            }
            if version.info.deleted_by == Some(tx) {
                version.info.deleted_epoch = Some(commit_epoch);
            }
        }
    }

    /// Discards every change of `tx`. Returns true if the chain is now empty.
    pub fn rollback(&mut self, tx: TxId) -> bool {
        self.versions.retain(|v| !v.info.is_pending_for(tx));
        for version in &mut self.versions {
            if version.info.deleted_by == Some(tx) {
                version.info.deleted_by = None;
                version.info.deleted_epoch = None;
            }
        }
        self.versions.is_empty()
    }

    /// Drops versions no snapshot at or after `min_epoch` can see.
    ///
    /// Returns true if the chain is now empty and the entity can be removed.
    pub fn gc(&mut self, min_epoch: EpochId) -> bool {
        self.versions.retain(|v| {
            !v.info
                .deleted_epoch
                .is_some_and(|deleted| deleted.is_visible_at(min_epoch))
        });
        self.versions.is_empty()
    }

    #[must_use]
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// The head version regardless of visibility.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.versions.front().map(|v| &v.data)
    }
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> VersionChain<T> {
    /// Gets a mutable reference to the data `tx` sees, copying on first write.
    ///
    /// A version `tx` itself created is edited in place. Otherwise the visible
    /// version is marked superseded by `tx` and a pending copy becomes the head.
    pub fn get_mut(&mut self, epoch: EpochId, tx: TxId) -> Option<&mut T> {
        let idx = self
            .versions
            .iter()
            .position(|v| v.info.is_visible_to(epoch, tx))?;

        if self.versions[idx].info.is_pending_for(tx) {
            return Some(&mut self.versions[idx].data);
        }

        let copy = self.versions[idx].data.clone();
        let old = &mut self.versions[idx].info;
        old.deleted_epoch = Some(EpochId::PENDING);
        old.deleted_by = Some(tx);
        self.add_version(copy, EpochId::PENDING, tx);
        self.versions.front_mut().map(|v| &mut v.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TxId = TxId(2);
    const T2: TxId = TxId(3);

    #[test]
    fn test_version_chain_basic() {
        let chain = VersionChain::with_initial("v1", EpochId::new(1), T1);

        assert_eq!(chain.visible_at(EpochId::new(1)), Some(&"v1"));
        assert_eq!(chain.visible_at(EpochId::new(5)), Some(&"v1"));
        assert_eq!(chain.visible_at(EpochId::INITIAL), None);
    }

    #[test]
    fn test_pending_insert_visible_only_to_writer() {
        let mut chain = VersionChain::with_initial(10, EpochId::PENDING, T1);

        assert_eq!(chain.visible_to(EpochId::new(3), T1), Some(&10));
        assert_eq!(chain.visible_to(EpochId::new(3), T2), None);
        assert_eq!(chain.latest_committed(), None);

        chain.finalize(T1, EpochId::new(4));
        assert_eq!(chain.visible_at(EpochId::new(3)), None);
        assert_eq!(chain.visible_at(EpochId::new(4)), Some(&10));
    }

    #[test]
    fn test_copy_on_write_update() {
        let mut chain = VersionChain::with_initial(1, EpochId::new(1), T1);

        *chain.get_mut(EpochId::new(1), T2).unwrap() = 2;
        assert_eq!(chain.version_count(), 2);

        // A second write by the same transaction edits its own copy.
        *chain.get_mut(EpochId::new(1), T2).unwrap() = 3;
        assert_eq!(chain.version_count(), 2);

        assert_eq!(chain.visible_to(EpochId::new(1), T2), Some(&3));
        assert_eq!(chain.visible_at(EpochId::new(1)), Some(&1));

        chain.finalize(T2, EpochId::new(2));
        assert_eq!(chain.visible_at(EpochId::new(1)), Some(&1));
        assert_eq!(chain.visible_at(EpochId::new(2)), Some(&3));
    }

    #[test]
    fn test_update_then_delete_in_one_transaction() {
        let mut chain = VersionChain::with_initial("a", EpochId::new(1), T1);
        *chain.get_mut(EpochId::new(1), T2).unwrap() = "b";
        assert!(chain.mark_deleted(EpochId::new(1), T2));

        assert_eq!(chain.visible_to(EpochId::new(1), T2), None);
        assert_eq!(chain.visible_at(EpochId::new(1)), Some(&"a"));

        chain.finalize(T2, EpochId::new(2));
        assert_eq!(chain.visible_at(EpochId::new(2)), None);
        assert_eq!(chain.visible_at(EpochId::new(1)), Some(&"a"));
    }

    #[test]
    fn test_rollback() {
        let mut chain = VersionChain::with_initial(1, EpochId::new(1), T1);
        *chain.get_mut(EpochId::new(1), T2).unwrap() = 2;
        assert!(chain.modified_by(T2));

        assert!(!chain.rollback(T2));
        assert_eq!(chain.version_count(), 1);
        assert!(!chain.modified_by(T2));
        assert_eq!(chain.visible_at(EpochId::new(5)), Some(&1));

        let mut fresh = VersionChain::with_initial(1, EpochId::PENDING, T2);
        assert!(fresh.rollback(T2));
    }

    #[test]
    fn test_conflict_detection() {
        let mut chain = VersionChain::with_initial(1, EpochId::new(1), T1);
        assert!(!chain.has_conflict(EpochId::new(1), T2));

        *chain.get_mut(EpochId::new(1), T1).unwrap() = 2;
        chain.finalize(T1, EpochId::new(2));

        // T2 started at epoch 1 and must not overwrite what T1 committed at 2.
        assert!(chain.has_conflict(EpochId::new(1), T2));
        assert!(!chain.has_conflict(EpochId::new(2), T2));
    }

    #[test]
    fn test_gc() {
        let mut chain = VersionChain::with_initial(1, EpochId::new(1), T1);
        *chain.get_mut(EpochId::new(1), T2).unwrap() = 2;
        chain.finalize(T2, EpochId::new(3));

        assert!(!chain.gc(EpochId::new(2)));
        assert_eq!(chain.version_count(), 2);

        assert!(!chain.gc(EpochId::new(3)));
        assert_eq!(chain.version_count(), 1);
        assert_eq!(chain.latest(), Some(&2));

        chain.mark_deleted(EpochId::new(3), T1);
        chain.finalize(T1, EpochId::new(4));
        assert!(chain.gc(EpochId::new(4)));
    }
}
