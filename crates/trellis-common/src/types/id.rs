//! Identifier types for graph elements, tables and transactions.
//!
//! All identifiers are thin `#[repr(transparent)]` wrappers so they cost
//! nothing over a bare integer but can't be mixed up by accident.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($repr:ty), invalid = $invalid:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        #[repr(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            /// Sentinel value that never names a live object.
            pub const INVALID: Self = Self($invalid);

            #[inline]
            #[must_use]
            pub const fn new(id: $repr) -> Self {
                Self(id)
            }

            #[inline]
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != $invalid
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                } else {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(id: $repr) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $repr {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type! {
    /// Identifier of a node. Assigned sequentially per store, never reused.
    NodeId(u64), invalid = u64::MAX
}

id_type! {
    /// Identifier of a relationship. Shares no space with [`NodeId`].
    EdgeId(u64), invalid = u64::MAX
}

id_type! {
    /// Identifier of a node or rel table in the catalog.
    TableId(u32), invalid = u32::MAX
}

id_type! {
    /// Identifier of a transaction. Monotonically increasing, 0 is invalid.
    TxId(u64), invalid = 0
}

impl NodeId {
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl EdgeId {
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl TxId {
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// A commit timestamp.
///
/// Every committed write transaction advances the store to a new epoch.
/// A reader pinned at epoch `e` sees exactly the versions committed at or
/// before `e`. [`EpochId::PENDING`] marks versions whose writer has not
/// committed yet; no snapshot ever reaches it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[repr(transparent)]
pub struct EpochId(pub u64);

impl EpochId {
    /// The epoch of an empty store.
    pub const INITIAL: Self = Self(0);

    /// Placeholder epoch of uncommitted versions.
    pub const PENDING: Self = Self(u64::MAX);

    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_pending(self) -> bool {
        self.0 == u64::MAX
    }

    /// Checks if this epoch is visible at the given epoch.
    ///
    /// Pending epochs are never visible through this check; a transaction
    /// sees its own pending versions through the writer id instead.
    #[inline]
    #[must_use]
    pub const fn is_visible_at(self, viewing_epoch: Self) -> bool {
        !self.is_pending() && self.0 <= viewing_epoch.0
    }
}

impl fmt::Debug for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pending() {
            write!(f, "EpochId(PENDING)")
        } else {
            write!(f, "EpochId({})", self.0)
        }
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EpochId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_validity() {
        assert!(NodeId::new(0).is_valid());
        assert!(!NodeId::INVALID.is_valid());
        assert!(!EdgeId::INVALID.is_valid());
        assert!(!TableId::INVALID.is_valid());
        assert!(!TxId::INVALID.is_valid());
        assert!(TxId::new(1).is_valid());
    }

    #[test]
    fn test_id_formatting() {
        assert_eq!(format!("{:?}", NodeId::new(7)), "NodeId(7)");
        assert_eq!(format!("{:?}", TxId::INVALID), "TxId(INVALID)");
        assert_eq!(format!("{:?}", EpochId::PENDING), "EpochId(PENDING)");
        assert_eq!(EdgeId::new(12).to_string(), "12");
    }

    #[test]
    fn test_tx_id_next() {
        assert_eq!(TxId::new(2).next(), TxId::new(3));
    }

    #[test]
    fn test_epoch_visibility() {
        let e1 = EpochId::new(1);
        let e2 = EpochId::new(2);

        assert!(e1.is_visible_at(e2));
        assert!(e2.is_visible_at(e2));
        assert!(!e2.is_visible_at(e1));

        // Uncommitted versions never become visible by epoch alone.
        assert!(!EpochId::PENDING.is_visible_at(EpochId::new(u64::MAX - 1)));
        assert!(!EpochId::PENDING.is_visible_at(EpochId::PENDING));
    }

    #[test]
    fn test_conversions() {
        let raw: u64 = NodeId::from(42u64).into();
        assert_eq!(raw, 42);
        let raw: u32 = TableId::from(3u32).into();
        assert_eq!(raw, 3);
        assert_eq!(EpochId::from(5u64).as_u64(), 5);
    }
}
