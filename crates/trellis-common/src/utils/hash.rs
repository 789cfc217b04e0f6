//! FxHash-backed collections.
//!
//! Keys in the engine are small integers and interned strings, where FxHash
//! beats SipHash comfortably and HashDoS is not a concern.

pub use rustc_hash::{FxBuildHasher, FxHasher};

/// A `hashbrown` map using FxHash.
pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

/// A `hashbrown` set using FxHash.
pub type FxHashSet<K> = hashbrown::HashSet<K, FxBuildHasher>;

/// Creates an empty [`FxHashMap`].
#[must_use]
pub fn fx_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::with_hasher(FxBuildHasher)
}

/// Creates an empty [`FxHashSet`].
#[must_use]
pub fn fx_set<K>() -> FxHashSet<K> {
    FxHashSet::with_hasher(FxBuildHasher)
}
