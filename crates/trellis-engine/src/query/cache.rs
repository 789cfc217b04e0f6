//! Compiled-statement cache.
//!
//! Parsing, binding and planning are skipped for a query text seen before.
//! Only parameterless statements are cached, since parameters are bound
//! into the plan as literals. Any schema change clears the cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use trellis_core::cache::SecondChanceLru;

use super::plan::LogicalPlan;

const MIN_ENTRIES: usize = 16;
const MAX_ENTRIES: usize = 4096;
/// Budget share per cached plan when sizing from the buffer pool.
const BYTES_PER_ENTRY: usize = 64 * 1024;

/// Hit and miss counts since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Cache of plans keyed by exact query text. Hits only take a read lock.
pub struct QueryCache {
    plans: RwLock<SecondChanceLru<String, Arc<LogicalPlan>>>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    #[must_use]
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            plans: RwLock::new(SecondChanceLru::new(capacity.max(1))),
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Sizes the cache from the buffer-pool budget.
    #[must_use]
    pub fn for_budget(buffer_pool_size: usize, enabled: bool) -> Self {
        let capacity = (buffer_pool_size / BYTES_PER_ENTRY).clamp(MIN_ENTRIES, MAX_ENTRIES);
        Self::new(capacity, enabled)
    }

    #[must_use]
    pub fn get(&self, query: &str) -> Option<Arc<LogicalPlan>> {
        if !self.enabled {
            return None;
        }
        let found = self.plans.read().get(&query.to_string()).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, query: &str, plan: Arc<LogicalPlan>) {
        if self.enabled {
            self.plans.write().insert(query.to_string(), plan);
        }
    }

    /// Drops every cached plan. Called after DDL.
    pub fn clear(&self) {
        let mut plans = self.plans.write();
        if !plans.is_empty() {
            tracing::debug!(entries = plans.len(), "query cache cleared");
        }
        plans.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.plans.read().capacity()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("enabled", &self.enabled)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::LogicalOperator;

    fn plan() -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan {
            root: LogicalOperator::SingleRow { width: 0 },
            columns: Vec::new(),
            column_types: Vec::new(),
            is_write: false,
        })
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = QueryCache::new(4, true);
        assert!(cache.get("RETURN 1").is_none());
        cache.put("RETURN 1", plan());
        assert!(cache.get("RETURN 1").is_some());
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = QueryCache::new(4, false);
        cache.put("RETURN 1", plan());
        assert!(cache.get("RETURN 1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = QueryCache::new(4, true);
        cache.put("RETURN 1", plan());
        cache.put("RETURN 2", plan());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_from_budget() {
        assert_eq!(QueryCache::for_budget(0, true).capacity(), MIN_ENTRIES);
        assert_eq!(QueryCache::for_budget(64 * 1024 * 1024, true).capacity(), 1024);
        assert_eq!(QueryCache::for_budget(usize::MAX, true).capacity(), MAX_ENTRIES);
    }
}
