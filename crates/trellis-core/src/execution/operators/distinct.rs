//! `DISTINCT`: forwards the first occurrence of each row.

use std::sync::Arc;

use trellis_common::memory::{BufferPool, Reservation};
use trellis_common::types::HashableValue;
use trellis_common::utils::hash::{FxHashSet, fx_set};

use super::{BoxedOperator, Operator, OperatorResult};

/// Per-entry bookkeeping charged on top of the values themselves.
const ENTRY_OVERHEAD: usize = 32;

pub struct DistinctOperator {
    input: BoxedOperator,
    /// Only the leading `key_width` slots decide equality.
    key_width: usize,
    seen: FxHashSet<Vec<HashableValue>>,
    memory: Reservation,
}

impl DistinctOperator {
    #[must_use]
    pub fn new(input: BoxedOperator, key_width: usize, pool: &Arc<BufferPool>) -> Self {
        Self {
            input,
            key_width,
            seen: fx_set(),
            memory: pool.reservation(),
        }
    }
}

impl Operator for DistinctOperator {
    fn next(&mut self) -> OperatorResult {
        while let Some(row) = self.input.next()? {
            let key: Vec<HashableValue> = row
                .iter()
                .take(self.key_width)
                .cloned()
                .map(HashableValue::new)
                .collect();
            if self.seen.contains(&key) {
                continue;
            }
            let bytes = key.iter().map(|k| k.inner().estimated_size()).sum::<usize>() + ENTRY_OVERHEAD;
            self.memory.grow(bytes)?;
            self.seen.insert(key);
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.input.reset();
        self.seen.clear();
        let size = self.memory.size();
        self.memory.shrink(size);
    }

    fn name(&self) -> &'static str {
        "Distinct"
    }
}
