//! Per-query state shared by the operators of one plan.

use std::sync::Arc;
use std::time::{Duration, Instant};

use trellis_common::memory::BufferPool;

use super::operators::OperatorError;
use crate::graph::{Catalog, GraphStore, TxView};

/// What the operators of one running query read from and charge against.
pub struct ExecutionContext {
    pub store: Arc<GraphStore>,
    /// Catalog as of compilation; DDL does not reach running queries.
    pub catalog: Arc<Catalog>,
    pub view: TxView,
    pub pool: Arc<BufferPool>,
    deadline: Option<(Instant, Duration)>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(store: Arc<GraphStore>, view: TxView, pool: Arc<BufferPool>) -> Self {
        let catalog = store.catalog();
        Self {
            store,
            catalog,
            view,
            pool,
            deadline: None,
        }
    }

    /// Limits the query to `timeout` measured from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| (Instant::now() + t, t));
        self
    }

    /// Fails once the deadline has passed. Called at every scan batch and
    /// expansion, so a long query notices within one batch.
    pub fn check_deadline(&self) -> Result<(), OperatorError> {
        match self.deadline {
            Some((deadline, timeout)) if Instant::now() >= deadline => Err(OperatorError::Timeout(timeout)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_common::types::EpochId;

    #[test]
    fn test_deadline() {
        let store = Arc::new(GraphStore::new());
        let view = TxView::read_only(EpochId::INITIAL);
        let ctx = ExecutionContext::new(Arc::clone(&store), view, BufferPool::new(1024));
        assert!(ctx.check_deadline().is_ok());

        let ctx = ExecutionContext::new(store, view, BufferPool::new(1024)).with_timeout(Some(Duration::ZERO));
        assert!(matches!(ctx.check_deadline(), Err(OperatorError::Timeout(_))));
    }
}
