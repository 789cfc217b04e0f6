//! Query compilation: binding, planning and the compiled-plan cache.

pub mod binder;
pub mod cache;
pub mod plan;
pub mod planner;

pub use binder::{Binder, BoundQuery, Params, bind_node_table, bind_rel_table};
pub use cache::{CacheStats, QueryCache};
pub use plan::{LogicalOperator, LogicalPlan};
pub use planner::Planner;

use trellis_adapters::query::cypher::ast::Query;
use trellis_common::utils::error::Result;
use trellis_core::GraphStore;

/// Binds and plans a parsed query against the store's current schema.
///
/// # Errors
///
/// Binding errors from [`Binder::bind`].
pub fn compile(store: &GraphStore, query: &Query, params: &Params) -> Result<LogicalPlan> {
    let catalog = store.catalog();
    let bound = Binder::new(&catalog, params).bind(query)?;
    Ok(Planner::new(&catalog, store).plan(bound))
}
