// Statement Execution Module
//
// One capability interface, three strategies implementing it and the router
// that picks a strategy from a plan's execution mode.

pub(crate) mod base;
pub mod callable;
pub mod direct;
pub mod handle;
pub mod precompiled;
pub mod router;

pub use callable::CallableStrategy;
pub use direct::DirectStrategy;
pub use handle::{HandleState, StatementHandle, StatementSettings};
pub use precompiled::PrecompiledStrategy;
pub use router::StatementRouter;

use crate::common::TimeoutSecs;
use crate::driver::Connection;
use crate::error::StatementResult;
use crate::plan::BoundQueryPlan;
use crate::result::{ResultCursor, RowCallback};

/// Prepare a statement for a plan, run it and return its results.
///
/// Every operation after `prepare` that fails releases the statement held by
/// the handle; lifecycle violations are reported without touching it.
pub trait ExecutionStrategy: Send + Sync {
    fn plan(&self) -> &BoundQueryPlan;

    /// Allocate the driver statement and apply timeout, fetch size and row limit
    fn prepare(
        &self,
        connection: &mut dyn Connection,
        transaction_timeout: Option<TimeoutSecs>,
    ) -> StatementResult<StatementHandle>;

    /// Bind the plan's parameters onto the handle
    fn parameterize(&self, handle: &mut StatementHandle) -> StatementResult<()>;

    /// Queue the bound parameter set for the next `update`
    fn batch(&self, handle: &mut StatementHandle) -> StatementResult<()>;

    /// Execute a mutation, returning the number of affected rows
    fn update(&self, handle: &mut StatementHandle) -> StatementResult<u64>;

    /// Execute a read and hand each row to `callback`
    fn query(&self, handle: &mut StatementHandle, callback: &mut dyn RowCallback) -> StatementResult<()>;

    /// Execute a read and return a cursor over the unconsumed rows
    fn query_lazy(&self, handle: &mut StatementHandle) -> StatementResult<ResultCursor>;
}
