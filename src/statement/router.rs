// Statement Router
//
// Entry point for callers: selects the strategy for a plan's execution mode
// and forwards every operation to it.

use std::sync::Arc;

use log::warn;

use crate::binding::{ParameterBinder, TypeRegistry};
use crate::common::{ExecutionMode, TimeoutSecs};
use crate::config::ExecutorConfig;
use crate::driver::Connection;
use crate::error::StatementResult;
use crate::plan::BoundQueryPlan;
use crate::result::{ResultCursor, ResultDeliverer, RowCallback};
use crate::statement::{CallableStrategy, DirectStrategy, ExecutionStrategy, PrecompiledStrategy, StatementHandle};

pub struct StatementRouter {
    delegate: Box<dyn ExecutionStrategy>,
}

impl StatementRouter {
    pub fn new(plan: Arc<BoundQueryPlan>, config: Arc<ExecutorConfig>) -> Self {
        let binder = ParameterBinder::new(TypeRegistry::shared_default(), config.null_type.clone());
        Self::with_binder(plan, config, binder)
    }

    /// Build a router whose strategies bind through `binder`
    pub fn with_binder(plan: Arc<BoundQueryPlan>, config: Arc<ExecutorConfig>, binder: ParameterBinder) -> Self {
        let delegate: Box<dyn ExecutionStrategy> = match plan.execution_mode() {
            ExecutionMode::Direct => Box::new(DirectStrategy::new(plan, config, binder)),
            ExecutionMode::Precompiled => Box::new(PrecompiledStrategy::new(plan, config, binder)),
            ExecutionMode::Callable => Box::new(CallableStrategy::new(plan, config, binder)),
        };
        StatementRouter { delegate }
    }

    /// Router for `plan` with the default configuration
    pub fn for_plan(plan: BoundQueryPlan) -> Self {
        Self::new(Arc::new(plan), Arc::new(ExecutorConfig::default()))
    }

    pub fn mode(&self) -> ExecutionMode {
        self.delegate.plan().execution_mode()
    }

    /// Eager and lazy consumption of this router's queries
    pub fn deliver(&self) -> ResultDeliverer<'_> {
        ResultDeliverer::new(self)
    }

    /// Prepare a statement, run `f` with it and close it on every path.
    ///
    /// An error from `f` wins over a failure to close.
    pub fn with_statement<T, F>(
        &self,
        connection: &mut dyn Connection,
        transaction_timeout: Option<TimeoutSecs>,
        f: F,
    ) -> StatementResult<T>
    where
        F: FnOnce(&Self, &mut StatementHandle) -> StatementResult<T>,
    {
        let mut handle = self.prepare(connection, transaction_timeout)?;
        let result = f(self, &mut handle);
        let closed = handle.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to close statement for '{}': {}", self.plan().id(), close_err);
                }
                Err(e)
            }
        }
    }

    /// Prepare, bind, execute and close in one call
    pub fn execute_update(
        &self,
        connection: &mut dyn Connection,
        transaction_timeout: Option<TimeoutSecs>,
    ) -> StatementResult<u64> {
        self.with_statement(connection, transaction_timeout, |router, handle| {
            router.parameterize(handle)?;
            router.update(handle)
        })
    }
}

impl ExecutionStrategy for StatementRouter {
    fn plan(&self) -> &BoundQueryPlan {
        self.delegate.plan()
    }

    fn prepare(
        &self,
        connection: &mut dyn Connection,
        transaction_timeout: Option<TimeoutSecs>,
    ) -> StatementResult<StatementHandle> {
        self.delegate.prepare(connection, transaction_timeout)
    }

    fn parameterize(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        self.delegate.parameterize(handle)
    }

    fn batch(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        self.delegate.batch(handle)
    }

    fn update(&self, handle: &mut StatementHandle) -> StatementResult<u64> {
        self.delegate.update(handle)
    }

    fn query(&self, handle: &mut StatementHandle, callback: &mut dyn RowCallback) -> StatementResult<()> {
        self.delegate.query(handle, callback)
    }

    fn query_lazy(&self, handle: &mut StatementHandle) -> StatementResult<ResultCursor> {
        self.delegate.query_lazy(handle)
    }
}
