use std::sync::Arc;

use crate::binding::ParameterBinder;
use crate::common::TimeoutSecs;
use crate::config::ExecutorConfig;
use crate::driver::Connection;
use crate::error::StatementResult;
use crate::plan::BoundQueryPlan;
use crate::result::{ResultCursor, RowCallback};
use crate::statement::ExecutionStrategy;
use crate::statement::base::{Dispatch, StrategyCore};
use crate::statement::handle::StatementHandle;

/// Compiles the SQL once at prepare time and binds positional parameters
/// before every execution. The handle can be re-parameterized and run again.
pub struct PrecompiledStrategy {
    core: StrategyCore,
}

impl PrecompiledStrategy {
    pub fn new(plan: Arc<BoundQueryPlan>, config: Arc<ExecutorConfig>, binder: ParameterBinder) -> Self {
        PrecompiledStrategy { core: StrategyCore::new(plan, config, binder, Dispatch::Compiled) }
    }
}

impl ExecutionStrategy for PrecompiledStrategy {
    fn plan(&self) -> &BoundQueryPlan {
        &self.core.plan
    }

    fn prepare(
        &self,
        connection: &mut dyn Connection,
        transaction_timeout: Option<TimeoutSecs>,
    ) -> StatementResult<StatementHandle> {
        let plan = &self.core.plan;
        let statement = connection
            .prepare_statement(plan.sql(), plan.key_generation().is_enabled())
            .map_err(|e| self.core.prepare_error(e))?;
        self.core.finish_prepare(statement, transaction_timeout, true)
    }

    fn parameterize(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        self.core.parameterize(handle)
    }

    fn batch(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        self.core.batch(handle)
    }

    fn update(&self, handle: &mut StatementHandle) -> StatementResult<u64> {
        self.core.update(handle)
    }

    fn query(&self, handle: &mut StatementHandle, callback: &mut dyn RowCallback) -> StatementResult<()> {
        self.core.query(handle, callback)
    }

    fn query_lazy(&self, handle: &mut StatementHandle) -> StatementResult<ResultCursor> {
        self.core.query_lazy(handle)
    }
}
