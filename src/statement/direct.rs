use std::sync::Arc;

use crate::binding::ParameterBinder;
use crate::common::TimeoutSecs;
use crate::config::ExecutorConfig;
use crate::driver::Connection;
use crate::error::{BindError, StatementResult};
use crate::plan::BoundQueryPlan;
use crate::result::{ResultCursor, RowCallback};
use crate::statement::ExecutionStrategy;
use crate::statement::base::{Dispatch, StrategyCore};
use crate::statement::handle::{HandleState, Operation, StatementHandle};

/// Runs literal SQL text on a plain statement.
///
/// Nothing is compiled ahead of execution and no placeholders can be bound.
/// The handle serves a single execution.
pub struct DirectStrategy {
    core: StrategyCore,
}

impl DirectStrategy {
    pub fn new(plan: Arc<BoundQueryPlan>, config: Arc<ExecutorConfig>, binder: ParameterBinder) -> Self {
        DirectStrategy { core: StrategyCore::new(plan, config, binder, Dispatch::SqlText) }
    }
}

impl ExecutionStrategy for DirectStrategy {
    fn plan(&self) -> &BoundQueryPlan {
        &self.core.plan
    }

    fn prepare(
        &self,
        connection: &mut dyn Connection,
        transaction_timeout: Option<TimeoutSecs>,
    ) -> StatementResult<StatementHandle> {
        let return_keys = self.core.plan.key_generation().is_enabled();
        let statement = connection
            .create_statement(return_keys)
            .map_err(|e| self.core.prepare_error(e))?;
        self.core.finish_prepare(statement, transaction_timeout, false)
    }

    fn parameterize(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        handle.check(Operation::Parameterize)?;
        self.core.check_handle(handle)?;
        let count = self.core.plan.input_parameters().count();
        if count > 0 {
            let err = BindError::NotBindable { plan: self.core.plan_id().to_string(), count };
            return Err(handle.release_on_error(err.into()));
        }
        handle.set_state(HandleState::Parameterized);
        Ok(())
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
