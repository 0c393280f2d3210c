// Callable Strategy
//
// Invokes stored routines. Output slots are registered with the driver when
// the statement is prepared and read back into the handle after every
// execution.

use std::sync::Arc;

use log::{debug, warn};

use crate::binding::ParameterBinder;
use crate::common::TimeoutSecs;
use crate::config::ExecutorConfig;
use crate::driver::{Connection, DriverError, DriverStatement};
use crate::error::StatementResult;
use crate::plan::BoundQueryPlan;
use crate::result::{ResultCursor, RowCallback};
use crate::statement::ExecutionStrategy;
use crate::statement::base::{Dispatch, StrategyCore};
use crate::statement::handle::StatementHandle;

pub struct CallableStrategy {
    core: StrategyCore,
}

impl CallableStrategy {
    pub fn new(plan: Arc<BoundQueryPlan>, config: Arc<ExecutorConfig>, binder: ParameterBinder) -> Self {
        CallableStrategy { core: StrategyCore::new(plan, config, binder, Dispatch::Compiled) }
    }

    fn register_outputs(&self, statement: &mut dyn DriverStatement) -> Result<(), DriverError> {
        for binding in self.core.plan.output_parameters() {
            let sql_type = binding.declared_type.as_ref().unwrap_or(&self.core.config.null_type);
            debug!("Registering output parameter {} as {}", binding.position, sql_type);
            statement.register_out_parameter(binding.position, sql_type)?;
        }
        Ok(())
    }
}

impl ExecutionStrategy for CallableStrategy {
    fn plan(&self) -> &BoundQueryPlan {
        &self.core.plan
    }

    fn prepare(
        &self,
        connection: &mut dyn Connection,
        transaction_timeout: Option<TimeoutSecs>,
    ) -> StatementResult<StatementHandle> {
        let mut statement = connection
            .prepare_call(self.core.plan.sql())
            .map_err(|e| self.core.prepare_error(e))?;
        if let Err(e) = self.register_outputs(statement.as_mut()) {
            if let Err(close_err) = statement.close() {
                warn!("Failed to release call for '{}' after registration error: {}", self.core.plan.id(), close_err);
            }
            return Err(self.core.prepare_error(e));
        }
        self.core.finish_prepare(statement, transaction_timeout, true)
    }

    fn parameterize(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        self.core.parameterize(handle)
    }

    fn batch(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        self.core.batch(handle)
    }

    fn update(&self, handle: &mut StatementHandle) -> StatementResult<u64> {
        let count = self.core.update(handle)?;
        self.core.collect_outputs(handle)?;
        Ok(count)
    }

    fn query(&self, handle: &mut StatementHandle, callback: &mut dyn RowCallback) -> StatementResult<()> {
        self.core.query(handle, callback)?;
        self.core.collect_outputs(handle)
    }

    fn query_lazy(&self, handle: &mut StatementHandle) -> StatementResult<ResultCursor> {
        let cursor = self.core.query_lazy(handle)?;
        self.core.collect_outputs(handle)?;
        Ok(cursor)
    }
}
