// Strategy Core
//
// Behaviour shared by the three execution strategies: statement settings,
// lifecycle checks, binding, batching, execution and row delivery. The
// strategies differ in how the statement is created and in whether SQL text
// is sent with each execution.

use std::sync::Arc;

use log::{debug, warn};

use crate::binding::ParameterBinder;
use crate::common::{DataValue, KeyGeneration, Row, TimeoutSecs};
use crate::config::ExecutorConfig;
use crate::driver::{DriverError, DriverRows, DriverStatement, Execution};
use crate::error::{PrepareError, StatementError, StatementResult};
use crate::plan::BoundQueryPlan;
use crate::result::{ResultContext, ResultCursor, RowCallback};
use crate::statement::handle::{CursorLink, HandleState, Operation, StatementHandle, StatementSettings};

/// How SQL text reaches the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// SQL text is sent with each execution on a plain statement
    SqlText,
    /// The statement was compiled from the SQL at prepare time
    Compiled,
}

pub(crate) struct StrategyCore {
    pub(crate) plan: Arc<BoundQueryPlan>,
    pub(crate) config: Arc<ExecutorConfig>,
    pub(crate) binder: ParameterBinder,
    dispatch: Dispatch,
}

impl StrategyCore {
    pub(crate) fn new(
        plan: Arc<BoundQueryPlan>,
        config: Arc<ExecutorConfig>,
        binder: ParameterBinder,
        dispatch: Dispatch,
    ) -> Self {
        StrategyCore { plan, config, binder, dispatch }
    }

    pub(crate) fn plan_id(&self) -> &str {
        self.plan.id()
    }

    pub(crate) fn prepare_error(&self, source: DriverError) -> StatementError {
        PrepareError::from_driver(self.plan.id(), source).into()
    }

    pub(crate) fn settings(&self, transaction_timeout: Option<TimeoutSecs>) -> StatementSettings {
        StatementSettings {
            query_timeout: self.config.effective_timeout(self.plan.timeout_seconds(), transaction_timeout),
            fetch_size: self.config.effective_fetch_size(self.plan.fetch_size()),
            max_rows: self.plan.max_rows(),
        }
    }

    /// Apply settings to a freshly created statement and wrap it in a handle.
    ///
    /// The statement is closed again if any setting is refused.
    pub(crate) fn finish_prepare(
        &self,
        mut statement: Box<dyn DriverStatement>,
        transaction_timeout: Option<TimeoutSecs>,
        reusable: bool,
    ) -> StatementResult<StatementHandle> {
        debug!("==>  Preparing: {}", self.plan.sql());
        let settings = self.settings(transaction_timeout);
        if let Err(e) = apply_settings(statement.as_mut(), &settings) {
            if let Err(close_err) = statement.close() {
                warn!("Failed to release statement for '{}' after prepare error: {}", self.plan.id(), close_err);
            }
            return Err(self.prepare_error(e));
        }
        Ok(StatementHandle::new(
            self.plan.id(),
            self.plan.sql(),
            self.plan.execution_mode(),
            statement,
            settings,
            reusable,
        ))
    }

    /// A handle may only be driven by plans with the same SQL and mode
    pub(crate) fn check_handle(&self, handle: &StatementHandle) -> StatementResult<()> {
        if handle.sql() != self.plan.sql() || handle.mode() != self.plan.execution_mode() {
            return Err(handle.illegal(format!(
                "statement was prepared for '{}', not for '{}'",
                handle.plan_id(),
                self.plan.id()
            )));
        }
        Ok(())
    }

    pub(crate) fn parameterize(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        handle.check(Operation::Parameterize)?;
        self.check_handle(handle)?;
        self.try_parameterize(handle).map_err(|e| handle.release_on_error(e))?;
        handle.set_state(HandleState::Parameterized);
        Ok(())
    }

    fn try_parameterize(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        handle
            .driver()?
            .clear_parameters()
            .map_err(|e| StatementError::exec(self.plan_id(), e))?;
        self.binder.bind(handle, self.plan.parameters())
    }

    pub(crate) fn batch(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        handle.check(Operation::Batch)?;
        self.check_handle(handle)?;
        let queued = match self.dispatch {
            Dispatch::SqlText => handle.driver()?.add_batch_sql(self.plan.sql()),
            Dispatch::Compiled => handle.driver()?.add_batch(),
        };
        queued
            .map_err(|e| StatementError::exec(self.plan_id(), e))
            .map_err(|e| handle.release_on_error(e))?;
        handle.queue_batch();
        Ok(())
    }

    /// Execute a mutation, or the pending batch when one is queued.
    ///
    /// A batch returns the sum of its per-set counts; the counts themselves
    /// are kept on the handle.
    pub(crate) fn update(&self, handle: &mut StatementHandle) -> StatementResult<u64> {
        handle.check(Operation::Update)?;
        self.check_handle(handle)?;
        handle.reset_results();
        let count = self.try_update(handle).map_err(|e| handle.release_on_error(e))?;
        handle.set_state(HandleState::Executed);
        Ok(count)
    }

    fn try_update(&self, handle: &mut StatementHandle) -> StatementResult<u64> {
        let plan_id = self.plan_id();
        let count = if handle.state() == HandleState::Batched {
            let units = handle.pending_batch();
            let counts = handle
                .driver()?
                .execute_batch()
                .map_err(|e| StatementError::exec(plan_id, e))?;
            let total: u64 = counts.iter().sum();
            debug!("<==    Updates: {} (batch of {})", total, units);
            handle.finish_batch(counts);
            total
        } else {
            match self.execute(handle)? {
                Execution::UpdateCount(count) => {
                    debug!("<==    Updates: {}", count);
                    count
                }
                Execution::Rows(mut rows) => {
                    if let Err(close_err) = rows.close() {
                        warn!("Failed to close unexpected result set for '{}': {}", plan_id, close_err);
                    }
                    return Err(StatementError::exec(
                        plan_id,
                        DriverError::Execution("update produced a result set".to_string()),
                    ));
                }
            }
        };

        if let KeyGeneration::Generated { columns } = self.plan.key_generation() {
            let keys = handle
                .driver()?
                .generated_keys()
                .map_err(|e| StatementError::exec(plan_id, e))?;
            handle.set_generated_keys(project_keys(keys, columns));
        }
        Ok(count)
    }

    /// Execute a read and push every row to `callback`
    pub(crate) fn query(&self, handle: &mut StatementHandle, callback: &mut dyn RowCallback) -> StatementResult<()> {
        handle.check(Operation::Query)?;
        self.check_handle(handle)?;
        handle.reset_results();
        self.try_query(handle, callback).map_err(|e| handle.release_on_error(e))?;
        handle.set_state(HandleState::Executed);
        Ok(())
    }

    fn try_query(&self, handle: &mut StatementHandle, callback: &mut dyn RowCallback) -> StatementResult<()> {
        let rows = self.execute_for_rows(handle)?;
        self.drive_rows(rows, callback)?;
        Ok(())
    }

    /// Execute a read and hand back an unconsumed cursor
    pub(crate) fn query_lazy(&self, handle: &mut StatementHandle) -> StatementResult<ResultCursor> {
        handle.check(Operation::Query)?;
        self.check_handle(handle)?;
        handle.reset_results();
        let rows = self.execute_for_rows(handle).map_err(|e| handle.release_on_error(e))?;
        let link = CursorLink::opened();
        handle.attach_cursor(link.clone());
        handle.set_state(HandleState::Executed);
        Ok(ResultCursor::new(self.plan_id(), rows, link, self.plan.max_rows()))
    }

    fn execute(&self, handle: &mut StatementHandle) -> StatementResult<Execution> {
        let statement = handle.driver()?;
        let executed = match self.dispatch {
            Dispatch::SqlText => statement.execute_sql(self.plan.sql()),
            Dispatch::Compiled => statement.execute(),
        };
        executed.map_err(|e| StatementError::exec(self.plan_id(), e))
    }

    fn execute_for_rows(&self, handle: &mut StatementHandle) -> StatementResult<Box<dyn DriverRows>> {
        match self.execute(handle)? {
            Execution::Rows(rows) => Ok(rows),
            Execution::UpdateCount(_) => Err(StatementError::exec(
                self.plan_id(),
                DriverError::Execution("query did not produce a result set".to_string()),
            )),
        }
    }

    /// Deliver rows until the set is exhausted, the row limit is reached, the
    /// callback asks to stop, or something fails. The result set is closed on
    /// every path.
    fn drive_rows(&self, mut rows: Box<dyn DriverRows>, callback: &mut dyn RowCallback) -> StatementResult<usize> {
        let plan_id = self.plan_id();
        let limit = self.plan.max_rows();
        let mut context = ResultContext::new();

        let delivered = loop {
            if context.is_stopped() || limit.is_some_and(|m| context.result_count() as u64 >= m) {
                break Ok(());
            }
            match rows.next_row() {
                Ok(Some(row)) => {
                    context.advance();
                    if let Err(source) = callback.on_row(row, &mut context) {
                        break Err(StatementError::Callback {
                            plan: plan_id.to_string(),
                            row: context.result_count(),
                            source,
                        });
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(StatementError::exec(plan_id, e)),
            }
        };
        let closed = rows.close().map_err(|e| StatementError::exec(plan_id, e));

        delivered?;
        closed?;
        debug!("<==      Total: {}", context.result_count());
        Ok(context.result_count())
    }

    /// Read every output slot of the plan into the handle
    pub(crate) fn collect_outputs(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        let result = self.try_collect_outputs(handle);
        result.map_err(|e| handle.release_on_error(e))
    }

    fn try_collect_outputs(&self, handle: &mut StatementHandle) -> StatementResult<()> {
        for binding in self.plan.output_parameters() {
            let value: DataValue = handle
                .driver()?
                .out_parameter(binding.position)
                .map_err(|e| StatementError::exec(self.plan_id(), e))?;
            handle.set_out_parameter(binding.position, value);
        }
        Ok(())
    }
}

fn apply_settings(statement: &mut dyn DriverStatement, settings: &StatementSettings) -> Result<(), DriverError> {
    if let Some(timeout) = settings.query_timeout {
        statement.set_query_timeout(timeout)?;
    }
    if let Some(fetch_size) = settings.fetch_size {
        statement.set_fetch_size(fetch_size)?;
    }
    if let Some(max_rows) = settings.max_rows {
        statement.set_max_rows(max_rows)?;
    }
    Ok(())
}

/// Keep only the requested key columns, or every column when none are named.
///
/// A requested column the driver did not name is taken by position.
fn project_keys(keys: Vec<Row>, columns: &[String]) -> Vec<Row> {
    if columns.is_empty() {
        return keys;
    }
    keys.into_iter()
        .map(|key| {
            let mut projected = Row::new();
            for (index, column) in columns.iter().enumerate() {
                if let Some(value) = key.get(column).or_else(|| key.get_index(index)) {
                    projected.push(column.clone(), value.clone());
                }
            }
            projected
        })
        .collect()
}
