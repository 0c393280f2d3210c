// Statement Handle
//
// Exclusive owner of one driver statement plus the state produced by running
// it: batch counts, output parameters and generated keys.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use crate::common::{DataValue, ExecutionMode, ParamPosition, Row, TimeoutSecs};
use crate::driver::DriverStatement;
use crate::error::{StatementError, StatementResult};

/// Where a handle is in its prepare → parameterize → execute → close lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Prepared,
    Parameterized,
    /// At least one parameter set is queued and not yet executed
    Batched,
    Executed,
    Closed,
}

/// Operations gated by the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Parameterize,
    Batch,
    Update,
    Query,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Parameterize => "parameterize",
            Operation::Batch => "batch",
            Operation::Update => "update",
            Operation::Query => "query",
        }
    }
}

/// Settings applied to the driver statement at prepare time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatementSettings {
    pub query_timeout: Option<TimeoutSecs>,
    pub fetch_size: Option<u32>,
    pub max_rows: Option<u64>,
}

/// Shared between a handle and the cursor it produced
#[derive(Debug, Default)]
pub(crate) struct CursorLink {
    open: AtomicBool,
    aborted: AtomicBool,
}

impl CursorLink {
    pub(crate) fn opened() -> Arc<Self> {
        Arc::new(CursorLink { open: AtomicBool::new(true), aborted: AtomicBool::new(false) })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Set when the owning statement is closed underneath an open cursor
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

/// A live, exclusively owned driver statement.
///
/// The statement is released by [`StatementHandle::close`] or when the
/// handle is dropped, whichever comes first.
pub struct StatementHandle {
    plan_id: String,
    sql: String,
    mode: ExecutionMode,
    statement: Option<Box<dyn DriverStatement>>,
    state: HandleState,
    reusable: bool,
    settings: StatementSettings,
    pending_batch: usize,
    batch_counts: Vec<u64>,
    out_parameters: BTreeMap<ParamPosition, DataValue>,
    generated_keys: Vec<Row>,
    cursor: Option<Arc<CursorLink>>,
}

impl StatementHandle {
    pub(crate) fn new(
        plan_id: &str,
        sql: &str,
        mode: ExecutionMode,
        statement: Box<dyn DriverStatement>,
        settings: StatementSettings,
        reusable: bool,
    ) -> Self {
        StatementHandle {
            plan_id: plan_id.to_string(),
            sql: sql.to_string(),
            mode,
            statement: Some(statement),
            state: HandleState::Prepared,
            reusable,
            settings,
            pending_batch: 0,
            batch_counts: Vec::new(),
            out_parameters: BTreeMap::new(),
            generated_keys: Vec::new(),
            cursor: None,
        }
    }

    /// Plan the handle was prepared for
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == HandleState::Closed
    }

    pub fn settings(&self) -> &StatementSettings {
        &self.settings
    }

    /// Number of parameter sets queued by `batch` and not yet executed
    pub fn pending_batch(&self) -> usize {
        self.pending_batch
    }

    /// Per-set update counts of the last executed batch
    pub fn batch_counts(&self) -> &[u64] {
        &self.batch_counts
    }

    /// Output parameter value read back after the last execution
    pub fn out_parameter(&self, position: ParamPosition) -> Option<&DataValue> {
        self.out_parameters.get(&position)
    }

    pub fn out_parameters(&self) -> &BTreeMap<ParamPosition, DataValue> {
        &self.out_parameters
    }

    /// Keys generated by the last update
    pub fn generated_keys(&self) -> &[Row] {
        &self.generated_keys
    }

    pub fn has_open_cursor(&self) -> bool {
        self.cursor.as_ref().is_some_and(|c| c.is_open())
    }

    /// Release the driver statement. Closing a closed handle is a no-op.
    ///
    /// An open cursor produced by this handle is aborted: its next fetch
    /// fails instead of reading from the released statement.
    pub fn close(&mut self) -> StatementResult<()> {
        let Some(mut statement) = self.statement.take() else {
            return Ok(());
        };
        self.state = HandleState::Closed;
        self.pending_batch = 0;
        if let Some(link) = self.cursor.take() {
            link.abort();
        }
        statement.close().map_err(|e| StatementError::exec(&self.plan_id, e))
    }

    /// Fail unless `op` is legal in the current state
    pub(crate) fn check(&self, op: Operation) -> StatementResult<()> {
        if self.is_closed() {
            return Err(self.illegal(format!("cannot {} a closed statement", op.name())));
        }
        if self.has_open_cursor() {
            return Err(self.illegal(format!("cannot {} while a cursor is open on the statement", op.name())));
        }
        let allowed = match op {
            Operation::Parameterize => match self.state {
                HandleState::Executed => self.reusable,
                _ => true,
            },
            Operation::Batch => self.state == HandleState::Parameterized,
            // a bound but unqueued set next to a pending batch is ambiguous
            Operation::Update => match self.state {
                HandleState::Batched => true,
                HandleState::Parameterized => self.pending_batch == 0,
                _ => false,
            },
            Operation::Query => self.state == HandleState::Parameterized && self.pending_batch == 0,
        };
        if allowed {
            Ok(())
        } else if op == Operation::Parameterize {
            Err(self.illegal(format!("{} statements are not reused after execution", self.mode)))
        } else {
            Err(self.illegal(format!("cannot {} a statement in state {:?}", op.name(), self.state)))
        }
    }

    pub(crate) fn illegal(&self, message: impl Into<String>) -> StatementError {
        StatementError::illegal_state(&self.plan_id, message)
    }

    pub(crate) fn driver(&mut self) -> StatementResult<&mut dyn DriverStatement> {
        match self.statement.as_mut() {
            Some(statement) => Ok(&mut **statement),
            None => Err(StatementError::illegal_state(&self.plan_id, "statement is closed")),
        }
    }

    pub(crate) fn set_state(&mut self, state: HandleState) {
        self.state = state;
    }

    pub(crate) fn queue_batch(&mut self) {
        self.pending_batch += 1;
        self.state = HandleState::Batched;
    }

    pub(crate) fn finish_batch(&mut self, counts: Vec<u64>) {
        self.pending_batch = 0;
        self.batch_counts = counts;
    }

    pub(crate) fn reset_results(&mut self) {
        self.out_parameters.clear();
        self.generated_keys.clear();
    }

    pub(crate) fn set_out_parameter(&mut self, position: ParamPosition, value: DataValue) {
        self.out_parameters.insert(position, value);
    }

    pub(crate) fn set_generated_keys(&mut self, keys: Vec<Row>) {
        self.generated_keys = keys;
    }

    pub(crate) fn attach_cursor(&mut self, link: Arc<CursorLink>) {
        self.cursor = Some(link);
    }

    /// Close after a failure, keeping the original error
    pub(crate) fn release_on_error(&mut self, err: StatementError) -> StatementError {
        if let Err(close_err) = self.close() {
            warn!("Failed to release statement for '{}' after error: {}", self.plan_id, close_err);
        }
        err
    }
}

impl fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("plan_id", &self.plan_id)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("pending_batch", &self.pending_batch)
            .finish()
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close statement for '{}' on drop: {}", self.plan_id, e);
        }
    }
}
