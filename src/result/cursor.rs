// Result Cursor
//
// Lazy, forward-only, single-pass view over a driver result set. The cursor
// owns the result set until it is exhausted or closed.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::common::Row;
use crate::driver::DriverRows;
use crate::error::{StatementError, StatementResult};
use crate::statement::handle::CursorLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStatus {
    /// No row fetched yet
    Created,
    Open,
    /// End of the result set was reached
    Consumed,
    Closed,
}

pub struct ResultCursor {
    plan_id: String,
    columns: Vec<String>,
    rows: Option<Box<dyn DriverRows>>,
    link: Arc<CursorLink>,
    status: CursorStatus,
    fetched: usize,
    limit: Option<u64>,
}

impl ResultCursor {
    pub(crate) fn new(plan_id: &str, rows: Box<dyn DriverRows>, link: Arc<CursorLink>, limit: Option<u64>) -> Self {
        ResultCursor {
            plan_id: plan_id.to_string(),
            columns: rows.columns().to_vec(),
            rows: Some(rows),
            link,
            status: CursorStatus::Created,
            fetched: 0,
            limit,
        }
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn status(&self) -> CursorStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, CursorStatus::Created | CursorStatus::Open)
    }

    pub fn is_consumed(&self) -> bool {
        self.status == CursorStatus::Consumed
    }

    /// 0-based index of the last row returned, `None` before the first
    pub fn current_index(&self) -> Option<usize> {
        self.fetched.checked_sub(1)
    }

    /// Advance one row. Returns `Ok(None)` at the end of the result set,
    /// and on every call after that.
    ///
    /// Fails with an illegal-state error once the cursor or its statement
    /// has been closed.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> StatementResult<Option<Row>> {
        match self.status {
            CursorStatus::Closed => return Err(StatementError::illegal_state(&self.plan_id, "cursor is closed")),
            CursorStatus::Consumed => return Ok(None),
            CursorStatus::Created | CursorStatus::Open => {}
        }
        if self.link.is_aborted() {
            self.release(CursorStatus::Closed)?;
            return Err(StatementError::illegal_state(&self.plan_id, "statement was closed under the cursor"));
        }
        if self.limit.is_some_and(|limit| self.fetched as u64 >= limit) {
            self.release(CursorStatus::Consumed)?;
            return Ok(None);
        }

        let fetched = match self.rows.as_mut() {
            Some(rows) => rows.next_row(),
            None => return Err(StatementError::illegal_state(&self.plan_id, "cursor is closed")),
        };
        match fetched {
            Ok(Some(row)) => {
                self.fetched += 1;
                self.status = CursorStatus::Open;
                Ok(Some(row))
            }
            Ok(None) => {
                debug!("<==      Total: {}", self.fetched);
                self.release(CursorStatus::Consumed)?;
                Ok(None)
            }
            Err(e) => {
                let err = StatementError::exec(&self.plan_id, e);
                if let Err(close_err) = self.release(CursorStatus::Closed) {
                    warn!("Failed to release cursor for '{}': {}", self.plan_id, close_err);
                }
                Err(err)
            }
        }
    }

    /// Release the result set. Safe at any point and idempotent.
    pub fn close(&mut self) -> StatementResult<()> {
        let status = if self.status == CursorStatus::Consumed { CursorStatus::Consumed } else { CursorStatus::Closed };
        self.release(status)
    }

    /// Iterate the remaining rows, the cursor is released at the end
    pub fn rows(&mut self) -> CursorRows<'_> {
        CursorRows { cursor: self, failed: false }
    }

    fn release(&mut self, status: CursorStatus) -> StatementResult<()> {
        self.status = status;
        self.link.mark_closed();
        match self.rows.take() {
            Some(mut rows) => rows.close().map_err(|e| StatementError::exec(&self.plan_id, e)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("plan_id", &self.plan_id)
            .field("status", &self.status)
            .field("fetched", &self.fetched)
            .finish()
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close cursor for '{}' on drop: {}", self.plan_id, e);
        }
    }
}

/// Iterator over the rows left in a [`ResultCursor`]
pub struct CursorRows<'a> {
    cursor: &'a mut ResultCursor,
    failed: bool,
}

impl Iterator for CursorRows<'_> {
    type Item = StatementResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.next() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
