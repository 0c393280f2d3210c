// Driver Boundary
//
// The capability set this crate needs from a database driver. Execution
// strategies only ever talk to these traits, never to a concrete driver.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use thiserror::Error;

use crate::common::{DataValue, ParamPosition, Row, SqlType, TimeoutSecs};

/// Error reported by a driver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("value rejected: {0}")]
    Rejected(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("resource is closed")]
    Closed,
}

/// Result type for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Outcome of executing a statement
pub enum Execution {
    /// The statement produced a result set
    Rows(Box<dyn DriverRows>),
    /// The statement changed this many rows
    UpdateCount(u64),
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Execution::Rows(rows) => write!(f, "Rows({:?})", rows.columns()),
            Execution::UpdateCount(n) => write!(f, "UpdateCount({})", n),
        }
    }
}

/// A live connection able to create statements
pub trait Connection: Send {
    /// Create a plain statement; SQL text is supplied at execution time
    fn create_statement(&mut self, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>>;

    /// Compile `sql` into a parameterized statement
    fn prepare_statement(&mut self, sql: &str, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>>;

    /// Compile `sql` as a stored-routine invocation
    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn DriverStatement>>;
}

/// A driver statement resource.
///
/// Methods a statement kind cannot support return
/// [`DriverError::Unsupported`] by default.
pub trait DriverStatement: Send {
    fn set_query_timeout(&mut self, seconds: TimeoutSecs) -> DriverResult<()>;

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()>;

    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()>;

    /// Bind a non-null value at `position`
    fn set_parameter(&mut self, position: ParamPosition, value: DataValue, sql_type: &SqlType) -> DriverResult<()>;

    /// Bind a typed null at `position`
    fn set_null(&mut self, position: ParamPosition, sql_type: &SqlType) -> DriverResult<()>;

    /// Forget all bound values, registrations are kept
    fn clear_parameters(&mut self) -> DriverResult<()>;

    fn register_out_parameter(&mut self, position: ParamPosition, sql_type: &SqlType) -> DriverResult<()> {
        let _ = (position, sql_type);
        Err(DriverError::Unsupported("output parameters".to_string()))
    }

    /// Read an output parameter after execution
    fn out_parameter(&mut self, position: ParamPosition) -> DriverResult<DataValue> {
        let _ = position;
        Err(DriverError::Unsupported("output parameters".to_string()))
    }

    /// Execute the compiled statement with the bound parameters
    fn execute(&mut self) -> DriverResult<Execution> {
        Err(DriverError::Unsupported("execute without SQL text".to_string()))
    }

    /// Execute literal SQL text on a plain statement
    fn execute_sql(&mut self, sql: &str) -> DriverResult<Execution> {
        let _ = sql;
        Err(DriverError::Unsupported("execute with SQL text".to_string()))
    }

    /// Queue the current parameter set
    fn add_batch(&mut self) -> DriverResult<()> {
        Err(DriverError::Unsupported("parameter batches".to_string()))
    }

    /// Queue literal SQL text on a plain statement
    fn add_batch_sql(&mut self, sql: &str) -> DriverResult<()> {
        let _ = sql;
        Err(DriverError::Unsupported("SQL text batches".to_string()))
    }

    /// Run every queued unit in one round trip, returning per-unit counts
    fn execute_batch(&mut self) -> DriverResult<Vec<u64>>;

    /// Keys generated by the last execution
    fn generated_keys(&mut self) -> DriverResult<Vec<Row>> {
        Ok(Vec::new())
    }

    /// Release the statement; closing twice is a no-op
    fn close(&mut self) -> DriverResult<()>;
}

/// A forward-only result set
pub trait DriverRows: Send {
    fn columns(&self) -> &[String];

    /// Fetch the next row, `None` once the set is exhausted
    fn next_row(&mut self) -> DriverResult<Option<Row>>;

    /// Release the result set; closing twice is a no-op
    fn close(&mut self) -> DriverResult<()>;
}
