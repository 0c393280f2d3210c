use thiserror::Error;

use crate::common::{ParamPosition, SqlType};
use crate::driver::DriverError;

/// Failure while allocating a statement
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("malformed SQL in '{plan}': {source}")]
    Malformed { plan: String, source: DriverError },
    #[error("resource unavailable while preparing '{plan}': {source}")]
    ResourceUnavailable { plan: String, source: DriverError },
    #[error("driver error while preparing '{plan}': {source}")]
    Driver { plan: String, source: DriverError },
}

impl PrepareError {
    /// Classify a driver failure raised during prepare
    pub fn from_driver(plan: &str, source: DriverError) -> Self {
        let plan = plan.to_string();
        match source {
            DriverError::Syntax(_) => PrepareError::Malformed { plan, source },
            DriverError::ResourceUnavailable(_) => PrepareError::ResourceUnavailable { plan, source },
            _ => PrepareError::Driver { plan, source },
        }
    }
}

/// Failure while binding parameters
#[derive(Error, Debug)]
pub enum BindError {
    #[error("no coercion rule for type {sql_type} at parameter {position} of '{plan}'")]
    UnsupportedType { plan: String, position: ParamPosition, sql_type: SqlType },
    #[error("driver rejected parameter {position} of '{plan}': {source}")]
    DriverRejected { plan: String, position: ParamPosition, source: DriverError },
    #[error("cannot coerce parameter {position} of '{plan}' to {sql_type}: {message}")]
    Coercion { plan: String, position: ParamPosition, sql_type: SqlType, message: String },
    #[error("parameter positions of '{plan}' must be contiguous from 1: expected {expected}, found {found}")]
    Position { plan: String, expected: ParamPosition, found: ParamPosition },
    #[error("'{plan}' runs as a direct statement and cannot take {count} bound parameter(s)")]
    NotBindable { plan: String, count: usize },
}

impl BindError {
    /// Position of the failing parameter, if the error concerns one
    pub fn position(&self) -> Option<ParamPosition> {
        match self {
            BindError::UnsupportedType { position, .. }
            | BindError::DriverRejected { position, .. }
            | BindError::Coercion { position, .. } => Some(*position),
            BindError::Position { found, .. } => Some(*found),
            BindError::NotBindable { .. } => None,
        }
    }
}

/// Error surfaced by every statement operation
#[derive(Error, Debug)]
pub enum StatementError {
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("execution of '{plan}' failed: {source}")]
    Exec { plan: String, source: DriverError },
    #[error("row callback for '{plan}' failed at row {row}: {source}")]
    Callback { plan: String, row: usize, source: anyhow::Error },
    #[error("illegal state for '{plan}': {message}")]
    IllegalState { plan: String, message: String },
}

impl StatementError {
    pub(crate) fn exec(plan: &str, source: DriverError) -> Self {
        StatementError::Exec { plan: plan.to_string(), source }
    }

    pub(crate) fn illegal_state(plan: &str, message: impl Into<String>) -> Self {
        StatementError::IllegalState { plan: plan.to_string(), message: message.into() }
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, StatementError::IllegalState { .. })
    }

    /// Identity of the plan the error was raised for
    pub fn plan(&self) -> &str {
        match self {
            StatementError::Prepare(
                PrepareError::Malformed { plan, .. }
                | PrepareError::ResourceUnavailable { plan, .. }
                | PrepareError::Driver { plan, .. },
            ) => plan,
            StatementError::Bind(
                BindError::UnsupportedType { plan, .. }
                | BindError::DriverRejected { plan, .. }
                | BindError::Coercion { plan, .. }
                | BindError::Position { plan, .. }
                | BindError::NotBindable { plan, .. },
            ) => plan,
            StatementError::Exec { plan, .. }
            | StatementError::Callback { plan, .. }
            | StatementError::IllegalState { plan, .. } => plan,
        }
    }
}

/// Result type for statement operations
pub type StatementResult<T> = Result<T, StatementError>;
