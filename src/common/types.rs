use std::fmt;

use serde::{Deserialize, Serialize};

/// 1-based placeholder position on a statement
pub type ParamPosition = usize;

/// Query timeout in whole seconds
pub type TimeoutSecs = u32;

/// Selects which execution strategy handles a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Plain statement, SQL text supplied at execution time
    Direct,
    /// Parameterized statement template compiled once
    #[default]
    Precompiled,
    /// Stored-routine invocation with input and output slots
    Callable,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Direct => write!(f, "DIRECT"),
            ExecutionMode::Precompiled => write!(f, "PRECOMPILED"),
            ExecutionMode::Callable => write!(f, "CALLABLE"),
        }
    }
}

/// Direction of a parameter on a callable statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

impl ParameterMode {
    /// Whether a value is written to the placeholder before execution
    pub fn is_input(&self) -> bool {
        matches!(self, ParameterMode::In | ParameterMode::InOut)
    }

    /// Whether the slot is read back after execution
    pub fn is_output(&self) -> bool {
        matches!(self, ParameterMode::Out | ParameterMode::InOut)
    }
}

/// Declared SQL type of a parameter.
///
/// The built-in variants always have a coercion rule in the default
/// registry. `Named` types only bind once a rule has been registered for
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Char,
    Varchar,
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    Blob,
    /// Untyped slot, the value is passed through as is
    Other,
    /// Vendor or user type resolved through a registered rule
    Named(String),
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Float => write!(f, "FLOAT"),
            SqlType::Double => write!(f, "DOUBLE"),
            SqlType::Char => write!(f, "CHAR"),
            SqlType::Varchar => write!(f, "VARCHAR"),
            SqlType::Text => write!(f, "TEXT"),
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Time => write!(f, "TIME"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::Blob => write!(f, "BLOB"),
            SqlType::Other => write!(f, "OTHER"),
            SqlType::Named(name) => write!(f, "{}", name),
        }
    }
}

/// How keys produced by an insert are collected
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyGeneration {
    #[default]
    None,
    /// Ask the driver for generated keys, optionally restricted to the named columns
    Generated { columns: Vec<String> },
}

impl KeyGeneration {
    pub fn is_enabled(&self) -> bool {
        matches!(self, KeyGeneration::Generated { .. })
    }
}
