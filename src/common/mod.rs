pub mod types;
pub mod value;

pub use types::{ExecutionMode, KeyGeneration, ParamPosition, ParameterMode, SqlType, TimeoutSecs};
pub use value::{DataValue, Row};
