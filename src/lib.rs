// Statement Execution Layer
//
// Turns a bound query plan into driver calls: prepare, bind, execute and
// deliver results, releasing every statement on every exit path.

pub mod binding;
pub mod common;
pub mod config;
pub mod driver;
pub mod error;
pub mod plan;
pub mod result;
pub mod statement;

// Re-export key items for convenient access
pub use binding::{CoercionRule, ParameterBinder, TypeRegistry};
pub use common::{DataValue, ExecutionMode, KeyGeneration, ParameterMode, Row, SqlType};
pub use config::ExecutorConfig;
pub use driver::{Connection, DriverError};
pub use error::{BindError, PrepareError, StatementError, StatementResult};
pub use plan::{BoundQueryPlan, ParameterBinding, ResultDescriptor};
pub use result::{ResultContext, ResultCursor, ResultDeliverer, RowCallback};
pub use statement::{ExecutionStrategy, HandleState, StatementHandle, StatementRouter};
