// Parameter Binding Module
//
// Coercion rules per declared SQL type and the binder applying them to
// statements.

pub mod binder;
pub mod coercion;

pub use binder::ParameterBinder;
pub use coercion::{CoercionRule, TypeRegistry};
