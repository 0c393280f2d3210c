// Bound Query Plans
//
// The immutable input handed to this crate by the query compiler: SQL text,
// ordered parameter bindings and the execution settings for one invocation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{DataValue, ExecutionMode, KeyGeneration, ParamPosition, ParameterMode, SqlType, TimeoutSecs};

/// Opaque token naming the expected row shape, interpreted by the mapping layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResultDescriptor(String);

impl ResultDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        ResultDescriptor(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value bound to one positional placeholder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub position: ParamPosition,
    pub value: DataValue,
    /// `None` lets the binder pick a type from the value itself
    pub declared_type: Option<SqlType>,
    pub mode: ParameterMode,
}

impl ParameterBinding {
    pub fn new(position: ParamPosition, value: impl Into<DataValue>, declared_type: SqlType) -> Self {
        ParameterBinding {
            position,
            value: value.into(),
            declared_type: Some(declared_type),
            mode: ParameterMode::In,
        }
    }

    /// Binding whose type is inferred from its value at bind time
    pub fn untyped(position: ParamPosition, value: impl Into<DataValue>) -> Self {
        ParameterBinding {
            position,
            value: value.into(),
            declared_type: None,
            mode: ParameterMode::In,
        }
    }

    /// Output slot of a callable statement
    pub fn output(position: ParamPosition, declared_type: SqlType) -> Self {
        ParameterBinding {
            position,
            value: DataValue::Null,
            declared_type: Some(declared_type),
            mode: ParameterMode::Out,
        }
    }

    pub fn with_mode(mut self, mode: ParameterMode) -> Self {
        self.mode = mode;
        self
    }
}

/// SQL plus everything needed to execute it once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundQueryPlan {
    id: String,
    sql: String,
    parameters: Vec<ParameterBinding>,
    result_descriptor: ResultDescriptor,
    timeout_seconds: Option<TimeoutSecs>,
    fetch_size: Option<u32>,
    max_rows: Option<u64>,
    execution_mode: ExecutionMode,
    key_generation: KeyGeneration,
}

impl BoundQueryPlan {
    pub fn builder(id: impl Into<String>, sql: impl Into<String>) -> BoundQueryPlanBuilder {
        BoundQueryPlanBuilder::new(id, sql)
    }

    /// Identity of the plan, used in logs and errors
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[ParameterBinding] {
        &self.parameters
    }

    /// Bindings that carry a value into the statement
    pub fn input_parameters(&self) -> impl Iterator<Item = &ParameterBinding> {
        self.parameters.iter().filter(|p| p.mode.is_input())
    }

    /// Bindings read back after a callable statement runs
    pub fn output_parameters(&self) -> impl Iterator<Item = &ParameterBinding> {
        self.parameters.iter().filter(|p| p.mode.is_output())
    }

    pub fn result_descriptor(&self) -> &ResultDescriptor {
        &self.result_descriptor
    }

    pub fn timeout_seconds(&self) -> Option<TimeoutSecs> {
        self.timeout_seconds
    }

    pub fn fetch_size(&self) -> Option<u32> {
        self.fetch_size
    }

    /// Row limit; zero means unlimited, like a zero timeout
    pub fn max_rows(&self) -> Option<u64> {
        self.max_rows.filter(|rows| *rows > 0)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn key_generation(&self) -> &KeyGeneration {
        &self.key_generation
    }
}

/// Builder for [`BoundQueryPlan`]
#[derive(Debug, Clone)]
pub struct BoundQueryPlanBuilder {
    plan: BoundQueryPlan,
}

impl BoundQueryPlanBuilder {
    fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        BoundQueryPlanBuilder {
            plan: BoundQueryPlan {
                id: id.into(),
                sql: sql.into(),
                parameters: Vec::new(),
                result_descriptor: ResultDescriptor::default(),
                timeout_seconds: None,
                fetch_size: None,
                max_rows: None,
                execution_mode: ExecutionMode::default(),
                key_generation: KeyGeneration::None,
            },
        }
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.plan.execution_mode = mode;
        self
    }

    /// Append an input parameter at the next position
    pub fn param(mut self, value: impl Into<DataValue>, declared_type: SqlType) -> Self {
        let position = self.plan.parameters.len() + 1;
        self.plan.parameters.push(ParameterBinding::new(position, value, declared_type));
        self
    }

    /// Append an output parameter at the next position
    pub fn out_param(mut self, declared_type: SqlType) -> Self {
        let position = self.plan.parameters.len() + 1;
        self.plan.parameters.push(ParameterBinding::output(position, declared_type));
        self
    }

    /// Append an input/output parameter at the next position
    pub fn inout_param(mut self, value: impl Into<DataValue>, declared_type: SqlType) -> Self {
        let position = self.plan.parameters.len() + 1;
        self.plan
            .parameters
            .push(ParameterBinding::new(position, value, declared_type).with_mode(ParameterMode::InOut));
        self
    }

    /// Replace all bindings with an explicit list, positions are kept as given
    pub fn bindings(mut self, bindings: Vec<ParameterBinding>) -> Self {
        self.plan.parameters = bindings;
        self
    }

    pub fn result_descriptor(mut self, descriptor: ResultDescriptor) -> Self {
        self.plan.result_descriptor = descriptor;
        self
    }

    pub fn timeout(mut self, seconds: TimeoutSecs) -> Self {
        self.plan.timeout_seconds = Some(seconds);
        self
    }

    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.plan.fetch_size = Some(rows);
        self
    }

    pub fn max_rows(mut self, rows: u64) -> Self {
        self.plan.max_rows = Some(rows);
        self
    }

    pub fn key_generation(mut self, key_generation: KeyGeneration) -> Self {
        self.plan.key_generation = key_generation;
        self
    }

    pub fn build(self) -> BoundQueryPlan {
        self.plan
    }
}
