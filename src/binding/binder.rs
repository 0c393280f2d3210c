// Parameter Binder
//
// Writes the ordered bindings of a plan onto a driver statement, coercing
// every value through the rule registered for its declared type.

use std::sync::Arc;

use log::debug;

use crate::binding::coercion::TypeRegistry;
use crate::common::{DataValue, SqlType};
use crate::driver::DriverStatement;
use crate::error::{BindError, StatementResult};
use crate::plan::ParameterBinding;
use crate::statement::StatementHandle;

/// Binds parameter values onto statements just before execution
#[derive(Clone)]
pub struct ParameterBinder {
    registry: Arc<TypeRegistry>,
    null_type: SqlType,
}

impl Default for ParameterBinder {
    fn default() -> Self {
        Self::new(TypeRegistry::shared_default(), SqlType::Other)
    }
}

impl ParameterBinder {
    /// `null_type` is bound for a null value that has no declared type
    pub fn new(registry: Arc<TypeRegistry>, null_type: SqlType) -> Self {
        ParameterBinder { registry, null_type }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Bind `bindings` onto the statement owned by `handle`
    pub fn bind(&self, handle: &mut StatementHandle, bindings: &[ParameterBinding]) -> StatementResult<()> {
        let plan_id = handle.plan_id().to_string();
        let statement = handle.driver()?;
        self.bind_statement(&plan_id, statement, bindings)?;
        Ok(())
    }

    /// Bind directly onto a driver statement.
    ///
    /// Positions must run 1, 2, 3, ... in order. Output-only bindings are
    /// skipped; their slots are registered when a callable statement is
    /// prepared.
    pub fn bind_statement(
        &self,
        plan_id: &str,
        statement: &mut dyn DriverStatement,
        bindings: &[ParameterBinding],
    ) -> Result<(), BindError> {
        let mut logged = Vec::with_capacity(bindings.len());

        for (index, binding) in bindings.iter().enumerate() {
            let expected = index + 1;
            if binding.position != expected {
                return Err(BindError::Position {
                    plan: plan_id.to_string(),
                    expected,
                    found: binding.position,
                });
            }
            if !binding.mode.is_input() {
                continue;
            }

            let sql_type = self.resolve_type(binding);
            let value = self.coerce(plan_id, binding, &sql_type)?;
            logged.push(match &value {
                DataValue::Null => "null".to_string(),
                v => format!("{}({})", v, v.type_label()),
            });

            let applied = if value.is_null() {
                statement.set_null(binding.position, &sql_type)
            } else {
                statement.set_parameter(binding.position, value, &sql_type)
            };
            applied.map_err(|source| BindError::DriverRejected {
                plan: plan_id.to_string(),
                position: binding.position,
                source,
            })?;
        }

        debug!("==> Parameters: {}", logged.join(", "));
        Ok(())
    }

    fn resolve_type(&self, binding: &ParameterBinding) -> SqlType {
        binding
            .declared_type
            .clone()
            .or_else(|| binding.value.natural_type())
            .unwrap_or_else(|| self.null_type.clone())
    }

    fn coerce(&self, plan_id: &str, binding: &ParameterBinding, sql_type: &SqlType) -> Result<DataValue, BindError> {
        let rule = self.registry.resolve(sql_type).ok_or_else(|| BindError::UnsupportedType {
            plan: plan_id.to_string(),
            position: binding.position,
            sql_type: sql_type.clone(),
        })?;
        if binding.value.is_null() {
            return Ok(DataValue::Null);
        }
        rule.coerce(binding.value.clone()).map_err(|message| BindError::Coercion {
            plan: plan_id.to_string(),
            position: binding.position,
            sql_type: sql_type.clone(),
            message,
        })
    }
}
