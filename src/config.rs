use serde::{Deserialize, Serialize};

use crate::common::{SqlType, TimeoutSecs};

/// Defaults applied to every statement the executor prepares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout used when a plan does not declare one
    pub default_statement_timeout: Option<TimeoutSecs>,

    /// Fetch size used when a plan does not declare one
    pub default_fetch_size: Option<u32>,

    /// Type bound for a null parameter that has no declared type
    pub null_type: SqlType,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_statement_timeout: None,
            default_fetch_size: None,
            null_type: SqlType::Other,
        }
    }
}

impl ExecutorConfig {
    /// Resolve the query timeout for a statement.
    ///
    /// The statement timeout falls back to the configured default. A
    /// transaction timeout replaces it when no statement timeout is set or
    /// when it is the shorter of the two.
    pub fn effective_timeout(
        &self,
        statement_timeout: Option<TimeoutSecs>,
        transaction_timeout: Option<TimeoutSecs>,
    ) -> Option<TimeoutSecs> {
        let query_timeout = statement_timeout
            .or(self.default_statement_timeout)
            .filter(|t| *t > 0);
        match (query_timeout, transaction_timeout) {
            (None, tx) => tx,
            (Some(q), Some(tx)) if tx < q => Some(tx),
            (q, _) => q,
        }
    }

    pub fn effective_fetch_size(&self, fetch_size: Option<u32>) -> Option<u32> {
        fetch_size.or(self.default_fetch_size)
    }
}
