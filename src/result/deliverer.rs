// Result Deliverer
//
// Two consumption modes over the same execution: eager materialization into
// an ordered Vec, or a lazy cursor pulled by the caller.

use crate::common::Row;
use crate::error::StatementResult;
use crate::result::callback::{CollectRows, ResultContext};
use crate::result::cursor::ResultCursor;
use crate::statement::{ExecutionStrategy, StatementHandle};

pub struct ResultDeliverer<'a> {
    strategy: &'a dyn ExecutionStrategy,
}

impl<'a> ResultDeliverer<'a> {
    pub fn new(strategy: &'a dyn ExecutionStrategy) -> Self {
        ResultDeliverer { strategy }
    }

    /// Run the query, handing every row to `f` in result-set order
    pub fn each_row<F>(&self, handle: &mut StatementHandle, mut f: F) -> StatementResult<()>
    where
        F: FnMut(Row, &mut ResultContext) -> anyhow::Result<()>,
    {
        self.strategy.query(handle, &mut f)
    }

    /// Run the query to completion and map every row.
    ///
    /// If the mapper fails the partial result is dropped and the error is
    /// returned.
    pub fn eager<T, M>(&self, handle: &mut StatementHandle, mut mapper: M) -> StatementResult<Vec<T>>
    where
        M: FnMut(Row) -> anyhow::Result<T>,
    {
        let mut mapped = Vec::new();
        self.each_row(handle, |row, _| {
            mapped.push(mapper(row)?);
            Ok(())
        })?;
        Ok(mapped)
    }

    /// Run the query to completion and keep the rows as delivered
    pub fn eager_rows(&self, handle: &mut StatementHandle) -> StatementResult<Vec<Row>> {
        let mut collect = CollectRows::default();
        self.strategy.query(handle, &mut collect)?;
        Ok(collect.rows)
    }

    /// Run the query and return a cursor positioned before the first row
    pub fn lazy(&self, handle: &mut StatementHandle) -> StatementResult<ResultCursor> {
        self.strategy.query_lazy(handle)
    }
}
