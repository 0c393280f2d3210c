use crate::common::Row;

/// Progress of an eager delivery, handed to the row callback
#[derive(Debug, Default)]
pub struct ResultContext {
    count: usize,
    stopped: bool,
}

impl ResultContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows delivered so far, including the current one
    pub fn result_count(&self) -> usize {
        self.count
    }

    /// Ask for delivery to end after the current row
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub(crate) fn advance(&mut self) {
        self.count += 1;
    }
}

/// Receives each row of an eager query in result-set order.
///
/// Returning an error ends delivery; rows already handed over stay
/// delivered.
pub trait RowCallback {
    fn on_row(&mut self, row: Row, context: &mut ResultContext) -> anyhow::Result<()>;
}

impl<F> RowCallback for F
where
    F: FnMut(Row, &mut ResultContext) -> anyhow::Result<()>,
{
    fn on_row(&mut self, row: Row, context: &mut ResultContext) -> anyhow::Result<()> {
        self(row, context)
    }
}

/// Callback that keeps every row
#[derive(Debug, Default)]
pub struct CollectRows {
    pub rows: Vec<Row>,
}

impl RowCallback for CollectRows {
    fn on_row(&mut self, row: Row, _context: &mut ResultContext) -> anyhow::Result<()> {
        self.rows.push(row);
        Ok(())
    }
}
