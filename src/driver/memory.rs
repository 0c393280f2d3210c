// In-Memory Driver
//
// A scripted driver: every statement the database accepts is registered with
// a handler that computes its outcome from the bound parameters. It keeps
// counters of open statements, open result sets and round trips so callers
// can check that resources are released.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::common::{DataValue, ParamPosition, Row, SqlType, TimeoutSecs};
use crate::driver::{Connection, DriverError, DriverResult, DriverRows, DriverStatement, Execution};

type Handler = Arc<dyn Fn(&Invocation) -> DriverResult<Outcome> + Send + Sync>;

/// One execution as seen by a handler
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub sql: String,
    pub params: BTreeMap<ParamPosition, DataValue>,
    pub max_rows: Option<u64>,
}

impl Invocation {
    /// Bound value at `position`, `Null` when nothing was bound there
    pub fn param(&self, position: ParamPosition) -> &DataValue {
        self.params.get(&position).unwrap_or(&DataValue::Null)
    }
}

/// Result computed by a handler
#[derive(Debug, Clone)]
pub struct Outcome {
    response: Response,
    outputs: BTreeMap<ParamPosition, DataValue>,
    keys: Vec<Row>,
}

#[derive(Debug, Clone)]
enum Response {
    Rows { columns: Vec<String>, rows: Vec<Vec<DataValue>> },
    Count(u64),
}

impl Outcome {
    pub fn rows(columns: &[&str], rows: Vec<Vec<DataValue>>) -> Self {
        Outcome {
            response: Response::Rows { columns: columns.iter().map(|c| c.to_string()).collect(), rows },
            outputs: BTreeMap::new(),
            keys: Vec::new(),
        }
    }

    pub fn count(count: u64) -> Self {
        Outcome { response: Response::Count(count), outputs: BTreeMap::new(), keys: Vec::new() }
    }

    /// Set an output parameter value, readable once the slot is registered
    pub fn with_output(mut self, position: ParamPosition, value: DataValue) -> Self {
        self.outputs.insert(position, value);
        self
    }

    /// Keys reported when the statement asked for generated keys
    pub fn with_keys(mut self, keys: Vec<Row>) -> Self {
        self.keys = keys;
        self
    }
}

/// Settings last applied to a statement, per SQL text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppliedSettings {
    pub query_timeout: Option<TimeoutSecs>,
    pub fetch_size: Option<u32>,
    pub max_rows: Option<u64>,
}

#[derive(Default)]
struct MemoryState {
    handlers: HashMap<String, Handler>,
    exhausted: bool,
    open_statements: usize,
    open_result_sets: usize,
    round_trips: usize,
    last_bound: HashMap<String, BTreeMap<ParamPosition, (DataValue, SqlType)>>,
    last_settings: HashMap<String, AppliedSettings>,
}

/// Shared state behind every connection to the same in-memory database
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection { db: self.clone() }
    }

    /// Register a statement with a general handler
    pub fn on<F>(&self, sql: &str, handler: F)
    where
        F: Fn(&Invocation) -> DriverResult<Outcome> + Send + Sync + 'static,
    {
        self.state.lock().handlers.insert(sql.to_string(), Arc::new(handler));
    }

    /// Register a statement returning rows with fixed columns
    pub fn on_query<F>(&self, sql: &str, columns: &[&str], handler: F)
    where
        F: Fn(&Invocation) -> DriverResult<Vec<Vec<DataValue>>> + Send + Sync + 'static,
    {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.on(sql, move |inv| {
            let rows = handler(inv)?;
            Ok(Outcome { response: Response::Rows { columns: columns.clone(), rows }, outputs: BTreeMap::new(), keys: Vec::new() })
        });
    }

    /// Register a statement returning an update count
    pub fn on_update<F>(&self, sql: &str, handler: F)
    where
        F: Fn(&Invocation) -> DriverResult<u64> + Send + Sync + 'static,
    {
        self.on(sql, move |inv| handler(inv).map(Outcome::count));
    }

    /// Make every new statement fail as if the pool had no connection left
    pub fn set_exhausted(&self, exhausted: bool) {
        self.state.lock().exhausted = exhausted;
    }

    pub fn open_statements(&self) -> usize {
        self.state.lock().open_statements
    }

    pub fn open_result_sets(&self) -> usize {
        self.state.lock().open_result_sets
    }

    /// Executions sent to the database, a batch counts once
    pub fn round_trips(&self) -> usize {
        self.state.lock().round_trips
    }

    /// Values and types last bound on a statement with this SQL
    pub fn last_bound(&self, sql: &str) -> Option<BTreeMap<ParamPosition, (DataValue, SqlType)>> {
        self.state.lock().last_bound.get(sql).cloned()
    }

    pub fn last_settings(&self, sql: &str) -> Option<AppliedSettings> {
        self.state.lock().last_settings.get(sql).copied()
    }

    fn handler(&self, sql: &str) -> DriverResult<Handler> {
        self.state
            .lock()
            .handlers
            .get(sql)
            .cloned()
            .ok_or_else(|| DriverError::Syntax(format!("unrecognized statement: {}", sql)))
    }

    fn open_statement(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.exhausted {
            return Err(DriverError::ResourceUnavailable("no connection available".to_string()));
        }
        state.open_statements += 1;
        Ok(())
    }
}

/// Connection to a [`MemoryDatabase`]
pub struct MemoryConnection {
    db: MemoryDatabase,
}

impl MemoryConnection {
    fn statement(&self, kind: StatementKind, sql: Option<&str>, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>> {
        if let Some(sql) = sql {
            self.db.handler(sql)?;
        }
        self.db.open_statement()?;
        Ok(Box::new(MemoryStatement {
            db: self.db.clone(),
            kind,
            sql: sql.map(str::to_string),
            placeholders: sql.map(count_placeholders).unwrap_or(0),
            params: BTreeMap::new(),
            out_slots: BTreeMap::new(),
            outputs: BTreeMap::new(),
            batch: Vec::new(),
            settings: AppliedSettings::default(),
            keys: Vec::new(),
            return_keys,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

impl Connection for MemoryConnection {
    fn create_statement(&mut self, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>> {
        self.statement(StatementKind::Plain, None, return_keys)
    }

    fn prepare_statement(&mut self, sql: &str, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>> {
        self.statement(StatementKind::Prepared, Some(sql), return_keys)
    }

    fn prepare_call(&mut self, sql: &str) -> DriverResult<Box<dyn DriverStatement>> {
        self.statement(StatementKind::Callable, Some(sql), false)
    }
}

fn count_placeholders(sql: &str) -> usize {
    sql.chars().filter(|c| *c == '?').count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Plain,
    Prepared,
    Callable,
}

enum BatchUnit {
    Params(BTreeMap<ParamPosition, DataValue>),
    Sql(String),
}

struct MemoryStatement {
    db: MemoryDatabase,
    kind: StatementKind,
    sql: Option<String>,
    placeholders: usize,
    params: BTreeMap<ParamPosition, DataValue>,
    out_slots: BTreeMap<ParamPosition, SqlType>,
    outputs: BTreeMap<ParamPosition, DataValue>,
    batch: Vec<BatchUnit>,
    settings: AppliedSettings,
    keys: Vec<Row>,
    return_keys: bool,
    closed: Arc<AtomicBool>,
}

impl MemoryStatement {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_position(&self, position: ParamPosition) -> DriverResult<()> {
        if position == 0 || position > self.placeholders {
            return Err(DriverError::Rejected(format!(
                "parameter index {} out of range (1..={})",
                position, self.placeholders
            )));
        }
        Ok(())
    }

    fn record_settings(&self) {
        if let Some(sql) = &self.sql {
            self.db.state.lock().last_settings.insert(sql.clone(), self.settings);
        }
    }

    fn record_bound(&self, position: ParamPosition, value: DataValue, sql_type: &SqlType) {
        if let Some(sql) = &self.sql {
            self.db
                .state
                .lock()
                .last_bound
                .entry(sql.clone())
                .or_default()
                .insert(position, (value, sql_type.clone()));
        }
    }

    fn invocation(&self, sql: &str, params: BTreeMap<ParamPosition, DataValue>) -> Invocation {
        Invocation { sql: sql.to_string(), params, max_rows: self.settings.max_rows }
    }

    /// Every placeholder needs a value unless it is a registered output slot
    fn check_complete(&self, params: &BTreeMap<ParamPosition, DataValue>) -> DriverResult<()> {
        for position in 1..=self.placeholders {
            if !params.contains_key(&position) && !self.out_slots.contains_key(&position) {
                return Err(DriverError::Execution(format!("no value specified for parameter {}", position)));
            }
        }
        Ok(())
    }

    fn run(&mut self, sql: &str, params: BTreeMap<ParamPosition, DataValue>) -> DriverResult<Execution> {
        let handler = self.db.handler(sql)?;
        self.db.state.lock().round_trips += 1;
        let outcome = handler(&self.invocation(sql, params))?;

        self.outputs = outcome
            .outputs
            .into_iter()
            .filter(|(position, _)| self.out_slots.contains_key(position))
            .collect();
        self.keys = if self.return_keys { outcome.keys } else { Vec::new() };

        match outcome.response {
            Response::Count(count) => Ok(Execution::UpdateCount(count)),
            Response::Rows { columns, rows } => {
                let limit = self.settings.max_rows.map(|m| m as usize).unwrap_or(usize::MAX);
                let rows = rows
                    .into_iter()
                    .take(limit)
                    .map(|values| Row::from_values(columns.clone(), values))
                    .collect();
                self.db.state.lock().open_result_sets += 1;
                Ok(Execution::Rows(Box::new(MemoryRows {
                    db: self.db.clone(),
                    columns,
                    rows,
                    statement_closed: self.closed.clone(),
                    closed: false,
                })))
            }
        }
    }
}

impl DriverStatement for MemoryStatement {
    fn set_query_timeout(&mut self, seconds: TimeoutSecs) -> DriverResult<()> {
        self.ensure_open()?;
        self.settings.query_timeout = Some(seconds);
        self.record_settings();
        Ok(())
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.ensure_open()?;
        self.settings.fetch_size = Some(rows);
        self.record_settings();
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()> {
        self.ensure_open()?;
        self.settings.max_rows = Some(rows);
        self.record_settings();
        Ok(())
    }

    fn set_parameter(&mut self, position: ParamPosition, value: DataValue, sql_type: &SqlType) -> DriverResult<()> {
        self.ensure_open()?;
        self.check_position(position)?;
        self.record_bound(position, value.clone(), sql_type);
        self.params.insert(position, value);
        Ok(())
    }

    fn set_null(&mut self, position: ParamPosition, sql_type: &SqlType) -> DriverResult<()> {
        self.ensure_open()?;
        self.check_position(position)?;
        self.record_bound(position, DataValue::Null, sql_type);
        self.params.insert(position, DataValue::Null);
        Ok(())
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.params.clear();
        Ok(())
    }

    fn register_out_parameter(&mut self, position: ParamPosition, sql_type: &SqlType) -> DriverResult<()> {
        self.ensure_open()?;
        if self.kind != StatementKind::Callable {
            return Err(DriverError::Unsupported("output parameters on a non-callable statement".to_string()));
        }
        self.check_position(position)?;
        self.out_slots.insert(position, sql_type.clone());
        Ok(())
    }

    fn out_parameter(&mut self, position: ParamPosition) -> DriverResult<DataValue> {
        self.ensure_open()?;
        if !self.out_slots.contains_key(&position) {
            return Err(DriverError::Rejected(format!("parameter {} is not registered as output", position)));
        }
        Ok(self.outputs.get(&position).cloned().unwrap_or(DataValue::Null))
    }

    fn execute(&mut self) -> DriverResult<Execution> {
        self.ensure_open()?;
        let Some(sql) = self.sql.clone() else {
            return Err(DriverError::Unsupported("execute without SQL text on a plain statement".to_string()));
        };
        self.check_complete(&self.params)?;
        let params = self.params.clone();
        self.run(&sql, params)
    }

    fn execute_sql(&mut self, sql: &str) -> DriverResult<Execution> {
        self.ensure_open()?;
        if self.kind != StatementKind::Plain {
            return Err(DriverError::Unsupported("SQL text on a prepared statement".to_string()));
        }
        self.run(sql, BTreeMap::new())
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        if self.kind == StatementKind::Plain {
            return Err(DriverError::Unsupported("parameter batches on a plain statement".to_string()));
        }
        self.check_complete(&self.params)?;
        self.batch.push(BatchUnit::Params(self.params.clone()));
        Ok(())
    }

    fn add_batch_sql(&mut self, sql: &str) -> DriverResult<()> {
        self.ensure_open()?;
        if self.kind != StatementKind::Plain {
            return Err(DriverError::Unsupported("SQL text batches on a prepared statement".to_string()));
        }
        self.db.handler(sql)?;
        self.batch.push(BatchUnit::Sql(sql.to_string()));
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<u64>> {
        self.ensure_open()?;
        let units = std::mem::take(&mut self.batch);
        self.db.state.lock().round_trips += 1;

        let mut counts = Vec::with_capacity(units.len());
        for unit in units {
            let (sql, params) = match unit {
                BatchUnit::Params(params) => match &self.sql {
                    Some(sql) => (sql.clone(), params),
                    None => return Err(DriverError::Execution("parameter batch without SQL text".to_string())),
                },
                BatchUnit::Sql(sql) => (sql, BTreeMap::new()),
            };
            let handler = self.db.handler(&sql)?;
            match handler(&self.invocation(&sql, params))?.response {
                Response::Count(count) => counts.push(count),
                Response::Rows { .. } => {
                    return Err(DriverError::Execution("batch entry produced a result set".to_string()));
                }
            }
        }
        Ok(counts)
    }

    fn generated_keys(&mut self) -> DriverResult<Vec<Row>> {
        self.ensure_open()?;
        Ok(self.keys.clone())
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut state = self.db.state.lock();
            state.open_statements = state.open_statements.saturating_sub(1);
        }
        Ok(())
    }
}

struct MemoryRows {
    db: MemoryDatabase,
    columns: Vec<String>,
    rows: VecDeque<Row>,
    statement_closed: Arc<AtomicBool>,
    closed: bool,
}

impl DriverRows for MemoryRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DriverResult<Option<Row>> {
        if self.closed || self.statement_closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.db.state.lock();
            state.open_result_sets = state.open_result_sets.saturating_sub(1);
        }
        Ok(())
    }
}
