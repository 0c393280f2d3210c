// SQLite Driver
//
// Adapter from the driver traits onto rusqlite. SQL is compiled when a
// statement is prepared to surface syntax errors early, and again on each
// execution since a rusqlite statement cannot outlive its connection borrow.
//
// Result sets stream from a reader thread that owns the connection lock
// until the set is exhausted or closed. At most `fetch_size` rows are
// buffered ahead of the consumer. Other statements on the same connection
// wait for that lock and fail with `ResourceUnavailable` if it is not
// released in time.
//
// A query timeout maps to SQLite's busy timeout. It is applied for the
// duration of one execution and the connection's own value is restored
// afterwards.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{ErrorCode, params_from_iter};

use crate::common::{DataValue, ParamPosition, Row, SqlType, TimeoutSecs};
use crate::driver::{Connection, DriverError, DriverResult, DriverRows, DriverStatement, Execution};

/// Column name used for the key reported after an insert
pub const ROWID_COLUMN: &str = "rowid";

/// How long an operation waits for a connection held by an open result set
const CONNECTION_WAIT: Duration = Duration::from_secs(2);

/// Interval at which a blocked reader checks whether its statement was closed
const READER_POLL: Duration = Duration::from_millis(50);

/// Rows buffered ahead of the consumer when no fetch size is set
const DEFAULT_PREFETCH: usize = 64;

type SharedConnection = Arc<Mutex<rusqlite::Connection>>;

/// Connection to a SQLite database
#[derive(Clone)]
pub struct SqliteConnection {
    conn: SharedConnection,
}

impl SqliteConnection {
    pub fn open_in_memory() -> DriverResult<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(open_error)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> DriverResult<Self> {
        let conn = rusqlite::Connection::open(path).map_err(open_error)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        SqliteConnection { conn: Arc::new(Mutex::new(conn)) }
    }

    /// Run one or more statements outside the execution layer, e.g. schema setup
    pub fn execute_script(&self, sql: &str) -> DriverResult<()> {
        acquire(&self.conn)?.execute_batch(sql).map_err(execution_error)
    }

    fn statement(&self, sql: Option<&str>, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>> {
        let placeholders = match sql {
            Some(sql) => {
                let conn = acquire(&self.conn)?;
                let compiled = conn.prepare(sql).map_err(prepare_error)?;
                compiled.parameter_count()
            }
            None => 0,
        };
        Ok(Box::new(SqliteStatement {
            conn: self.conn.clone(),
            sql: sql.map(str::to_string),
            placeholders,
            params: BTreeMap::new(),
            batch: Vec::new(),
            timeout: None,
            fetch_size: None,
            max_rows: None,
            return_keys,
            keys: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

impl Connection for SqliteConnection {
    fn create_statement(&mut self, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>> {
        self.statement(None, return_keys)
    }

    fn prepare_statement(&mut self, sql: &str, return_keys: bool) -> DriverResult<Box<dyn DriverStatement>> {
        self.statement(Some(sql), return_keys)
    }

    fn prepare_call(&mut self, _sql: &str) -> DriverResult<Box<dyn DriverStatement>> {
        Err(DriverError::Unsupported("SQLite has no stored routines".to_string()))
    }
}

fn acquire(conn: &Mutex<rusqlite::Connection>) -> DriverResult<MutexGuard<'_, rusqlite::Connection>> {
    conn.try_lock_for(CONNECTION_WAIT)
        .ok_or_else(|| DriverError::ResourceUnavailable("connection is held by an open result set".to_string()))
}

/// Run `f` with `timeout` as the busy timeout, then put the previous value back
fn with_busy_timeout<T>(
    conn: &rusqlite::Connection,
    timeout: Option<TimeoutSecs>,
    f: impl FnOnce() -> DriverResult<T>,
) -> DriverResult<T> {
    let Some(seconds) = timeout else {
        return f();
    };
    let previous: i64 = conn
        .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
        .map_err(execution_error)?;
    conn.busy_timeout(Duration::from_secs(u64::from(seconds))).map_err(execution_error)?;

    let result = f();
    let restored = conn
        .busy_timeout(Duration::from_millis(previous.max(0) as u64))
        .map_err(execution_error);
    let value = result?;
    restored?;
    Ok(value)
}

fn open_error(err: rusqlite::Error) -> DriverError {
    DriverError::ResourceUnavailable(err.to_string())
}

fn prepare_error(err: rusqlite::Error) -> DriverError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OutOfMemory | ErrorCode::CannotOpen
            ) =>
        {
            DriverError::ResourceUnavailable(err.to_string())
        }
        _ => DriverError::Syntax(err.to_string()),
    }
}

fn execution_error(err: rusqlite::Error) -> DriverError {
    DriverError::Execution(err.to_string())
}

fn to_sqlite(value: DataValue) -> Value {
    match value {
        DataValue::Null => Value::Null,
        DataValue::Integer(i) => Value::Integer(i),
        DataValue::Float(f) => Value::Real(f),
        DataValue::Boolean(b) => Value::Integer(i64::from(b)),
        DataValue::Text(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::Timestamp(s) => Value::Text(s),
        DataValue::Blob(bytes) => Value::Blob(bytes),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> DataValue {
    match value {
        ValueRef::Null => DataValue::Null,
        ValueRef::Integer(i) => DataValue::Integer(i),
        ValueRef::Real(f) => DataValue::Float(f),
        ValueRef::Text(bytes) => DataValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => DataValue::Blob(bytes.to_vec()),
    }
}

enum BatchUnit {
    Params(Vec<Value>),
    Sql(String),
}

struct SqliteStatement {
    conn: SharedConnection,
    sql: Option<String>,
    placeholders: usize,
    params: BTreeMap<ParamPosition, Value>,
    batch: Vec<BatchUnit>,
    timeout: Option<TimeoutSecs>,
    fetch_size: Option<u32>,
    max_rows: Option<u64>,
    return_keys: bool,
    keys: Vec<Row>,
    closed: Arc<AtomicBool>,
}

impl SqliteStatement {
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

    /// Bound values in placeholder order
    fn bound_values(&self) -> DriverResult<Vec<Value>> {
        (1..=self.placeholders)
            .map(|position| {
                self.params
                    .get(&position)
                    .cloned()
                    .ok_or_else(|| DriverError::Execution(format!("no value specified for parameter {}", position)))
            })
            .collect()
    }

    fn run(&mut self, sql: &str, values: Vec<Value>) -> DriverResult<Execution> {
        let conn = acquire(&self.conn)?;
        let columns: Vec<String> = {
            let mut compiled = conn.prepare(sql).map_err(execution_error)?;
            if compiled.column_count() == 0 {
                let count = with_busy_timeout(&conn, self.timeout, || {
                    compiled.execute(params_from_iter(values.iter())).map_err(execution_error)
                })?;
                self.keys = if self.return_keys && count > 0 {
                    vec![Row::from_values(
                        vec![ROWID_COLUMN.to_string()],
                        vec![DataValue::Integer(conn.last_insert_rowid())],
                    )]
                } else {
                    Vec::new()
                };
                return Ok(Execution::UpdateCount(count as u64));
            }
            compiled.column_names().into_iter().map(str::to_string).collect()
        };
        drop(conn);
        self.keys.clear();

        let prefetch = match self.fetch_size {
            Some(rows) if rows > 0 => rows as usize,
            _ => DEFAULT_PREFETCH,
        };
        let reader = RowReader {
            conn: self.conn.clone(),
            sql: sql.to_string(),
            values,
            timeout: self.timeout,
            max_rows: self.max_rows,
            statement_closed: self.closed.clone(),
        };
        let rows = SqliteRows::open(reader, columns, prefetch)?;
        Ok(Execution::Rows(Box::new(rows)))
    }
}

impl DriverStatement for SqliteStatement {
    /// SQLite has no per-statement timeout; the busy timeout is the closest
    fn set_query_timeout(&mut self, seconds: TimeoutSecs) -> DriverResult<()> {
        self.ensure_open()?;
        self.timeout = Some(seconds);
        Ok(())
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.ensure_open()?;
        self.fetch_size = Some(rows);
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()> {
        self.ensure_open()?;
        self.max_rows = Some(rows);
        Ok(())
    }

    fn set_parameter(&mut self, position: ParamPosition, value: DataValue, _sql_type: &SqlType) -> DriverResult<()> {
        self.ensure_open()?;
        self.check_position(position)?;
        self.params.insert(position, to_sqlite(value));
        Ok(())
    }

    fn set_null(&mut self, position: ParamPosition, _sql_type: &SqlType) -> DriverResult<()> {
        self.ensure_open()?;
        self.check_position(position)?;
        self.params.insert(position, Value::Null);
        Ok(())
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.params.clear();
        Ok(())
    }

    fn execute(&mut self) -> DriverResult<Execution> {
        self.ensure_open()?;
        let Some(sql) = self.sql.clone() else {
            return Err(DriverError::Unsupported("execute without SQL text on a plain statement".to_string()));
        };
        let values = self.bound_values()?;
        self.run(&sql, values)
    }

    fn execute_sql(&mut self, sql: &str) -> DriverResult<Execution> {
        self.ensure_open()?;
        if self.sql.is_some() {
            return Err(DriverError::Unsupported("SQL text on a prepared statement".to_string()));
        }
        self.run(sql, Vec::new())
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        if self.sql.is_none() {
            return Err(DriverError::Unsupported("parameter batches on a plain statement".to_string()));
        }
        let values = self.bound_values()?;
        self.batch.push(BatchUnit::Params(values));
        Ok(())
    }

    fn add_batch_sql(&mut self, sql: &str) -> DriverResult<()> {
        self.ensure_open()?;
        if self.sql.is_some() {
            return Err(DriverError::Unsupported("SQL text batches on a prepared statement".to_string()));
        }
        self.batch.push(BatchUnit::Sql(sql.to_string()));
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<u64>> {
        self.ensure_open()?;
        let units = std::mem::take(&mut self.batch);
        let conn = acquire(&self.conn)?;
        let mut compiled = match &self.sql {
            Some(sql) => Some(conn.prepare(sql).map_err(execution_error)?),
            None => None,
        };

        with_busy_timeout(&conn, self.timeout, || {
            let mut counts = Vec::with_capacity(units.len());
            for unit in units {
                let count = match (unit, compiled.as_mut()) {
                    (BatchUnit::Params(values), Some(compiled)) => {
                        compiled.execute(params_from_iter(values.iter())).map_err(execution_error)?
                    }
                    (BatchUnit::Sql(sql), _) => conn.execute(&sql, []).map_err(execution_error)?,
                    (BatchUnit::Params(_), None) => {
                        return Err(DriverError::Execution("parameter batch without SQL text".to_string()));
                    }
                };
                counts.push(count as u64);
            }
            Ok(counts)
        })
    }

    fn generated_keys(&mut self) -> DriverResult<Vec<Row>> {
        self.ensure_open()?;
        Ok(self.keys.clone())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed.store(true, Ordering::Release);
        self.batch.clear();
        Ok(())
    }
}

/// Message from a reader thread to its result set
enum Fetched {
    /// The query started; rows follow
    Ready,
    Row(Row),
    Failed(DriverError),
}

/// A query run on its own thread, holding the connection until it is done
struct RowReader {
    conn: SharedConnection,
    sql: String,
    values: Vec<Value>,
    timeout: Option<TimeoutSecs>,
    max_rows: Option<u64>,
    statement_closed: Arc<AtomicBool>,
}

impl RowReader {
    fn run(self, sender: Sender<Fetched>) {
        if let Err(e) = self.read(&sender) {
            if !self.deliver(&sender, Fetched::Failed(e)) {
                debug!("Result reader stopped after its cursor went away");
            }
        }
    }

    fn read(&self, sender: &Sender<Fetched>) -> DriverResult<()> {
        let conn = acquire(&self.conn)?;
        with_busy_timeout(&conn, self.timeout, || {
            let mut compiled = conn.prepare(&self.sql).map_err(execution_error)?;
            let columns: Vec<String> = compiled.column_names().into_iter().map(str::to_string).collect();
            let mut rows = compiled.query(params_from_iter(self.values.iter())).map_err(execution_error)?;
            if !self.deliver(sender, Fetched::Ready) {
                return Ok(());
            }

            let mut sent = 0u64;
            while self.max_rows.is_none_or(|max| sent < max) {
                let Some(row) = rows.next().map_err(execution_error)? else {
                    break;
                };
                let mut values = Vec::with_capacity(columns.len());
                for index in 0..columns.len() {
                    values.push(from_sqlite(row.get_ref(index).map_err(execution_error)?));
                }
                if !self.deliver(sender, Fetched::Row(Row::from_values(columns.clone(), values))) {
                    break;
                }
                sent += 1;
            }
            Ok(())
        })
    }

    /// Hand a message to the consumer. Returns `false` once the consumer is
    /// gone or the statement was closed while the buffer was full.
    fn deliver(&self, sender: &Sender<Fetched>, mut message: Fetched) -> bool {
        loop {
            match sender.send_timeout(message, READER_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Disconnected(_)) => return false,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.statement_closed.load(Ordering::Acquire) {
                        return false;
                    }
                    message = pending;
                }
            }
        }
    }
}

struct SqliteRows {
    columns: Vec<String>,
    receiver: Option<Receiver<Fetched>>,
    reader: Option<JoinHandle<()>>,
    statement_closed: Arc<AtomicBool>,
    closed: bool,
}

impl SqliteRows {
    /// Start `reader` and wait until its query is running
    fn open(reader: RowReader, columns: Vec<String>, prefetch: usize) -> DriverResult<Self> {
        let statement_closed = reader.statement_closed.clone();
        let (sender, receiver) = channel::bounded(prefetch);
        let handle = thread::Builder::new()
            .name("sqlite-rows".to_string())
            .spawn(move || reader.run(sender))
            .map_err(|e| DriverError::ResourceUnavailable(e.to_string()))?;

        let first = receiver.recv();
        let rows = SqliteRows {
            columns,
            receiver: Some(receiver),
            reader: Some(handle),
            statement_closed,
            closed: false,
        };
        match first {
            Ok(Fetched::Ready) => Ok(rows),
            Ok(Fetched::Failed(e)) => Err(e),
            Ok(Fetched::Row(_)) | Err(_) => Err(DriverError::Execution("result reader stopped before the query ran".to_string())),
        }
    }

    fn join_reader(&mut self) -> DriverResult<()> {
        match self.reader.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| DriverError::Execution("result reader panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl DriverRows for SqliteRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DriverResult<Option<Row>> {
        if self.closed || self.statement_closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        let Some(receiver) = &self.receiver else {
            return Err(DriverError::Closed);
        };
        match receiver.recv() {
            Ok(Fetched::Row(row)) => Ok(Some(row)),
            Ok(Fetched::Failed(e)) => Err(e),
            Ok(Fetched::Ready) => Err(DriverError::Execution("result reader restarted".to_string())),
            // Sender dropped: the reader finished the set
            Err(_) => {
                self.join_reader()?;
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        // Dropping the receiver makes a blocked reader give up
        self.receiver = None;
        self.join_reader()
    }
}

impl Drop for SqliteRows {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to stop result reader: {}", e);
        }
    }
}
