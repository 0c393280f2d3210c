use anyhow::{Result, anyhow};
use stmtexec::driver::sqlite::SqliteConnection;
use stmtexec::{
    BoundQueryPlan, DataValue, ExecutionMode, ExecutionStrategy, KeyGeneration, PrepareError, SqlType,
    StatementError, StatementRouter,
};
use tempfile::tempdir;

const SCHEMA: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER, joined TEXT);";
const INSERT: &str = "INSERT INTO users (name, active, joined) VALUES (?, ?, ?)";
const BY_ID: &str = "SELECT id, name FROM users WHERE id = ?";

fn insert(name: &str, active: bool) -> StatementRouter {
    StatementRouter::for_plan(
        BoundQueryPlan::builder("users.insert", INSERT)
            .param(name, SqlType::Varchar)
            .param(active, SqlType::Boolean)
            .param("2024-01-15", SqlType::Date)
            .key_generation(KeyGeneration::Generated { columns: vec!["id".to_string()] })
            .build(),
    )
}

fn seeded(count: usize) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::open_in_memory()?;
    conn.execute_script(SCHEMA)?;

    let routers: Vec<StatementRouter> = (1..=count).map(|i| insert(&format!("User {}", i), i % 2 == 0)).collect();
    if let Some(first) = routers.first() {
        let mut handle = first.prepare(&mut conn, None)?;
        for router in &routers {
            router.parameterize(&mut handle)?;
            router.batch(&mut handle)?;
        }
        first.update(&mut handle)?;
        assert_eq!(handle.batch_counts().len(), count);
    }
    Ok(conn)
}

#[test]
fn test_insert_returns_generated_key() -> Result<()> {
    let mut conn = SqliteConnection::open_in_memory()?;
    conn.execute_script(SCHEMA)?;

    let router = insert("Ann", true);
    let mut handle = router.prepare(&mut conn, None)?;
    router.parameterize(&mut handle)?;
    assert_eq!(router.update(&mut handle)?, 1);
    assert_eq!(handle.generated_keys()[0].get("id"), Some(&DataValue::Integer(1)));

    router.parameterize(&mut handle)?;
    router.update(&mut handle)?;
    assert_eq!(handle.generated_keys()[0].get("id"), Some(&DataValue::Integer(2)));
    Ok(())
}

#[test]
fn test_lookup_by_id() -> Result<()> {
    let mut conn = seeded(100)?;
    let router =
        StatementRouter::for_plan(BoundQueryPlan::builder("users.byId", BY_ID).param(42, SqlType::Integer).build());

    let mut handle = router.prepare(&mut conn, None)?;
    router.parameterize(&mut handle)?;
    let mut cursor = router.deliver().lazy(&mut handle)?;

    let row = cursor.next()?.ok_or_else(|| anyhow!("expected a row"))?;
    assert_eq!(row.get("id"), Some(&DataValue::Integer(42)));
    assert_eq!(row.get("name"), Some(&DataValue::Text("User 42".to_string())));
    assert_eq!(cursor.next()?, None);
    Ok(())
}

#[test]
fn test_eager_matches_lazy() -> Result<()> {
    let mut conn = seeded(25)?;
    let router = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.active", "SELECT id, name FROM users WHERE active = ? ORDER BY id")
            .param(true, SqlType::Boolean)
            .build(),
    );

    let mut handle = router.prepare(&mut conn, None)?;
    router.parameterize(&mut handle)?;
    let eager = router.deliver().eager_rows(&mut handle)?;

    router.parameterize(&mut handle)?;
    let mut cursor = router.deliver().lazy(&mut handle)?;
    let lazy = cursor.rows().collect::<Result<Vec<_>, StatementError>>()?;

    assert_eq!(eager.len(), 12);
    assert_eq!(eager, lazy);
    Ok(())
}

#[test]
fn test_direct_statements() -> Result<()> {
    let mut conn = SqliteConnection::open_in_memory()?;
    let create = StatementRouter::for_plan(
        BoundQueryPlan::builder("schema.create", SCHEMA.trim_end_matches(';')).mode(ExecutionMode::Direct).build(),
    );
    assert_eq!(create.execute_update(&mut conn, None)?, 0);

    let seed = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.seed", "INSERT INTO users (name) VALUES ('Ann'), ('Bob')")
            .mode(ExecutionMode::Direct)
            .build(),
    );
    assert_eq!(seed.execute_update(&mut conn, None)?, 2);

    let list = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.list", "SELECT name FROM users ORDER BY id").mode(ExecutionMode::Direct).build(),
    );
    let names = list.with_statement(&mut conn, None, |router, handle| {
        router.parameterize(handle)?;
        router.deliver().eager(handle, |row| {
            row.get("name").and_then(DataValue::as_str).map(str::to_string).ok_or_else(|| anyhow!("no name"))
        })
    })?;
    assert_eq!(names, vec!["Ann", "Bob"]);
    Ok(())
}

#[test]
fn test_on_disk_database() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("users.db");
    {
        let mut conn = SqliteConnection::open(&path)?;
        conn.execute_script(SCHEMA)?;
        insert("Ann", true).execute_update(&mut conn, Some(5))?;
    }

    let mut conn = SqliteConnection::open(&path)?;
    let router =
        StatementRouter::for_plan(BoundQueryPlan::builder("users.byId", BY_ID).param(1, SqlType::Integer).build());
    let rows = router.with_statement(&mut conn, None, |router, handle| {
        router.parameterize(handle)?;
        router.deliver().eager_rows(handle)
    })?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&DataValue::Text("Ann".to_string())));
    Ok(())
}

#[test]
fn test_prepare_errors() -> Result<()> {
    let mut conn = SqliteConnection::open_in_memory()?;
    conn.execute_script(SCHEMA)?;

    let broken = StatementRouter::for_plan(BoundQueryPlan::builder("broken", "SELEC * FROM users").build());
    let err = broken.prepare(&mut conn, None).unwrap_err();
    assert!(matches!(err, StatementError::Prepare(PrepareError::Malformed { .. })));

    let call = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.purge", "{call purge_users()}").mode(ExecutionMode::Callable).build(),
    );
    let err = call.prepare(&mut conn, None).unwrap_err();
    assert!(matches!(err, StatementError::Prepare(PrepareError::Driver { .. })));
    Ok(())
}

#[test]
fn test_constraint_violation() -> Result<()> {
    let mut conn = SqliteConnection::open_in_memory()?;
    conn.execute_script(SCHEMA)?;
    let router = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.insertNull", "INSERT INTO users (name) VALUES (?)")
            .param(DataValue::Null, SqlType::Varchar)
            .build(),
    );

    let mut handle = router.prepare(&mut conn, None)?;
    router.parameterize(&mut handle)?;
    assert!(matches!(router.update(&mut handle), Err(StatementError::Exec { .. })));
    assert!(handle.is_closed());
    Ok(())
}

#[test]
fn test_connection_per_thread() -> Result<()> {
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            std::thread::spawn(move || -> Result<i64> {
                let mut conn = seeded(10 + worker)?;
                let router = StatementRouter::for_plan(
                    BoundQueryPlan::builder("users.count", "SELECT COUNT(*) AS n FROM users").build(),
                );
                let counts = router.with_statement(&mut conn, None, |router, handle| {
                    router.parameterize(handle)?;
                    router.deliver().eager(handle, |row| row.get("n").and_then(DataValue::as_i64).ok_or_else(|| anyhow!("no count")))
                })?;
                Ok(counts[0])
            })
        })
        .collect();

    for (worker, handle) in workers.into_iter().enumerate() {
        let count = handle.join().map_err(|_| anyhow!("worker panicked"))??;
        assert_eq!(count, 10 + worker as i64);
    }
    Ok(())
}
