use anyhow::{Result, anyhow};
use rand::Rng;
use stmtexec::driver::memory::MemoryDatabase;
use stmtexec::result::CursorStatus;
use stmtexec::{
    BoundQueryPlan, DataValue, ExecutionStrategy, HandleState, Row, SqlType, StatementError, StatementHandle,
    StatementRouter,
};

#[path = "../common/mod.rs"]
mod common;
use common::{RENAME, SELECT_ALL, SELECT_BY_ID, as_refs, generate_users, users_db};

fn select_all(max_rows: Option<u64>) -> StatementRouter {
    let mut builder = BoundQueryPlan::builder("users.all", SELECT_ALL);
    if let Some(max_rows) = max_rows {
        builder = builder.max_rows(max_rows);
    }
    StatementRouter::for_plan(builder.build())
}

fn ready(router: &StatementRouter, db: &MemoryDatabase) -> Result<StatementHandle> {
    let mut handle = router.prepare(&mut db.connect(), None)?;
    router.parameterize(&mut handle)?;
    Ok(handle)
}

fn random_users(count: usize) -> Vec<(i64, String)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let id = rng.gen_range(1..1_000_000);
            (id, format!("user-{}", rng.gen_range(0..10_000)))
        })
        .collect()
}

#[test]
fn test_eager_and_lazy_yield_same_order() -> Result<()> {
    let users = random_users(200);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);

    let mut handle = ready(&router, &db)?;
    let eager = router.deliver().eager_rows(&mut handle)?;

    router.parameterize(&mut handle)?;
    let mut cursor = router.deliver().lazy(&mut handle)?;
    let lazy = cursor.rows().collect::<Result<Vec<Row>, StatementError>>()?;

    assert_eq!(eager.len(), users.len());
    assert_eq!(eager, lazy);
    for (row, (id, name)) in eager.iter().zip(&users) {
        assert_eq!(row.get("id"), Some(&DataValue::Integer(*id)));
        assert_eq!(row.get("name"), Some(&DataValue::Text(name.clone())));
    }
    assert!(cursor.is_consumed());
    assert_eq!(db.open_result_sets(), 0);
    Ok(())
}

#[test]
fn test_lookup_by_id_returns_single_row() -> Result<()> {
    let users = generate_users(100);
    let db = users_db(&as_refs(&users));
    let plan = BoundQueryPlan::builder("users.byId", SELECT_BY_ID).param(42, SqlType::Integer).build();
    let router = StatementRouter::for_plan(plan);

    let mut handle = ready(&router, &db)?;
    let mut cursor = router.deliver().lazy(&mut handle)?;
    assert_eq!(cursor.status(), CursorStatus::Created);
    assert_eq!(cursor.columns(), &["id", "name"]);

    let row = cursor.next()?.ok_or_else(|| anyhow!("expected a row"))?;
    assert_eq!(row.get("id"), Some(&DataValue::Integer(42)));
    assert_eq!(cursor.current_index(), Some(0));

    assert_eq!(cursor.next()?, None);
    assert!(cursor.is_consumed());
    // Still end-of-sequence on later calls
    assert_eq!(cursor.next()?, None);
    Ok(())
}

#[test]
fn test_eager_mapping() -> Result<()> {
    let users = generate_users(5);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);
    let mut handle = ready(&router, &db)?;

    let ids = router
        .deliver()
        .eager(&mut handle, |row| row.get("id").and_then(DataValue::as_i64).ok_or_else(|| anyhow!("missing id")))?;
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(handle.state(), HandleState::Executed);
    Ok(())
}

#[test]
fn test_early_cursor_close() -> Result<()> {
    let users = generate_users(10);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);
    let mut handle = ready(&router, &db)?;

    let mut cursor = router.deliver().lazy(&mut handle)?;
    cursor.next()?;
    cursor.next()?;
    assert_eq!(db.open_result_sets(), 1);

    cursor.close()?;
    assert_eq!(cursor.status(), CursorStatus::Closed);
    assert_eq!(db.open_result_sets(), 0);
    assert!(cursor.next().unwrap_err().is_illegal_state());

    // Closing twice is safe
    cursor.close()?;

    // The handle can run again once its cursor is gone
    router.parameterize(&mut handle)?;
    assert_eq!(router.deliver().eager_rows(&mut handle)?.len(), 10);
    Ok(())
}

#[test]
fn test_cursor_blocks_other_operations() -> Result<()> {
    let users = generate_users(3);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);
    let mut handle = ready(&router, &db)?;

    let cursor = router.deliver().lazy(&mut handle)?;
    assert!(handle.has_open_cursor());
    assert!(router.parameterize(&mut handle).unwrap_err().is_illegal_state());
    assert!(!handle.is_closed());

    drop(cursor);
    assert!(!handle.has_open_cursor());
    assert_eq!(db.open_result_sets(), 0);
    router.parameterize(&mut handle)?;
    Ok(())
}

#[test]
fn test_closing_handle_aborts_cursor() -> Result<()> {
    let users = generate_users(10);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);
    let mut handle = ready(&router, &db)?;

    let mut cursor = router.deliver().lazy(&mut handle)?;
    assert!(cursor.next()?.is_some());

    handle.close()?;
    assert!(cursor.next().unwrap_err().is_illegal_state());
    assert_eq!(cursor.status(), CursorStatus::Closed);
    assert_eq!(db.open_result_sets(), 0);
    assert_eq!(db.open_statements(), 0);
    Ok(())
}

#[test]
fn test_callback_failure_releases_statement() -> Result<()> {
    let users = generate_users(10);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);
    let mut handle = ready(&router, &db)?;

    let mut seen = Vec::new();
    let err = router
        .deliver()
        .each_row(&mut handle, |row, _| {
            if seen.len() == 2 {
                return Err(anyhow!("mapper refused row"));
            }
            seen.push(row);
            Ok(())
        })
        .unwrap_err();

    match err {
        StatementError::Callback { row, ref plan, .. } => {
            assert_eq!(row, 3);
            assert_eq!(plan, "users.all");
        }
        other => panic!("unexpected error: {}", other),
    }
    // Rows delivered before the failure stay delivered
    assert_eq!(seen.len(), 2);
    assert!(handle.is_closed());
    assert_eq!(db.open_result_sets(), 0);
    assert_eq!(db.open_statements(), 0);
    Ok(())
}

#[test]
fn test_eager_mapper_failure() -> Result<()> {
    let users = generate_users(4);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);
    let mut handle = ready(&router, &db)?;

    let result = router.deliver().eager(&mut handle, |row| match row.get("id").and_then(DataValue::as_i64) {
        Some(3) => Err(anyhow!("bad row")),
        id => Ok(id),
    });
    assert!(matches!(result, Err(StatementError::Callback { row: 3, .. })));
    assert!(handle.is_closed());
    Ok(())
}

#[test]
fn test_callback_can_stop_delivery() -> Result<()> {
    let users = generate_users(10);
    let db = users_db(&as_refs(&users));
    let router = select_all(None);
    let mut handle = ready(&router, &db)?;

    let mut seen = 0;
    router.deliver().each_row(&mut handle, |_, context| {
        seen += 1;
        if context.result_count() == 4 {
            context.stop();
        }
        Ok(())
    })?;

    assert_eq!(seen, 4);
    assert_eq!(handle.state(), HandleState::Executed);
    assert_eq!(db.open_result_sets(), 0);
    Ok(())
}

#[test]
fn test_row_limit() -> Result<()> {
    let users = generate_users(20);
    let db = users_db(&as_refs(&users));
    let router = select_all(Some(3));
    let mut handle = ready(&router, &db)?;

    assert_eq!(router.deliver().eager_rows(&mut handle)?.len(), 3);

    router.parameterize(&mut handle)?;
    let mut cursor = router.deliver().lazy(&mut handle)?;
    let mut count = 0;
    while cursor.next()?.is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
    Ok(())
}

#[test]
fn test_zero_row_limit_delivers_everything() -> Result<()> {
    let users = generate_users(12);
    let db = users_db(&as_refs(&users));
    let router = select_all(Some(0));
    let mut handle = ready(&router, &db)?;

    assert_eq!(router.deliver().eager_rows(&mut handle)?.len(), 12);
    assert_eq!(handle.settings().max_rows, None);

    router.parameterize(&mut handle)?;
    let mut cursor = router.deliver().lazy(&mut handle)?;
    assert_eq!(cursor.rows().count(), 12);
    Ok(())
}

#[test]
fn test_query_on_mutation_fails() -> Result<()> {
    let db = users_db(&[(1, "Ann")]);
    let plan = BoundQueryPlan::builder("users.rename", RENAME)
        .param("Bea", SqlType::Varchar)
        .param(1, SqlType::Integer)
        .build();
    let router = StatementRouter::for_plan(plan);
    let mut handle = ready(&router, &db)?;

    let err = router.deliver().eager_rows(&mut handle).unwrap_err();
    assert!(matches!(err, StatementError::Exec { .. }));
    assert!(handle.is_closed());
    Ok(())
}
