use std::sync::Arc;

use anyhow::Result;
use stmtexec::driver::memory::{AppliedSettings, MemoryDatabase, Outcome};
use stmtexec::{
    BindError, BoundQueryPlan, DataValue, ExecutionMode, ExecutionStrategy, ExecutorConfig, HandleState,
    PrepareError, SqlType, StatementError, StatementRouter,
};

#[path = "../common/mod.rs"]
mod common;
use common::{DELETE_ALL, RENAME, SELECT_BY_ID, users_db};

const BUMP: &str = "{call bump_version(?)}";

fn router_for(mode: ExecutionMode) -> StatementRouter {
    let plan = match mode {
        ExecutionMode::Direct => BoundQueryPlan::builder("users.deleteAll", DELETE_ALL).mode(mode).build(),
        ExecutionMode::Precompiled => BoundQueryPlan::builder("users.rename", RENAME)
            .param("Zed", SqlType::Varchar)
            .param(2, SqlType::Integer)
            .build(),
        ExecutionMode::Callable => BoundQueryPlan::builder("users.bump", BUMP)
            .mode(mode)
            .param(2, SqlType::Integer)
            .build(),
    };
    StatementRouter::for_plan(plan)
}

fn database() -> MemoryDatabase {
    let db = users_db(&[(1, "Ann"), (2, "Bob"), (3, "Cy")]);
    db.on(BUMP, |inv| Ok(Outcome::count(if inv.param(1).as_i64() == Some(2) { 1 } else { 0 })));
    db
}

#[test]
fn test_update_in_every_mode() -> Result<()> {
    for (mode, expected) in [(ExecutionMode::Direct, 3), (ExecutionMode::Precompiled, 1), (ExecutionMode::Callable, 1)] {
        let db = database();
        let router = router_for(mode);
        assert_eq!(router.mode(), mode);

        let mut handle = router.prepare(&mut db.connect(), None)?;
        assert_eq!(handle.state(), HandleState::Prepared);
        assert_eq!(db.open_statements(), 1);

        router.parameterize(&mut handle)?;
        let count = router.update(&mut handle)?;
        assert_eq!(count, expected, "update count in {} mode", mode);
        assert_eq!(handle.state(), HandleState::Executed);

        handle.close()?;
        assert!(handle.is_closed());
        assert_eq!(db.open_statements(), 0);

        // Closing again is a no-op
        handle.close()?;
        assert_eq!(db.open_statements(), 0);
    }
    Ok(())
}

#[test]
fn test_update_with_no_affected_rows() -> Result<()> {
    let db = database();
    let plan = BoundQueryPlan::builder("users.rename", RENAME)
        .param("Nobody", SqlType::Varchar)
        .param(99, SqlType::Integer)
        .build();
    let count = StatementRouter::for_plan(plan).execute_update(&mut db.connect(), None)?;
    assert_eq!(count, 0);
    assert_eq!(db.open_statements(), 0);
    Ok(())
}

#[test]
fn test_dropping_handle_releases_statement() -> Result<()> {
    let db = database();
    let router = router_for(ExecutionMode::Precompiled);
    {
        let _handle = router.prepare(&mut db.connect(), None)?;
        assert_eq!(db.open_statements(), 1);
    }
    assert_eq!(db.open_statements(), 0);
    Ok(())
}

#[test]
fn test_malformed_sql_fails_prepare() {
    let db = database();
    let router = StatementRouter::for_plan(BoundQueryPlan::builder("broken", "SELEC id FROM t").build());

    let err = router.prepare(&mut db.connect(), None).unwrap_err();
    assert!(matches!(err, StatementError::Prepare(PrepareError::Malformed { .. })));
    assert_eq!(err.plan(), "broken");
    assert_eq!(db.open_statements(), 0);
}

#[test]
fn test_exhausted_resources_fail_prepare() {
    let db = database();
    db.set_exhausted(true);

    for mode in [ExecutionMode::Direct, ExecutionMode::Precompiled, ExecutionMode::Callable] {
        let err = router_for(mode).prepare(&mut db.connect(), None).unwrap_err();
        assert!(
            matches!(err, StatementError::Prepare(PrepareError::ResourceUnavailable { .. })),
            "unexpected error in {} mode: {}",
            mode,
            err
        );
    }
    assert_eq!(db.open_statements(), 0);
}

#[test]
fn test_settings_applied_at_prepare() -> Result<()> {
    let db = database();
    let plan = BoundQueryPlan::builder("users.byId", SELECT_BY_ID)
        .param(1, SqlType::Integer)
        .timeout(30)
        .max_rows(10)
        .build();
    let config = ExecutorConfig { default_fetch_size: Some(100), ..ExecutorConfig::default() };
    let router = StatementRouter::new(Arc::new(plan), Arc::new(config));

    // The transaction has less time left than the statement asks for
    let handle = router.prepare(&mut db.connect(), Some(5))?;
    let expected = AppliedSettings { query_timeout: Some(5), fetch_size: Some(100), max_rows: Some(10) };
    assert_eq!(db.last_settings(SELECT_BY_ID), Some(expected));
    assert_eq!(handle.settings().query_timeout, Some(5));
    drop(handle);

    router.prepare(&mut db.connect(), Some(60))?;
    assert_eq!(db.last_settings(SELECT_BY_ID).and_then(|s| s.query_timeout), Some(30));
    Ok(())
}

#[test]
fn test_operations_out_of_order() -> Result<()> {
    let db = database();
    let router = router_for(ExecutionMode::Precompiled);
    let mut handle = router.prepare(&mut db.connect(), None)?;

    assert!(router.update(&mut handle).unwrap_err().is_illegal_state());
    assert!(router.batch(&mut handle).unwrap_err().is_illegal_state());

    // Lifecycle violations leave the statement alone
    assert_eq!(handle.state(), HandleState::Prepared);
    assert_eq!(db.open_statements(), 1);

    handle.close()?;
    assert!(router.parameterize(&mut handle).unwrap_err().is_illegal_state());
    assert!(router.update(&mut handle).unwrap_err().is_illegal_state());
    Ok(())
}

#[test]
fn test_precompiled_handle_is_reused() -> Result<()> {
    let db = database();
    let router = router_for(ExecutionMode::Precompiled);
    let mut handle = router.prepare(&mut db.connect(), None)?;

    for _ in 0..3 {
        router.parameterize(&mut handle)?;
        assert_eq!(router.update(&mut handle)?, 1);
    }
    assert_eq!(db.round_trips(), 3);
    Ok(())
}

#[test]
fn test_direct_handle_is_single_use() -> Result<()> {
    let db = database();
    let router = router_for(ExecutionMode::Direct);
    let mut handle = router.prepare(&mut db.connect(), None)?;
    router.parameterize(&mut handle)?;
    router.update(&mut handle)?;

    assert!(router.parameterize(&mut handle).unwrap_err().is_illegal_state());
    Ok(())
}

#[test]
fn test_direct_rejects_bindings() -> Result<()> {
    let db = database();
    let plan = BoundQueryPlan::builder("users.deleteOne", DELETE_ALL)
        .mode(ExecutionMode::Direct)
        .param(1, SqlType::Integer)
        .build();
    let router = StatementRouter::for_plan(plan);
    let mut handle = router.prepare(&mut db.connect(), None)?;

    let err = router.parameterize(&mut handle).unwrap_err();
    assert!(matches!(err, StatementError::Bind(BindError::NotBindable { count: 1, .. })));
    assert!(handle.is_closed());
    assert_eq!(db.open_statements(), 0);
    Ok(())
}

#[test]
fn test_handle_from_another_plan_is_refused() -> Result<()> {
    let db = database();
    let rename = router_for(ExecutionMode::Precompiled);
    let lookup = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.byId", SELECT_BY_ID).param(1, SqlType::Integer).build(),
    );

    let mut handle = rename.prepare(&mut db.connect(), None)?;
    assert!(lookup.parameterize(&mut handle).unwrap_err().is_illegal_state());
    Ok(())
}

#[test]
fn test_execution_failure_releases_statement() -> Result<()> {
    let db = database();
    db.on_update("UPDATE t SET name = ?", |_| Err(stmtexec::DriverError::Execution("constraint violated".into())));
    let router = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.renameAll", "UPDATE t SET name = ?").param(DataValue::Null, SqlType::Varchar).build(),
    );

    let mut handle = router.prepare(&mut db.connect(), None)?;
    router.parameterize(&mut handle)?;
    let err = router.update(&mut handle).unwrap_err();
    assert!(matches!(err, StatementError::Exec { .. }));
    assert!(handle.is_closed());
    assert_eq!(db.open_statements(), 0);
    Ok(())
}

#[test]
fn test_update_on_query_releases_result_set() -> Result<()> {
    let db = database();
    let router = StatementRouter::for_plan(
        BoundQueryPlan::builder("users.byId", SELECT_BY_ID).param(1, SqlType::Integer).build(),
    );

    let mut handle = router.prepare(&mut db.connect(), None)?;
    router.parameterize(&mut handle)?;
    let err = router.update(&mut handle).unwrap_err();
    assert!(matches!(err, StatementError::Exec { .. }));
    assert!(handle.is_closed());
    assert_eq!(db.open_result_sets(), 0);
    assert_eq!(db.open_statements(), 0);
    Ok(())
}

#[test]
fn test_routers_on_separate_threads() -> Result<()> {
    let db = database();
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            std::thread::spawn(move || -> stmtexec::StatementResult<u64> {
                let router = router_for(ExecutionMode::Precompiled);
                router.execute_update(&mut db.connect(), None)
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().expect("worker panicked")?, 1);
    }
    assert_eq!(db.open_statements(), 0);
    Ok(())
}
