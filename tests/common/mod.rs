#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use stmtexec::driver::memory::{MemoryDatabase, Outcome};
use stmtexec::{DataValue, Row};

pub const SELECT_BY_ID: &str = "SELECT id, name FROM t WHERE id = ?";
pub const SELECT_ALL: &str = "SELECT id, name FROM t";
pub const RENAME: &str = "UPDATE t SET name = ? WHERE id = ?";
pub const INSERT: &str = "INSERT INTO t (name) VALUES (?)";
pub const DELETE_ALL: &str = "DELETE FROM t";

// Create an in-memory database with a users table `t (id, name)`
pub fn users_db(users: &[(i64, &str)]) -> MemoryDatabase {
    let db = MemoryDatabase::new();
    let table: Arc<Mutex<Vec<(i64, String)>>> =
        Arc::new(Mutex::new(users.iter().map(|(id, name)| (*id, name.to_string())).collect()));

    let rows = table.clone();
    db.on_query(SELECT_BY_ID, &["id", "name"], move |inv| {
        let id = inv.param(1).as_i64();
        Ok(rows
            .lock()
            .iter()
            .filter(|(uid, _)| Some(*uid) == id)
            .map(|(uid, name)| vec![DataValue::Integer(*uid), DataValue::Text(name.clone())])
            .collect())
    });

    let rows = table.clone();
    db.on_query(SELECT_ALL, &["id", "name"], move |_| {
        Ok(rows
            .lock()
            .iter()
            .map(|(uid, name)| vec![DataValue::Integer(*uid), DataValue::Text(name.clone())])
            .collect())
    });

    let rows = table.clone();
    db.on_update(RENAME, move |inv| {
        let name = inv.param(1).as_str().map(str::to_string);
        let id = inv.param(2).as_i64();
        let mut changed = 0;
        for (uid, current) in rows.lock().iter_mut() {
            if Some(*uid) == id {
                if let Some(name) = &name {
                    *current = name.clone();
                }
                changed += 1;
            }
        }
        Ok(changed)
    });

    let rows = table.clone();
    db.on(INSERT, move |inv| {
        let mut rows = rows.lock();
        let id = rows.iter().map(|(uid, _)| *uid).max().unwrap_or(0) + 1;
        rows.push((id, inv.param(1).as_str().unwrap_or_default().to_string()));
        let key = Row::from_values(vec!["id".to_string()], vec![DataValue::Integer(id)]);
        Ok(Outcome::count(1).with_keys(vec![key]))
    });

    let rows = table;
    db.on_update(DELETE_ALL, move |_| {
        let mut rows = rows.lock();
        let removed = rows.len() as u64;
        rows.clear();
        Ok(removed)
    });

    db
}

// Generate `count` users with ids starting at 1
pub fn generate_users(count: i64) -> Vec<(i64, String)> {
    (1..=count).map(|i| (i, format!("User {}", i))).collect()
}

pub fn as_refs(users: &[(i64, String)]) -> Vec<(i64, &str)> {
    users.iter().map(|(id, name)| (*id, name.as_str())).collect()
}
