//! In-memory statement backend for integration tests
//!
//! Understands just enough SQL to run the demo workload: create/drop/insert on
//! a single table `foo(bar text, idx int)`, the parameterized select, and
//! transaction control with rollback snapshots. As in PostgreSQL, any error
//! inside a transaction aborts it until ROLLBACK. Counts every round trip so
//! tests can assert how many prepares and direct executions happened.

#![allow(dead_code)]

use async_trait::async_trait;
use pg_stmt_cache::{DbError, ResultSet, StatementBackend, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const SELECT_ALL: &str = "select bar, idx from foo order by idx";
pub const INSERT_PARAMS: &str = "insert into foo (bar, idx) values ($1, $2)";

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Begin,
    Commit,
    Rollback,
    CreateFoo,
    DropFoo { if_exists: bool },
    InsertLiteral,
    InsertParams,
    SelectFiltered,
    SelectAll,
}

fn parse(sql: &str) -> Result<Stmt, DbError> {
    let stmt = match sql.trim() {
        "BEGIN" => Stmt::Begin,
        "COMMIT" => Stmt::Commit,
        "ROLLBACK" => Stmt::Rollback,
        "create table foo (bar text, idx int)" => Stmt::CreateFoo,
        "drop table foo" => Stmt::DropFoo { if_exists: false },
        "drop table if exists foo" => Stmt::DropFoo { if_exists: true },
        "insert into foo (bar, idx) values ('baz', 42)" => Stmt::InsertLiteral,
        INSERT_PARAMS => Stmt::InsertParams,
        "select bar, idx from foo where bar = $2 and idx >= $1 order by idx" => Stmt::SelectFiltered,
        SELECT_ALL => Stmt::SelectAll,
        other => {
            return Err(DbError::database(format!(
                "syntax error at or near \"{}\"",
                other.split_whitespace().next().unwrap_or("")
            ))
            .with_code("42601"))
        }
    };
    Ok(stmt)
}

fn aborted_transaction() -> DbError {
    DbError::database(
        "current transaction is aborted, commands ignored until end of transaction block",
    )
    .with_code("25P02")
}

fn missing_foo() -> DbError {
    DbError::database(r#"relation "foo" does not exist"#).with_code("42P01")
}

/// Scripted backend with a single optional table
#[derive(Default)]
pub struct MockBackend {
    table: Option<Vec<(String, i64)>>,
    snapshot: Option<Option<Vec<(String, i64)>>>,
    aborted: bool,

    next_handle: u64,
    prepared: HashMap<u64, Stmt>,
    stale: HashSet<u64>,

    /// Prepare round trips per SQL text
    pub prepares: HashMap<String, usize>,
    /// Direct executions per SQL text
    pub directs: HashMap<String, usize>,
    /// Handles passed to `release`, in order
    pub released: Vec<u64>,

    pub fail_release: bool,
    pub hang_prepare: bool,
    pub hang_execute: bool,
    pub prepare_delay: Option<Duration>,
    /// Every handle prepared from now on reports stale on its first execution
    pub stale_on_first_execute: bool,
    pub closed: bool,
    close_hook: Option<Box<dyn FnOnce(&[u64]) + Send>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with `foo` already holding `('baz', 42)`
    pub fn with_foo() -> Self {
        Self {
            table: Some(vec![("baz".to_string(), 42)]),
            ..Default::default()
        }
    }

    pub fn prepare_count(&self, sql: &str) -> usize {
        self.prepares.get(sql.trim()).copied().unwrap_or(0)
    }

    pub fn total_prepares(&self) -> usize {
        self.prepares.values().sum()
    }

    pub fn direct_count(&self, sql: &str) -> usize {
        self.directs.get(sql.trim()).copied().unwrap_or(0)
    }

    pub fn total_directs(&self) -> usize {
        self.directs.values().sum()
    }

    /// Simulate a schema change that invalidates every live handle
    pub fn invalidate_all_handles(&mut self) {
        self.stale.extend(self.prepared.keys().copied());
    }

    /// Drop `foo` without going through any connection
    pub fn drop_table(&mut self) {
        self.table = None;
    }

    /// Called on close with every handle released so far
    pub fn on_close(&mut self, hook: impl FnOnce(&[u64]) + Send + 'static) {
        self.close_hook = Some(Box::new(hook));
    }

    pub fn live_handles(&self) -> usize {
        self.prepared.len()
    }

    pub fn in_aborted_transaction(&self) -> bool {
        self.aborted
    }

    /// Record a failure, aborting the open transaction if there is one
    fn fail(&mut self, err: DbError) -> DbError {
        if self.snapshot.is_some() {
            self.aborted = true;
        }
        err
    }

    fn check_aborted(&self, stmt: &Stmt) -> Result<(), DbError> {
        match stmt {
            Stmt::Rollback | Stmt::Commit => Ok(()),
            _ if self.aborted => Err(aborted_transaction()),
            _ => Ok(()),
        }
    }

    fn check_relations(&self, stmt: &Stmt) -> Result<(), DbError> {
        match stmt {
            Stmt::InsertLiteral | Stmt::InsertParams | Stmt::SelectFiltered | Stmt::SelectAll
                if self.table.is_none() =>
            {
                Err(missing_foo())
            }
            _ => Ok(()),
        }
    }

    fn run(&mut self, stmt: &Stmt, params: &[Value]) -> Result<ResultSet, DbError> {
        self.check_relations(stmt)?;

        match stmt {
            Stmt::Begin => {
                self.snapshot = Some(self.table.clone());
                Ok(ResultSet::command(0))
            }
            Stmt::Commit => {
                // Committing an aborted transaction rolls it back
                if let Some(snapshot) = self.snapshot.take() {
                    if self.aborted {
                        self.table = snapshot;
                    }
                }
                self.aborted = false;
                Ok(ResultSet::command(0))
            }
            Stmt::Rollback => {
                if let Some(snapshot) = self.snapshot.take() {
                    self.table = snapshot;
                }
                self.aborted = false;
                Ok(ResultSet::command(0))
            }
            Stmt::CreateFoo => {
                if self.table.is_some() {
                    return Err(DbError::database(r#"relation "foo" already exists"#).with_code("42P07"));
                }
                self.table = Some(Vec::new());
                Ok(ResultSet::command(0))
            }
            Stmt::DropFoo { if_exists } => {
                if self.table.take().is_none() && !if_exists {
                    return Err(DbError::database(r#"table "foo" does not exist"#).with_code("42P01"));
                }
                Ok(ResultSet::command(0))
            }
            Stmt::InsertLiteral => {
                self.rows_mut().push(("baz".to_string(), 42));
                Ok(ResultSet::command(1))
            }
            Stmt::InsertParams => {
                let (bar, idx) = match params {
                    [Value::Text(bar), Value::Int(idx)] => (bar.clone(), *idx),
                    _ => return Err(DbError::bind("expected parameters (text, int)")),
                };
                self.rows_mut().push((bar, idx));
                Ok(ResultSet::command(1))
            }
            Stmt::SelectFiltered => {
                let (min_idx, bar) = match params {
                    [Value::Int(min_idx), Value::Text(bar)] => (*min_idx, bar.clone()),
                    _ => return Err(DbError::bind("expected parameters (int, text)")),
                };
                Ok(self.select(|row| row.0 == bar && row.1 >= min_idx))
            }
            Stmt::SelectAll => Ok(self.select(|_| true)),
        }
    }

    fn rows_mut(&mut self) -> &mut Vec<(String, i64)> {
        self.table.get_or_insert_with(Vec::new)
    }

    fn select(&self, filter: impl Fn(&(String, i64)) -> bool) -> ResultSet {
        let mut rows: Vec<&(String, i64)> = self
            .table
            .as_ref()
            .map(|t| t.iter().filter(|r| filter(r)).collect())
            .unwrap_or_default();
        rows.sort_by_key(|r| r.1);

        ResultSet::with_rows(
            vec!["bar".to_string(), "idx".to_string()],
            rows.into_iter()
                .map(|(bar, idx)| vec![Value::from(bar.as_str()), Value::Int(*idx)])
                .collect(),
        )
    }
}

#[async_trait]
impl StatementBackend for MockBackend {
    type Handle = u64;

    async fn prepare(&mut self, sql: &str) -> Result<u64, DbError> {
        if let Some(delay) = self.prepare_delay {
            tokio::time::sleep(delay).await;
        }
        if self.hang_prepare {
            futures::future::pending::<()>().await;
        }

        let stmt = parse(sql).map_err(|e| self.fail(e))?;
        let checked = self
            .check_aborted(&stmt)
            .and_then(|()| self.check_relations(&stmt));
        checked.map_err(|e| self.fail(e))?;

        *self.prepares.entry(sql.trim().to_string()).or_default() += 1;
        self.next_handle += 1;
        self.prepared.insert(self.next_handle, stmt);
        if self.stale_on_first_execute {
            self.stale.insert(self.next_handle);
        }
        Ok(self.next_handle)
    }

    async fn bind_execute(&mut self, handle: &u64, params: &[Value]) -> Result<ResultSet, DbError> {
        if self.hang_execute {
            futures::future::pending::<()>().await;
        }
        let stmt = self.prepared.get(handle).cloned();
        if let Some(stmt) = &stmt {
            self.check_aborted(stmt)?;
        }
        if self.stale.remove(handle) {
            let err = DbError::stale("cached plan must not change result type").with_code("0A000");
            return Err(self.fail(err));
        }

        let stmt = match stmt {
            Some(stmt) => stmt,
            None => {
                let err = DbError::stale(format!("prepared statement \"s{}\" does not exist", handle))
                    .with_code("26000");
                return Err(self.fail(err));
            }
        };
        self.run(&stmt, params).map_err(|e| self.fail(e))
    }

    async fn release(&mut self, handle: u64) -> Result<(), DbError> {
        self.released.push(handle);
        self.prepared.remove(&handle);
        self.stale.remove(&handle);
        if self.fail_release {
            return Err(DbError::connection("server closed the connection unexpectedly"));
        }
        Ok(())
    }

    async fn execute_direct(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, DbError> {
        *self.directs.entry(sql.trim().to_string()).or_default() += 1;
        let stmt = parse(sql).map_err(|e| self.fail(e))?;
        self.check_aborted(&stmt)?;
        self.run(&stmt, params).map_err(|e| self.fail(e))
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.closed = true;
        if let Some(hook) = self.close_hook.take() {
            hook(&self.released);
        }
        Ok(())
    }
}
