//! The demo workload: select from `foo` in one transaction, then drop `foo`
//! and run the identical select in another.
//!
//! Running it once with the statement cache and once without shows the cache
//! changes nothing the caller can observe: the first select returns the same
//! rows, and the second fails with the same missing-relation error.

use crate::backend::{ResultSet, StatementBackend, Value};
use crate::connection::CachedConnection;
use crate::error::{Result, StatementError};
use tracing::{info, warn};

pub const DROP_FOO_IF_EXISTS: &str = "drop table if exists foo";
pub const CREATE_FOO: &str = "create table foo (bar text, idx int)";
pub const POPULATE_FOO: &str = "insert into foo (bar, idx) values ('baz', 42)";
pub const DROP_FOO: &str = "drop table foo";
pub const SELECT_FOO: &str = "select bar, idx from foo where bar = $2 and idx >= $1 order by idx";

/// Parameters for [`SELECT_FOO`]: `$1 = 0`, `$2 = 'baz'`
pub fn select_params() -> Vec<Value> {
    vec![Value::Int(0), Value::from("baz")]
}

/// Outcome of one workload run
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    /// Rows from the select before the drop
    pub first_select: ResultSet,

    /// The select after the drop; expected to fail
    pub second_select: std::result::Result<ResultSet, StatementError>,
}

impl WorkloadReport {
    /// Whether the run matched expectations: one row before the drop, an error after
    pub fn is_expected(&self) -> bool {
        self.first_select.len() == 1 && self.second_select.is_err()
    }
}

/// Recreate table `foo` with a single row `('baz', 42)`
pub async fn setup<B: StatementBackend>(conn: &mut CachedConnection<B>) -> Result<()> {
    conn.exec(DROP_FOO_IF_EXISTS, &[]).await?;
    conn.exec(CREATE_FOO, &[]).await?;
    conn.exec(POPULATE_FOO, &[]).await?;
    Ok(())
}

/// Run the two transactions. Both are rolled back, so `foo` survives.
pub async fn run<B: StatementBackend>(conn: &mut CachedConnection<B>) -> Result<WorkloadReport> {
    let params = select_params();

    conn.begin().await?;
    info!("first select");
    let first_select = conn.query(SELECT_FOO, &params).await?;
    log_rows(&first_select);
    conn.rollback().await?;

    conn.begin().await?;
    info!("dropping table");
    conn.exec(DROP_FOO, &[]).await?;

    info!("second select");
    let second_select = conn.query(SELECT_FOO, &params).await;
    match &second_select {
        Err(e) => info!("select from foo err={}", e),
        Ok(rows) => {
            warn!("Expected error, but no error selecting from foo");
            log_rows(rows);
        }
    }
    conn.rollback().await?;

    Ok(WorkloadReport {
        first_select,
        second_select,
    })
}

fn log_rows(result: &ResultSet) {
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        info!("  read ({})", cells.join(", "));
    }
}
