//! Deadline-bounded statement execution.
//!
//! All statements run on the single connection thread owned by
//! [`ConnectionManager`], so they execute one at a time in submission order.
//! Callers only await; each call races its statement against the executor's
//! timeout and receives exactly one outcome.
//!
//! # Critical Section Rules
//!
//! Closures passed to [`QueryExecutor::call`] run on the connection thread.
//! Only SQL and light row mapping belong there. Encryption and file I/O
//! must happen outside, or every other caller waits behind them.

use crate::row::{self, ExecuteResult, Row, SqlValue};
use crate::settlement::run_with_deadline;
use crate::{ConnectionManager, DatabaseResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Default deadline for a single statement.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs statements against the managed connection with a deadline.
#[derive(Clone)]
pub struct QueryExecutor {
    manager: Arc<ConnectionManager>,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(manager: Arc<ConnectionManager>, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Run a statement and collect every row.
    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> DatabaseResult<Vec<Row>> {
        let statement = sql.to_string();
        self.call(sql, move |conn| row::select(conn, &statement, &params, None))
            .await
    }

    /// Run a statement and return its first row, if any.
    pub async fn query_one(&self, sql: &str, params: Vec<SqlValue>) -> DatabaseResult<Option<Row>> {
        let statement = sql.to_string();
        let rows = self
            .call(sql, move |conn| row::select(conn, &statement, &params, Some(1)))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Run a write statement.
    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> DatabaseResult<ExecuteResult> {
        let statement = sql.to_string();
        self.call(sql, move |conn| row::run_statement(conn, &statement, &params))
            .await
    }

    /// Run an arbitrary closure on the connection under the same deadline.
    ///
    /// `label` names the operation in timeout errors and logs.
    pub async fn call<F, T>(&self, label: &str, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.manager.connect().await?;
        let label = label.to_string();
        let log_label = label.clone();

        run_with_deadline(conn, self.timeout, label, move |c, pending| {
            let result = f(c);
            if let Err(e) = &result {
                error!(sql = %log_label, error = %e, "Statement failed");
            }
            if !pending.settle(result) {
                debug!(sql = %log_label, "Discarding completion that arrived after the deadline");
            }
        })
        .await
    }
}
