//! Single-level transactions with their own deadline.
//!
//! A unit of work runs entirely on the connection thread between BEGIN and
//! COMMIT, so no other caller's statement can interleave with it. A unit
//! must not start another transaction.
//!
//! The deadline is soft: when it elapses the caller gets a timeout at once,
//! the handle reports [`TransactionHandle::is_cancelled`], and the unit's
//! work is rolled back when it returns. Commit happens only if the unit
//! claims the operation before the deadline does.

use crate::row::{self, ExecuteResult, Row, SqlValue};
use crate::settlement::run_with_deadline;
use crate::{ConnectionManager, DatabaseError, DatabaseResult, QueryExecutor};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Statement access inside a unit of work.
pub struct TransactionHandle<'a> {
    conn: &'a rusqlite::Connection,
    cancel: CancellationToken,
}

impl TransactionHandle<'_> {
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> DatabaseResult<Vec<Row>> {
        row::select(self.conn, sql, params, None)
    }

    pub fn query_one(&self, sql: &str, params: &[SqlValue]) -> DatabaseResult<Option<Row>> {
        Ok(row::select(self.conn, sql, params, Some(1))?.into_iter().next())
    }

    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> DatabaseResult<ExecuteResult> {
        row::run_statement(self.conn, sql, params)
    }

    /// True once the caller has been told the transaction timed out. Work
    /// done after this point will be rolled back.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Wraps units of work in BEGIN/COMMIT/ROLLBACK.
#[derive(Clone)]
pub struct TransactionCoordinator {
    manager: Arc<ConnectionManager>,
    timeout: Duration,
}

impl TransactionCoordinator {
    /// Coordinator whose deadline is twice the executor's.
    pub fn new(executor: &QueryExecutor) -> Self {
        Self::with_timeout(Arc::clone(executor.connection_manager()), executor.timeout() * 2)
    }

    pub fn with_timeout(manager: Arc<ConnectionManager>, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `unit` inside a transaction.
    ///
    /// Commits when `unit` returns `Ok` before the deadline. Rolls back when
    /// it returns `Err`, panics, or finishes after the deadline.
    pub async fn transaction<F, T>(&self, unit: F) -> DatabaseResult<T>
    where
        F: FnOnce(&TransactionHandle<'_>) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.manager.connect().await?;

        run_with_deadline(conn, self.timeout, "transaction".to_string(), |c, pending| {
            let tx = match c.transaction() {
                Ok(tx) => tx,
                Err(e) => {
                    pending.settle(Err(e.into()));
                    return;
                }
            };

            let handle = TransactionHandle {
                conn: &tx,
                cancel: pending.cancellation().clone(),
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| unit(&handle)));
            drop(handle);

            match outcome {
                Ok(Ok(value)) => {
                    if pending.claim() {
                        match tx.commit() {
                            Ok(()) => pending.deliver(Ok(value)),
                            Err(e) => {
                                error!(error = %e, "Transaction commit failed");
                                pending.deliver(Err(DatabaseError::Transaction(format!(
                                    "commit failed: {e}"
                                ))));
                            }
                        }
                    } else {
                        rollback(tx);
                        debug!("Transaction finished after its deadline and was rolled back");
                    }
                }
                Ok(Err(e)) => {
                    rollback(tx);
                    warn!(error = %e, "Transaction rolled back");
                    if !pending.settle(Err(e)) {
                        debug!("Discarding transaction failure that arrived after the deadline");
                    }
                }
                Err(_) => {
                    rollback(tx);
                    error!("Unit of work panicked; transaction rolled back");
                    pending.settle(Err(DatabaseError::Transaction(
                        "unit of work panicked".to_string(),
                    )));
                }
            }
        })
        .await
    }
}

fn rollback(tx: rusqlite::Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        error!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectionOptions;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    async fn setup(timeout: Duration) -> (QueryExecutor, TransactionCoordinator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let manager = ConnectionManager::new(ConnectionOptions::new(dir.path().join("tx.db")));
        let executor = QueryExecutor::new(Arc::clone(&manager), Duration::from_secs(5));
        executor
            .execute(
                "CREATE TABLE inspectors (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                vec![],
            )
            .await
            .unwrap();
        let coordinator = TransactionCoordinator::with_timeout(manager, timeout);
        (executor, coordinator, dir)
    }

    async fn count(executor: &QueryExecutor) -> i64 {
        let row = executor
            .query_one("SELECT COUNT(*) AS n FROM inspectors", vec![])
            .await
            .unwrap()
            .unwrap();
        row["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn commits_all_statements() {
        let (executor, coordinator, _dir) = setup(Duration::from_secs(5)).await;

        let id = coordinator
            .transaction(|tx| {
                tx.execute("INSERT INTO inspectors (name) VALUES ('a')", &[])?;
                let second = tx.execute("INSERT INTO inspectors (name) VALUES ('b')", &[])?;
                let seen = tx.query("SELECT name FROM inspectors ORDER BY id", &[])?;
                assert_eq!(seen.len(), 2);
                Ok(second.last_insert_id)
            })
            .await
            .unwrap();

        assert_eq!(id, 2);
        assert_eq!(count(&executor).await, 2);
    }

    #[tokio::test]
    async fn failed_unit_leaves_no_trace() {
        let (executor, coordinator, _dir) = setup(Duration::from_secs(5)).await;

        let err = coordinator
            .transaction(|tx| {
                let inserted = tx.execute("INSERT INTO inspectors (name) VALUES ('x')", &[])?;
                tx.execute(
                    "INSERT INTO inspectors (id, name) VALUES (?, 'dup')",
                    &[SqlValue::Integer(inserted.last_insert_id)],
                )?;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DatabaseError::Query(_)));
        let row = executor
            .query_one("SELECT * FROM inspectors WHERE name = 'x'", vec![])
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn panicking_unit_rolls_back_and_keeps_connection() {
        let (executor, coordinator, _dir) = setup(Duration::from_secs(5)).await;

        let err = coordinator
            .transaction(|tx| -> DatabaseResult<()> {
                tx.execute("INSERT INTO inspectors (name) VALUES ('p')", &[])?;
                panic!("unit of work bug");
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DatabaseError::Transaction(_)));
        assert_eq!(count(&executor).await, 0);
    }

    #[tokio::test]
    async fn overrunning_unit_times_out_and_is_rolled_back() {
        let (executor, coordinator, _dir) = setup(Duration::from_millis(100)).await;
        let saw_cancel = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&saw_cancel);
        let err = coordinator
            .transaction(move |tx| {
                tx.execute("INSERT INTO inspectors (name) VALUES ('slow')", &[])?;
                std::thread::sleep(Duration::from_millis(400));
                flag.store(tx.is_cancelled(), Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        // Runs after the unit returns, since statements are serialized.
        assert_eq!(count(&executor).await, 0);
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn default_deadline_is_twice_the_query_timeout() {
        let manager = ConnectionManager::new(ConnectionOptions::in_memory());
        let executor = QueryExecutor::new(manager, Duration::from_millis(750));
        let coordinator = TransactionCoordinator::new(&executor);
        assert_eq!(coordinator.timeout(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn reads_inside_unit_see_uncommitted_writes() {
        let (_executor, coordinator, _dir) = setup(Duration::from_secs(5)).await;

        let row = coordinator
            .transaction(|tx| {
                tx.execute("INSERT INTO inspectors (name) VALUES ('inside')", &[])?;
                tx.query_one("SELECT name FROM inspectors", &[])
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(row["name"], json!("inside"));
    }
}
