//! Service-root database handle.

use crate::executor::DEFAULT_QUERY_TIMEOUT;
use crate::row::{ExecuteResult, Row, SqlValue};
use crate::transaction::TransactionHandle;
use crate::{
    migrations, ConnectionManager, ConnectionOptions, DatabaseResult, QueryExecutor,
    TransactionCoordinator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Everything needed to open the store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub connection: ConnectionOptions,
    pub query_timeout: Duration,
    /// Twice `query_timeout` when `None`.
    pub transaction_timeout: Option<Duration>,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            connection: ConnectionOptions::new(path),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            transaction_timeout: None,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }
}

/// Connection manager, executor and transaction coordinator bundled for the
/// service root. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Database {
    manager: Arc<ConnectionManager>,
    executor: QueryExecutor,
    transactions: TransactionCoordinator,
}

impl Database {
    /// Build the handle and establish the connection.
    ///
    /// A failure here is fatal to the service.
    pub async fn open(config: DatabaseConfig) -> DatabaseResult<Self> {
        let manager = ConnectionManager::new(config.connection);
        let executor = QueryExecutor::new(Arc::clone(&manager), config.query_timeout);
        let transactions = match config.transaction_timeout {
            Some(timeout) => TransactionCoordinator::with_timeout(Arc::clone(&manager), timeout),
            None => TransactionCoordinator::new(&executor),
        };

        manager.connect().await?;
        info!(path = %manager.options().path.display(), "Database opened");

        Ok(Self {
            manager,
            executor,
            transactions,
        })
    }

    pub fn path(&self) -> &Path {
        &self.manager.options().path
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn transactions(&self) -> &TransactionCoordinator {
        &self.transactions
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> DatabaseResult<Vec<Row>> {
        self.executor.query(sql, params).await
    }

    pub async fn query_one(&self, sql: &str, params: Vec<SqlValue>) -> DatabaseResult<Option<Row>> {
        self.executor.query_one(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> DatabaseResult<ExecuteResult> {
        self.executor.execute(sql, params).await
    }

    pub async fn call<F, T>(&self, label: &str, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.executor.call(label, f).await
    }

    pub async fn transaction<F, T>(&self, unit: F) -> DatabaseResult<T>
    where
        F: FnOnce(&TransactionHandle<'_>) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.transactions.transaction(unit).await
    }

    /// Apply pending schema migrations.
    pub async fn run_migrations(&self) -> DatabaseResult<()> {
        self.executor
            .call("run migrations", migrations::run_migrations)
            .await
    }

    pub async fn schema_version(&self) -> DatabaseResult<i32> {
        self.executor
            .call("schema version", |conn| migrations::schema_version(conn))
            .await
    }

    /// Fold the write-ahead log into the main database file so a file copy
    /// sees every committed transaction.
    pub async fn checkpoint(&self) -> DatabaseResult<()> {
        let (busy, log_frames, checkpointed) = self
            .executor
            .call("PRAGMA wal_checkpoint(TRUNCATE)", |conn| {
                Ok(conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?)
            })
            .await?;
        debug!(busy, log_frames, checkpointed, "WAL checkpoint complete");
        Ok(())
    }

    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.manager.health_check().await
    }

    /// Close the connection. Later calls reconnect lazily.
    pub async fn close(&self) -> DatabaseResult<()> {
        self.manager.disconnect().await
    }
}
