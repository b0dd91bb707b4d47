//! SQLite persistence for the forms store.
//!
//! This crate provides:
//! - A lazily established, single-handle [`ConnectionManager`]
//! - [`QueryExecutor`]: query / query_one / execute with a per-call deadline
//! - [`TransactionCoordinator`]: single-level transactions with a longer deadline
//! - Schema migrations for the forms tables
//!
//! # Architecture
//!
//! One dedicated thread owns the SQLite connection (via `tokio-rusqlite`).
//! Every statement is sent to it and executed in FIFO order, so the store
//! sees one writer at a time while callers simply await their results.
//!
//! ```ignore
//! let db = Database::open(DatabaseConfig::new(path)).await?;
//! db.run_migrations().await?;
//! let row = db.query_one("SELECT * FROM forms WHERE id = ?", vec![id.into()]).await?;
//! ```
//!
//! Each call settles exactly once: either with the statement's outcome or
//! with [`DatabaseError::Timeout`] when its deadline passes first.

mod connection;
mod db;
mod error;
mod executor;
pub mod migrations;
mod row;
mod settlement;
mod transaction;

pub use connection::{ConnectionManager, ConnectionOptions, IN_MEMORY};
pub use db::{Database, DatabaseConfig};
pub use error::{DatabaseError, DatabaseResult};
pub use executor::{QueryExecutor, DEFAULT_QUERY_TIMEOUT};
pub use row::{ExecuteResult, Row, SqlValue};
pub use settlement::PendingOperation;
pub use transaction::{TransactionCoordinator, TransactionHandle};
