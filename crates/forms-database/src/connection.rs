//! Lazy, single-handle connection management.
//!
//! The process owns exactly one SQLite connection. The first caller of
//! [`ConnectionManager::connect`] starts establishing it on a background
//! task; callers arriving meanwhile queue up and are all settled with the
//! same outcome once establishment finishes. Pragmas are applied before any
//! caller sees the handle.

use crate::error::from_tokio_rusqlite;
use crate::{DatabaseError, DatabaseResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_rusqlite::Connection;
use tracing::{debug, error, info, warn};

/// Path that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const DEFAULT_CACHE_SIZE_KIB: u32 = 2_000;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How to open and configure the connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub path: PathBuf,
    /// Page cache size in KiB (`PRAGMA cache_size = -N`).
    pub cache_size_kib: u32,
    pub busy_timeout: Duration,
}

impl ConnectionOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    fn is_in_memory(&self) -> bool {
        self.path == Path::new(IN_MEMORY)
    }

    fn pragmas(&self) -> String {
        format!(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA cache_size = -{};
            PRAGMA busy_timeout = {};
            ",
            self.cache_size_kib,
            self.busy_timeout.as_millis()
        )
    }
}

type Waiter = oneshot::Sender<Result<Connection, String>>;

enum State {
    Disconnected,
    Connecting(Vec<Waiter>),
    Connected(Connection),
}

/// Owns the process's single database handle.
pub struct ConnectionManager {
    options: ConnectionOptions,
    state: Mutex<State>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(options: ConnectionOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Mutex::new(State::Disconnected),
            generation: AtomicU64::new(0),
        })
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Return the live handle, establishing it if needed.
    ///
    /// Every caller waiting on one establishment gets the same outcome. A
    /// failure is a [`DatabaseError::Connection`].
    pub async fn connect(self: &Arc<Self>) -> DatabaseResult<Connection> {
        let rx = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Connected(conn) => return Ok(conn.clone()),
                State::Connecting(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
                State::Disconnected => {
                    let (tx, rx) = oneshot::channel();
                    *state = State::Connecting(vec![tx]);
                    tokio::spawn(Arc::clone(self).establish());
                    rx
                }
            }
        };

        match rx.await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(message)) => Err(DatabaseError::Connection(message)),
            Err(_) => Err(DatabaseError::Connection(
                "connection attempt was abandoned".to_string(),
            )),
        }
    }

    async fn establish(self: Arc<Self>) {
        let outcome = open_configured(&self.options).await;

        let waiters = {
            let mut state = self.state.lock();
            let waiters = match std::mem::replace(&mut *state, State::Disconnected) {
                State::Connecting(waiters) => waiters,
                other => {
                    *state = other;
                    Vec::new()
                }
            };
            if let Ok(conn) = &outcome {
                *state = State::Connected(conn.clone());
                self.generation.fetch_add(1, Ordering::AcqRel);
            }
            waiters
        };

        match &outcome {
            Ok(_) => info!(
                path = %self.options.path.display(),
                waiters = waiters.len(),
                "Database connection established"
            ),
            Err(e) => error!(
                path = %self.options.path.display(),
                waiters = waiters.len(),
                error = %e,
                "Database connection failed"
            ),
        }

        for waiter in waiters {
            let shared = match &outcome {
                Ok(conn) => Ok(conn.clone()),
                Err(e) => Err(e.to_string()),
            };
            // Waiters that gave up are skipped.
            let _ = waiter.send(shared);
        }
    }

    /// Close the handle. A no-op when already disconnected; waits for an
    /// in-progress establishment first.
    pub async fn disconnect(self: &Arc<Self>) -> DatabaseResult<()> {
        enum Step {
            Done,
            Close(Connection),
            Wait(oneshot::Receiver<Result<Connection, String>>),
        }

        loop {
            let step = {
                let mut state = self.state.lock();
                match std::mem::replace(&mut *state, State::Disconnected) {
                    State::Disconnected => Step::Done,
                    State::Connected(conn) => Step::Close(conn),
                    State::Connecting(mut waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        *state = State::Connecting(waiters);
                        Step::Wait(rx)
                    }
                }
            };

            match step {
                Step::Done => return Ok(()),
                Step::Wait(rx) => {
                    // Outcome does not matter; re-examine the state.
                    let _ = rx.await;
                }
                Step::Close(conn) => {
                    let result = conn.close().await.map_err(from_tokio_rusqlite);
                    match &result {
                        Ok(()) => {
                            info!(path = %self.options.path.display(), "Database connection closed")
                        }
                        Err(e) => warn!(error = %e, "Database connection closed with error"),
                    }
                    return result;
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), State::Connected(_))
    }

    /// Number of successful establishments so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Connect if needed and run `SELECT 1`.
    pub async fn health_check(self: &Arc<Self>) -> DatabaseResult<()> {
        let conn = self.connect().await?;
        conn.call(|c| {
            c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;
        debug!("Database health check passed");
        Ok(())
    }
}

async fn open_configured(options: &ConnectionOptions) -> DatabaseResult<Connection> {
    let conn = if options.is_in_memory() {
        Connection::open_in_memory().await
    } else {
        if let Some(parent) = options.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DatabaseError::Connection(format!(
                        "cannot create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        Connection::open(&options.path).await
    }
    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    let pragmas = options.pragmas();
    conn.call(move |c| {
        c.execute_batch(&pragmas)?;
        Ok(())
    })
    .await
    .map_err(|e| DatabaseError::Connection(format!("failed to configure connection: {e}")))?;

    debug!(
        cache_size_kib = options.cache_size_kib,
        busy_timeout_ms = options.busy_timeout.as_millis() as u64,
        "Connection pragmas applied"
    );
    Ok(conn)
}
