//! Exactly-once settlement of operations racing a deadline.
//!
//! Every statement or transaction submitted to the connection thread gets a
//! [`PendingOperation`]. The worker and the deadline both try to settle it;
//! whichever claims it first delivers the caller's result, and the loser is
//! dropped. A timeout also cancels the operation's token so work that has
//! not started yet is skipped and a running unit of work can check for it.

use crate::error::from_tokio_rusqlite;
use crate::{DatabaseError, DatabaseResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One in-flight operation whose result is delivered at most once.
pub struct PendingOperation<T> {
    settled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<DatabaseResult<T>>>>,
    cancel: CancellationToken,
}

impl<T> PendingOperation<T> {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<DatabaseResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Self {
            settled: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
            cancel: CancellationToken::new(),
        });
        (pending, rx)
    }

    /// Take the right to settle. True for exactly one caller.
    pub fn claim(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deliver a result after a successful [`claim`](Self::claim).
    pub fn deliver(&self, result: DatabaseResult<T>) {
        if let Some(tx) = self.sender.lock().take() {
            // The caller may have gone away; nothing left to notify.
            let _ = tx.send(result);
        }
    }

    /// Claim and deliver. Returns false if another path already settled.
    pub fn settle(&self, result: DatabaseResult<T>) -> bool {
        if self.claim() {
            self.deliver(result);
            true
        } else {
            false
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Cancelled once the deadline has won.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Run `work` on the connection thread, bounded by `deadline`.
///
/// `work` is responsible for settling the operation with its outcome. If the
/// deadline elapses first the caller receives [`DatabaseError::Timeout`]
/// naming `label`, and whatever `work` settles later is discarded.
pub(crate) async fn run_with_deadline<T, W>(
    conn: Connection,
    deadline: Duration,
    label: String,
    work: W,
) -> DatabaseResult<T>
where
    T: Send + 'static,
    W: FnOnce(&mut rusqlite::Connection, &PendingOperation<T>) + Send + 'static,
{
    let (pending, mut rx) = PendingOperation::<T>::new();

    let worker = Arc::clone(&pending);
    let worker_label = label.clone();
    tokio::spawn(async move {
        let on_thread = Arc::clone(&worker);
        let submitted = conn
            .call(move |c| {
                if on_thread.is_settled() {
                    debug!(sql = %worker_label, "Skipping work whose caller already timed out");
                    return Ok(());
                }
                work(c, &on_thread);
                Ok(())
            })
            .await;

        if let Err(e) = submitted {
            if !worker.settle(Err(from_tokio_rusqlite(e))) {
                debug!("Connection failure after operation settled");
            }
        }
    });

    let received = match tokio::time::timeout(deadline, &mut rx).await {
        Ok(received) => received,
        Err(_) => {
            let timeout = DatabaseError::Timeout {
                sql: label.clone(),
                after: deadline,
            };
            if pending.settle(Err(timeout)) {
                pending.cancellation().cancel();
                warn!(sql = %label, after_ms = deadline.as_millis() as u64, "Operation timed out");
            }
            rx.await
        }
    };

    received.unwrap_or_else(|_| {
        Err(DatabaseError::Connection(
            "operation dropped without a result".to_string(),
        ))
    })
}
