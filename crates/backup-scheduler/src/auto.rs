//! Periodic backups.

use crate::BackupScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running periodic backup task. Clones control the same task.
#[derive(Debug, Clone)]
pub struct AutoBackupHandle {
    stop: CancellationToken,
    finished: CancellationToken,
}

impl AutoBackupHandle {
    /// Ask the task to stop. A backup already in progress completes first.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.finished.is_cancelled()
    }

    /// Wait until the task has exited.
    pub async fn stopped(&self) {
        self.finished.cancelled().await;
    }
}

impl BackupScheduler {
    /// Back up `source` now and then every `interval` until stopped.
    ///
    /// Failures are logged and the schedule continues. Calling this while a
    /// task is running returns the existing handle.
    pub fn start_auto_backup(self: &Arc<Self>, source: impl Into<PathBuf>) -> AutoBackupHandle {
        let mut slot = self.auto.lock();
        if let Some(existing) = slot.as_ref().filter(|h| h.is_running()) {
            info!("Automatic backups already running");
            return existing.clone();
        }

        let handle = AutoBackupHandle {
            stop: CancellationToken::new(),
            finished: CancellationToken::new(),
        };
        *slot = Some(handle.clone());
        drop(slot);

        let source = source.into();
        let period = self.config.interval.max(Duration::from_millis(1));
        let scheduler = Arc::clone(self);
        let stop = handle.stop.clone();
        let finished = handle.finished.clone();

        info!(
            source = %source.display(),
            interval_secs = period.as_secs(),
            "Automatic backups started"
        );

        tokio::spawn(async move {
            let _done = finished.drop_guard();
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match scheduler.create_backup(&source).await {
                    Ok(record) => debug!(path = %record.path.display(), "Scheduled backup complete"),
                    Err(e) => warn!(error = %e, "Scheduled backup failed; retrying next interval"),
                }
            }

            info!("Automatic backups stopped");
        });

        handle
    }

    /// Stop the periodic task, if any. Returns whether one was running.
    pub fn stop_auto_backup(&self) -> bool {
        match self.auto.lock().take() {
            Some(handle) => {
                let was_running = handle.is_running();
                handle.stop();
                was_running
            }
            None => false,
        }
    }
}
