//! Configuration file change watcher
//!
//! Polls the backing file and emits change events over a channel. The
//! reconciliation loop consumes the channel, which keeps it independently
//! testable against synthetic event sequences.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of the change-event channel. Changes are coalesced by the
/// poll interval, so a small buffer is enough.
const CHANGE_EVENT_CHANNEL_CAPACITY: usize = 16;

/// A configuration change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Path of the watched file
    pub path: PathBuf,
    /// True when the file could not be read; consumers must ignore the
    /// event and keep their previous in-memory settings
    pub error: bool,
}

/// Watches one configuration file for modification
pub struct ConfigWatcher {
    cancel: CancellationToken,
}

impl ConfigWatcher {
    /// Start watching `path`, polling at `interval`.
    ///
    /// Returns the watcher handle and the event receiver. The first
    /// successful poll only records a baseline; no event is emitted
    /// until the file actually changes.
    pub fn spawn(path: PathBuf, interval: Duration) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(CHANGE_EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            watch_loop(path, interval, tx, task_cancel).await;
        });

        (Self { cancel }, rx)
    }

    /// Stop the watch. Queued events may still be delivered.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Modification signature: mtime plus length, so edits are detected even
/// on filesystems with coarse mtime granularity.
type FileSignature = (SystemTime, u64);

async fn watch_loop(
    path: PathBuf,
    interval: Duration,
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut last: Option<FileSignature> = None;
    let mut missing_reported = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(path = %path.display(), "config watch stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                missing_reported = false;
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let signature = (modified, meta.len());

                match last {
                    Some(previous) if previous != signature => {
                        debug!(path = %path.display(), "configuration file change detected");
                        if tx
                            .send(ChangeEvent {
                                path: path.clone(),
                                error: false,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    _ => {}
                }
                last = Some(signature);
            }
            Err(e) => {
                last = None;
                if !missing_reported {
                    missing_reported = true;
                    debug!(path = %path.display(), error = %e, "watched file unreadable");
                    if tx
                        .send(ChangeEvent {
                            path: path.clone(),
                            error: true,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }
}
