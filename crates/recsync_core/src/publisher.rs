//! Post-commit version notifications.
//!
//! After a write commits, every modified record is announced to a
//! publish/subscribe fan-out as a [`VersionNotice`]. Subscribers learn that
//! a newer version exists and re-pull the record through the read path.
//!
//! Publishing is fire-and-forget: the coordinator only enqueues notices,
//! a dedicated dispatcher thread delivers them, and delivery failures are
//! logged and counted but never reach the writer. Notifications speed up
//! convergence; correctness never depends on them.

use crate::error::{CoreError, CoreResult};
use crate::record::RecordPointer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as ack, Arc};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

/// Errors a [`NotificationSink`] can report.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The fan-out is no longer accepting messages.
    #[error("notification channel closed")]
    Closed,

    /// Transport-specific failure.
    #[error("publish failed: {0}")]
    Backend(String),
}

/// Announcement that a record reached a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionNotice {
    /// Subscription key, `"{table}:{id}"`.
    pub key: String,
    /// The modified record.
    pub pointer: RecordPointer,
    /// The record's new version.
    pub version: u64,
    /// True if the record was deleted at `version`.
    pub deleted: bool,
}

impl VersionNotice {
    /// Creates a notice for a record that now exists at `version`.
    pub fn updated(pointer: RecordPointer, version: u64) -> Self {
        Self {
            key: Self::key_for(&pointer),
            pointer,
            version,
            deleted: false,
        }
    }

    /// Creates a notice for a record deleted at `version`.
    pub fn deleted(pointer: RecordPointer, version: u64) -> Self {
        Self {
            key: Self::key_for(&pointer),
            pointer,
            version,
            deleted: true,
        }
    }

    /// Returns the subscription key for a record.
    pub fn key_for(pointer: &RecordPointer) -> String {
        pointer.to_string()
    }
}

/// A publish/subscribe fan-out that accepts version notices.
pub trait NotificationSink: Send + Sync {
    /// Publishes one notice.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice could not be handed to the fan-out.
    fn publish(&self, notice: &VersionNotice) -> Result<(), PublishError>;
}

/// In-process fan-out over a `tokio::sync::broadcast` channel.
///
/// Every subscriber receives every notice published after it subscribed.
/// Slow subscribers that fall more than `capacity` notices behind observe
/// a lag error on their receiver and should re-pull what they watch.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<VersionNotice>,
}

impl BroadcastSink {
    /// Creates a sink that buffers up to `capacity` notices per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to all future notices.
    pub fn subscribe(&self) -> broadcast::Receiver<VersionNotice> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, notice: &VersionNotice) -> Result<(), PublishError> {
        // No subscribers is not a failure: nobody is waiting for this key.
        if self.sender.send(notice.clone()).is_err() {
            trace!(key = %notice.key, "no subscribers for notice");
        }
        Ok(())
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Notices handed to the sink successfully.
    pub published: u64,
    /// Notices the sink rejected.
    pub failed: u64,
}

enum Command {
    Publish(Vec<VersionNotice>),
    Flush(ack::SyncSender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
}

/// Schedules version notices for delivery on a background dispatcher.
///
/// [`schedule`](Self::schedule) never blocks on the sink and never fails;
/// notices are delivered in the order batches were scheduled.
pub struct NotificationPublisher {
    sender: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl NotificationPublisher {
    /// Starts a publisher delivering to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher thread cannot be spawned.
    pub fn start(sink: Arc<dyn NotificationSink>) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name("recsync-publisher".into())
            .spawn(move || dispatch(receiver, sink, worker_counters))
            .map_err(|e| CoreError::internal(format!("failed to spawn publisher: {e}")))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Enqueues notices for delivery and returns immediately.
    pub fn schedule(&self, notices: Vec<VersionNotice>) {
        if notices.is_empty() {
            return;
        }

        let count = notices.len();
        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Command::Publish(notices)).is_ok(),
            None => false,
        };

        if sent {
            trace!(count, "scheduled version notices");
        } else {
            warn!(count, "publisher stopped, dropping version notices");
        }
    }

    /// Blocks until every notice scheduled so far has been handed to the sink.
    ///
    /// Safe to call from inside an async runtime, where it blocks the
    /// calling worker thread until the dispatcher catches up. Returns at
    /// once after [`shutdown`](Self::shutdown).
    pub fn flush(&self) {
        let (done, wait) = ack::sync_channel(1);
        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Command::Flush(done)).is_ok(),
            None => false,
        };
        if sent && wait.recv().is_err() {
            warn!("publisher dispatcher stopped before flush completed");
        }
    }

    /// Returns delivery counters.
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.counters.published.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Delivers what is queued, then stops the dispatcher.
    pub fn shutdown(&self) {
        // Dropping the sender ends the dispatcher loop once the queue drains.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("publisher dispatcher panicked");
            }
        }
    }
}

impl Drop for NotificationPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NotificationPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPublisher")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Command>,
    sink: Arc<dyn NotificationSink>,
    counters: Arc<Counters>,
) {
    while let Some(command) = receiver.blocking_recv() {
        match command {
            Command::Publish(notices) => {
                for notice in &notices {
                    match sink.publish(notice) {
                        Ok(()) => {
                            counters.published.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                            warn!(
                                key = %notice.key,
                                version = notice.version,
                                error = %err,
                                "failed to publish version notice"
                            );
                        }
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("publisher dispatcher stopped");
}
