//! Notification sinks for tests.

use parking_lot::Mutex;
use recsync_core::{NotificationSink, PublishError, VersionNotice};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Records every notice it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<VersionNotice>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the notices received so far, in delivery order.
    pub fn notices(&self) -> Vec<VersionNotice> {
        self.notices.lock().clone()
    }

    /// Returns the received subscription keys.
    pub fn keys(&self) -> Vec<String> {
        self.notices.lock().iter().map(|n| n.key.clone()).collect()
    }

    /// Forgets all received notices.
    pub fn clear(&self) {
        self.notices.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, notice: &VersionNotice) -> Result<(), PublishError> {
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}

/// Rejects every notice, counting the attempts.
#[derive(Debug, Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    /// Creates a failing sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many notices were attempted.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationSink for FailingSink {
    fn publish(&self, _notice: &VersionNotice) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::Backend("fan-out unavailable".into()))
    }
}
