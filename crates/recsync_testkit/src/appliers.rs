//! Appliers for concurrency tests.

use parking_lot::Mutex;
use recsync_core::{
    ApplyOutcome, CoreResult, MergeApplier, OperationApplier, RecordMap, WriteOperation,
};

type Hook = Box<dyn FnOnce() + Send>;

/// [`MergeApplier`] that runs a one-shot hook before applying.
///
/// The hook runs after the write loaded its records and before the
/// conflict check, so a competing write committed from the hook must be
/// caught when the changed records are reloaded.
#[derive(Default)]
pub struct InterferingApplier {
    inner: MergeApplier,
    hook: Mutex<Option<Hook>>,
}

impl InterferingApplier {
    /// Creates an applier with no hook armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` once, during the next apply.
    pub fn before_next_apply(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// Returns true while a hook is armed.
    pub fn is_armed(&self) -> bool {
        self.hook.lock().is_some()
    }
}

impl OperationApplier for InterferingApplier {
    fn apply(
        &self,
        original: &RecordMap,
        operations: &[WriteOperation],
    ) -> CoreResult<ApplyOutcome> {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.apply(original, operations)
    }
}
