//! Dispatch Bridge
//!
//! Adapter callbacks fire on whatever task the stream's read loop happens
//! to run on. Consumers often need those callbacks marshalled onto one
//! designated task (the "primary context") so downstream state can stay
//! single-threaded. The [`DispatchBridge`] is that hand-off point:
//! producers submit boxed work items from any task, and a single
//! [`DispatchQueue`] drains them in order on the consumer's task.
//!
//! Submission never blocks and never fails the producer: if no consumer is
//! registered the work item is dropped and counted. A panicking work item
//! is contained and logged; it never tears down the queue.

use std::panic::AssertUnwindSafe;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::infrastructure::metrics;

type WorkItem = Box<dyn FnOnce() + Send>;

// =============================================================================
// Bridge (producer side)
// =============================================================================

/// Shared hand-off point between stream tasks and the primary context.
#[derive(Default)]
pub struct DispatchBridge {
    tx: RwLock<Option<mpsc::UnboundedSender<WorkItem>>>,
}

impl DispatchBridge {
    /// Create a bridge with no consumer registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the consuming task and get its queue.
    ///
    /// Re-registering replaces the previous consumer; work items already
    /// queued on the old [`DispatchQueue`] stay with it.
    #[must_use]
    pub fn register(&self) -> DispatchQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.write() = Some(tx);
        DispatchQueue { rx }
    }

    /// Drop the consumer registration. Subsequent submissions are dropped.
    pub fn unregister(&self) {
        *self.tx.write() = None;
    }

    /// Submit a work item for execution on the consumer's task.
    ///
    /// Returns `false` if the item was dropped because no consumer is
    /// registered (or the consumer's queue is gone).
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> bool {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            drop(guard);
            metrics::record_dispatch_dropped(1);
            return false;
        };

        if tx.send(Box::new(work)).is_err() {
            // Consumer queue dropped without unregistering.
            drop(guard);
            metrics::record_dispatch_dropped(1);
            return false;
        }
        true
    }

    /// Whether a consumer is currently registered.
    #[must_use]
    pub fn has_consumer(&self) -> bool {
        self.tx.read().is_some()
    }
}

// =============================================================================
// Queue (consumer side)
// =============================================================================

/// The consuming end of a [`DispatchBridge`].
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<WorkItem>,
}

impl DispatchQueue {
    /// Drain work items until the bridge is unregistered (or replaced) and
    /// all in-flight items are processed.
    ///
    /// Items from a single producer run in submission order. A panic inside
    /// a work item is caught and logged.
    pub async fn run(mut self) {
        while let Some(work) = self.rx.recv().await {
            Self::execute(work);
        }
    }

    /// Process at most one pending work item without waiting.
    ///
    /// Returns `false` if the queue was empty.
    pub fn run_one(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(work) => {
                Self::execute(work);
                true
            }
            Err(_) => false,
        }
    }

    fn execute(work: WorkItem) {
        if std::panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
            tracing::error!("dispatched work item panicked");
        }
    }
}
