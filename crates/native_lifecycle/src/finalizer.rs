//! Deferred release of unreachable resources
//!
//! When the last `Resource` wrapper for a record is dropped, the drop may run
//! on any thread and in any context, including while another part of the
//! runtime is mid-operation. Running native teardown there is unsafe, so the
//! drop only appends the record to this queue. The owner thread drains the
//! queue at a safe point (once per frame, or before creating new resources)
//! and destroys whatever is still live.
//!
//! ## Usage
//!
//! ```ignore
//! // From any thread: the wrapper's drop does this
//! queue.schedule_release(record);
//!
//! // On the owner thread, once per frame
//! let report = queue.drain(&controller);
//! ```

use crate::lifecycle::LifecycleController;
use crate::registry::ResourceRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default backlog size above which a drain logs a warning
pub const DEFAULT_PENDING_WARN_THRESHOLD: usize = 1024;

/// Outcome of one [`FinalizationQueue::drain`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records this drain destroyed
    pub released: usize,
    /// Records that were already destroyed when their turn came
    pub skipped: usize,
}

impl DrainReport {
    /// Total number of queue entries processed
    pub const fn processed(&self) -> usize {
        self.released + self.skipped
    }
}

/// Thread-safe queue of records awaiting release
pub struct FinalizationQueue {
    /// Records pending release, in scheduling order
    queue: Mutex<VecDeque<Arc<ResourceRecord>>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicUsize,

    warn_threshold: usize,
}

impl Default for FinalizationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizationQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::with_warn_threshold(DEFAULT_PENDING_WARN_THRESHOLD)
    }

    /// Create an empty queue that warns when a drain finds more than
    /// `warn_threshold` entries
    pub fn with_warn_threshold(warn_threshold: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicUsize::new(0),
            warn_threshold,
        }
    }

    /// Queue `record` for release at the next drain
    ///
    /// Callable from any thread. Never touches the registry or the native
    /// library.
    pub fn schedule_release(&self, record: Arc<ResourceRecord>) {
        record.note_scheduled();
        let mut queue = self.queue.lock();
        queue.push_back(record);
        // Counted under the lock so a concurrent drain never subtracts first
        self.pending_count.fetch_add(1, Ordering::Release);
    }

    /// Check if there are pending releases
    ///
    /// This is a fast lock-free check.
    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    /// Number of pending releases
    #[inline]
    pub fn len(&self) -> usize {
        self.pending_count.load(Ordering::Acquire)
    }

    /// Check if the queue is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Destroy every queued record that is still live
    ///
    /// Must be called on the owner thread. Records already destroyed (for
    /// example explicitly, after they were scheduled) are skipped. Releases
    /// scheduled while this drain runs are left for the next one.
    pub fn drain(&self, controller: &LifecycleController) -> DrainReport {
        if !self.has_pending() {
            return DrainReport::default();
        }

        let batch: VecDeque<Arc<ResourceRecord>> = {
            let mut queue = self.queue.lock();
            let batch = std::mem::take(&mut *queue);
            self.pending_count.fetch_sub(batch.len(), Ordering::Release);
            batch
        };
        let count = batch.len();

        if count > self.warn_threshold {
            log::warn!("Draining {} deferred releases in one batch", count);
        }

        let mut report = DrainReport::default();
        for record in batch {
            record.note_drained();
            if controller.destroy(&record).was_live() {
                report.released += 1;
            } else {
                report.skipped += 1;
            }
        }

        log::trace!(
            "Drained finalization queue: {} released, {} skipped",
            report.released,
            report.skipped
        );
        report
    }
}

impl std::fmt::Debug for FinalizationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizationQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}
