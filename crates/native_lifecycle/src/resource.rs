//! Application-facing wrapper around a resource record
//!
//! A [`Resource`] is what binding code hands out for every native object.
//! Clones share one record. Dropping the last clone does not release the
//! native object directly: it queues the record on the runtime's
//! finalization queue, and the next drain on the owner thread performs the
//! release.

use crate::error::LifecycleResult;
use crate::finalizer::FinalizationQueue;
use crate::foundation::collections::RecordId;
use crate::handle::{Handle, ResourceKind};
use crate::lifecycle::LifecycleController;
use crate::registry::ResourceRecord;
use std::sync::Arc;

struct ResourceInner {
    record: Arc<ResourceRecord>,
    finalizer: Arc<FinalizationQueue>,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        if !self.record.is_destroyed() {
            self.finalizer.schedule_release(Arc::clone(&self.record));
        }
    }
}

/// Reference-counted handle to one managed native object
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    pub(crate) fn new(record: Arc<ResourceRecord>, finalizer: Arc<FinalizationQueue>) -> Self {
        Self {
            inner: Arc::new(ResourceInner { record, finalizer }),
        }
    }

    /// The underlying record
    pub fn record(&self) -> &Arc<ResourceRecord> {
        &self.inner.record
    }

    /// Registry key of the underlying record
    pub fn id(&self) -> RecordId {
        self.inner.record.id()
    }

    /// Native handle, for passing to a native call
    ///
    /// # Errors
    /// [`crate::LifecycleError::UseAfterFree`] if the resource has been
    /// destroyed.
    pub fn handle(&self) -> LifecycleResult<Handle> {
        LifecycleController::ensure_live(&self.inner.record)
    }

    /// Native handle if the resource is still live
    pub fn live_handle(&self) -> Option<Handle> {
        self.handle().ok()
    }

    /// Kind of the wrapped object; available after destruction too
    pub fn kind(&self) -> ResourceKind {
        self.inner.record.kind()
    }

    /// Whether the resource has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.inner.record.is_destroyed()
    }

    /// Replace the diagnostic text shown in debug info and leak reports
    pub fn set_debug_tag(&self, tag: impl Into<String>) {
        self.inner.record.set_debug_tag(tag);
    }

    /// Whether two wrappers refer to the same record
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.record, &other.inner.record)
    }

    /// Number of live clones of this wrapper
    pub fn clone_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Resource").field(&self.inner.record).finish()
    }
}
