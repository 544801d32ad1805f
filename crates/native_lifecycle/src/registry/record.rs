//! Per-handle lifecycle record
//!
//! A [`ResourceRecord`] is the bookkeeping the binding layer keeps for one
//! native allocation. Records are shared as `Arc<ResourceRecord>` between the
//! registry, the owner's child list, the finalization queue and the
//! application-facing `Resource` wrapper.

use crate::foundation::collections::RecordId;
use crate::handle::{Handle, ResourceKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const LIVE: u8 = 0;
const DESTROYED: u8 = 1;

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// The native object exists and may be used
    Live,
    /// The native object has been released; terminal
    Destroyed,
}

#[derive(Default)]
struct Links {
    owner: Option<Weak<ResourceRecord>>,
    children: Vec<Arc<ResourceRecord>>,
}

/// Managed state wrapped around one native handle
pub struct ResourceRecord {
    id: RecordId,
    serial: u64,
    handle: Handle,
    state: AtomicU8,
    released: AtomicBool,
    pending_finalizations: AtomicU32,
    links: Mutex<Links>,
    debug_tag: Mutex<String>,
    alloc_site: &'static Location<'static>,
}

impl ResourceRecord {
    pub(crate) fn new(
        id: RecordId,
        serial: u64,
        handle: Handle,
        alloc_site: &'static Location<'static>,
    ) -> Self {
        Self {
            id,
            serial,
            handle,
            state: AtomicU8::new(LIVE),
            released: AtomicBool::new(false),
            pending_finalizations: AtomicU32::new(0),
            links: Mutex::new(Links::default()),
            debug_tag: Mutex::new(format!(
                "{} allocated at {}:{}",
                handle.kind,
                alloc_site.file(),
                alloc_site.line()
            )),
            alloc_site,
        }
    }

    /// Registry key of this record
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Registration order; larger serials were registered later
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The wrapped native handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Kind of the wrapped native object
    pub fn kind(&self) -> ResourceKind {
        self.handle.kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            LIVE => LifecycleState::Live,
            _ => LifecycleState::Destroyed,
        }
    }

    /// Whether the record has been destroyed
    ///
    /// Once this returns `true` it returns `true` forever.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.state.load(Ordering::Acquire) != LIVE
    }

    /// Owning record, if it is still alive in memory
    pub fn owner(&self) -> Option<Arc<Self>> {
        self.links.lock().owner.as_ref().and_then(Weak::upgrade)
    }

    /// Snapshot of the current children, in attach order
    pub fn children(&self) -> Vec<Arc<Self>> {
        self.links.lock().children.clone()
    }

    /// Number of attached children
    pub fn child_count(&self) -> usize {
        self.links.lock().children.len()
    }

    /// Free-form diagnostic text
    pub fn debug_tag(&self) -> String {
        self.debug_tag.lock().clone()
    }

    /// Replace the diagnostic text
    pub fn set_debug_tag(&self, tag: impl Into<String>) {
        *self.debug_tag.lock() = tag.into();
    }

    /// Source location of the call that created this record
    pub fn alloc_site(&self) -> &'static Location<'static> {
        self.alloc_site
    }

    /// Number of release requests queued but not yet drained
    pub fn pending_finalizations(&self) -> u32 {
        self.pending_finalizations.load(Ordering::Acquire)
    }

    /// Claim the single Live→Destroyed transition
    ///
    /// Returns `true` for exactly one caller over the record's lifetime.
    pub(crate) fn claim_destroy(&self) -> bool {
        self.state
            .compare_exchange(LIVE, DESTROYED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the native handle as released
    ///
    /// Returns `false` if it had already been released.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn note_scheduled(&self) {
        self.pending_finalizations.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_drained(&self) {
        let _ = self
            .pending_finalizations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Run `f` with the links locked
    ///
    /// Only one record's links are ever locked at a time by this crate; `f`
    /// must not lock another record.
    fn with_links<R>(&self, f: impl FnOnce(&mut Links) -> R) -> R {
        f(&mut self.links.lock())
    }

    /// Append `child` if this record is still live
    ///
    /// The liveness check and the append happen under the same lock that
    /// destruction takes to collect children, so a child is either rejected
    /// or collected by the cascade.
    pub(crate) fn push_child(&self, child: Arc<Self>) -> bool {
        self.with_links(|links| {
            if self.is_destroyed() {
                return false;
            }
            links.children.push(child);
            true
        })
    }

    /// Remove `child` from the child list; no-op if absent
    pub(crate) fn remove_child(&self, child: RecordId) -> bool {
        self.with_links(|links| {
            let before = links.children.len();
            links.children.retain(|c| c.id != child);
            before != links.children.len()
        })
    }

    /// Take every child, leaving the list empty
    pub(crate) fn take_children(&self) -> Vec<Arc<Self>> {
        self.with_links(|links| std::mem::take(&mut links.children))
    }

    pub(crate) fn set_owner(&self, owner: Option<&Arc<Self>>) {
        self.with_links(|links| links.owner = owner.map(Arc::downgrade));
    }

    pub(crate) fn take_owner(&self) -> Option<Arc<Self>> {
        self.with_links(|links| links.owner.take()).and_then(|weak| weak.upgrade())
    }
}

impl std::fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("children", &self.child_count())
            .finish_non_exhaustive()
    }
}
