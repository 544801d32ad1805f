//! Process-wide table of live resource records
//!
//! The registry is the only place that maps a native [`Handle`] back to its
//! [`ResourceRecord`]. It backs use-after-free validation, debug
//! introspection and leak detection. Records are stored in a slot map so
//! their keys stay unique for the life of the process.

pub mod record;

pub use record::{LifecycleState, ResourceRecord};

use crate::error::{LifecycleError, LifecycleResult, NativeError};
use crate::foundation::collections::{RecordId, RecordMap};
use crate::handle::Handle;
use crate::ownership;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;

struct RegistryInner {
    records: RecordMap<Arc<ResourceRecord>>,
    by_handle: HashMap<Handle, RecordId>,
    next_serial: u64,
}

/// Table of every live record
///
/// All operations take one short-lived lock and are safe to call from any
/// thread.
pub struct ResourceRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                records: RecordMap::with_key(),
                by_handle: HashMap::new(),
                next_serial: 0,
            }),
        }
    }

    /// Wrap a freshly allocated handle in a new record
    ///
    /// `handle` must come from a native constructor that succeeded; a null
    /// handle is reported as an allocation failure. When `owner` is given the
    /// new record is attached to it, and if the owner rejects the child the
    /// record is never left in the table.
    ///
    /// # Errors
    /// - [`LifecycleError::Allocation`] if `handle` is null
    /// - [`LifecycleError::HandleInUse`] if a live record already wraps `handle`
    /// - [`LifecycleError::InvalidOwner`] if `owner` cannot own this kind
    #[track_caller]
    pub fn register(
        &self,
        handle: Handle,
        owner: Option<&Arc<ResourceRecord>>,
    ) -> LifecycleResult<Arc<ResourceRecord>> {
        let site = Location::caller();

        if handle.is_null() {
            return Err(LifecycleError::Allocation {
                kind: handle.kind,
                source: NativeError::new("register", "native constructor returned a null handle"),
            });
        }
        if let Some(owner) = owner {
            ownership::validate_owner(owner, handle.kind)?;
        }

        let record = {
            let mut inner = self.inner.lock();
            if inner.by_handle.contains_key(&handle) {
                return Err(LifecycleError::HandleInUse { handle });
            }

            let serial = inner.next_serial;
            inner.next_serial += 1;
            let id = inner
                .records
                .insert_with_key(|id| Arc::new(ResourceRecord::new(id, serial, handle, site)));
            inner.by_handle.insert(handle, id);
            Arc::clone(&inner.records[id])
        };

        if let Some(owner) = owner {
            if let Err(err) = ownership::attach_child(owner, &record) {
                record.claim_destroy();
                self.unregister(&record);
                return Err(err);
            }
        }

        log::debug!("Registered {} as {:?}", handle, record.id());
        Ok(record)
    }

    /// Find the live record wrapping `handle`
    pub fn lookup(&self, handle: Handle) -> Option<Arc<ResourceRecord>> {
        let inner = self.inner.lock();
        let id = inner.by_handle.get(&handle)?;
        inner.records.get(*id).cloned()
    }

    /// Find a live record by key
    pub fn get(&self, id: RecordId) -> Option<Arc<ResourceRecord>> {
        self.inner.lock().records.get(id).cloned()
    }

    /// Whether `record` is still in the table
    pub fn contains(&self, record: &ResourceRecord) -> bool {
        self.inner.lock().records.contains_key(record.id())
    }

    /// Remove `record` from the table
    ///
    /// Idempotent: removing an absent record does nothing.
    pub fn unregister(&self, record: &ResourceRecord) {
        debug_assert!(
            record.is_destroyed(),
            "unregistering live record {}",
            record.handle()
        );

        let mut inner = self.inner.lock();
        if inner.records.remove(record.id()).is_some() {
            inner.by_handle.remove(&record.handle());
            log::trace!("Unregistered {} ({} live)", record.handle(), inner.records.len());
        }
    }

    /// Every live record, in registration order
    ///
    /// Registration order is stable but does not reflect destroy order.
    pub fn enumerate_live(&self) -> Vec<Arc<ResourceRecord>> {
        let mut live: Vec<_> = self.inner.lock().records.values().cloned().collect();
        live.sort_by_key(|record| record.serial());
        live
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether no records are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.len())
            .finish()
    }
}
