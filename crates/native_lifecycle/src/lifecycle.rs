//! Live → Destroyed state machine
//!
//! [`LifecycleController`] is the only code that moves a record out of the
//! Live state. Destruction is idempotent, cascades to dependents first, and
//! always ends with the record Destroyed and out of the registry, even when
//! the native release call reports an error.

use crate::backend::NativeBackend;
use crate::error::{LifecycleError, LifecycleResult};
use crate::handle::Handle;
use crate::ownership;
use crate::registry::{ResourceRecord, ResourceRegistry};
use crate::subsystem::SubsystemInitRegistry;
use std::sync::Arc;

/// Result of a destroy request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// This call destroyed the record
    Released,
    /// The record had already been destroyed; nothing was done
    AlreadyDestroyed,
}

impl DestroyOutcome {
    /// Whether this call performed the destruction
    pub const fn was_live(self) -> bool {
        matches!(self, Self::Released)
    }
}

/// Drives record destruction against the native backend
pub struct LifecycleController {
    backend: Arc<dyn NativeBackend>,
    registry: Arc<ResourceRegistry>,
    subsystems: Arc<SubsystemInitRegistry>,
}

impl LifecycleController {
    /// Create a controller over the given registry and subsystem table
    pub fn new(
        backend: Arc<dyn NativeBackend>,
        registry: Arc<ResourceRegistry>,
        subsystems: Arc<SubsystemInitRegistry>,
    ) -> Self {
        Self {
            backend,
            registry,
            subsystems,
        }
    }

    /// Destroy `record` and everything it owns
    ///
    /// If the record is Live: claims the transition, destroys every live
    /// child depth-first (most recently attached first), releases the native
    /// handle, detaches from the owner and unregisters. If it is already
    /// Destroyed the call does nothing and reports
    /// [`DestroyOutcome::AlreadyDestroyed`].
    pub fn destroy(&self, record: &Arc<ResourceRecord>) -> DestroyOutcome {
        if !record.claim_destroy() {
            return DestroyOutcome::AlreadyDestroyed;
        }

        let children = record.take_children();
        if !children.is_empty() {
            log::debug!(
                "Cascading destroy of {} into {} child(ren)",
                record.handle(),
                children.len()
            );
        }
        for child in children.iter().rev() {
            self.destroy(child);
        }

        self.release_native(record);

        if let Some(owner) = record.take_owner() {
            ownership::detach_child(&owner, record);
        }
        self.registry.unregister(record);

        log::debug!("Destroyed {}", record.handle());
        DestroyOutcome::Released
    }

    /// Whether `record` has been destroyed; never fails
    #[inline]
    pub fn is_destroyed(record: &ResourceRecord) -> bool {
        record.is_destroyed()
    }

    /// Gate for any operation that targets `record`
    ///
    /// # Errors
    /// [`LifecycleError::UseAfterFree`] if the record has been destroyed.
    pub fn ensure_live(record: &ResourceRecord) -> LifecycleResult<Handle> {
        if record.is_destroyed() {
            return Err(LifecycleError::UseAfterFree {
                handle: record.handle(),
            });
        }
        Ok(record.handle())
    }

    fn release_native(&self, record: &ResourceRecord) {
        let handle = record.handle();

        // A second release would pass a dangling pointer to the native library
        assert!(
            record.mark_released(),
            "double release of native handle {handle}"
        );

        if handle.kind.requires_active_library() {
            let active = handle
                .kind
                .subsystem()
                .map_or(true, |subsystem| self.subsystems.is_initialized(subsystem));
            if !active {
                log::debug!(
                    "Skipping native close of {} after its subsystem was torn down",
                    handle
                );
                return;
            }
        }

        if let Err(err) = self.backend.release(handle) {
            log::warn!("Native release of {} failed: {}", handle, err);
        }
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
