//! Resources held alive while the native library uses them
//!
//! Some native calls keep using an object after they return: a chunk keeps
//! playing on its mixer channel, the current music track keeps streaming,
//! and the current GL context stays bound. The application may drop its own
//! wrapper in the meantime, so the binding pins a clone in one of these
//! slots until the native side is done with it.

use crate::resource::Resource;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Place where the native library keeps using a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinSlot {
    /// Mixer channel a chunk is playing on
    Channel(i32),
    /// The music track currently playing
    Music,
    /// The GL context currently made current
    GlContext,
}

/// Slot → resource table keeping wrappers reachable
#[derive(Default)]
pub struct PinTable {
    slots: Mutex<HashMap<PinSlot, Resource>>,
}

impl PinTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `resource` alive in `slot`
    ///
    /// Returns the previous occupant. Dropping it may schedule its release.
    pub fn pin(&self, slot: PinSlot, resource: Resource) -> Option<Resource> {
        log::trace!("Pinning {:?} in {:?}", resource.kind(), slot);
        self.slots.lock().insert(slot, resource)
    }

    /// Stop keeping the occupant of `slot` alive
    pub fn unpin(&self, slot: PinSlot) -> Option<Resource> {
        self.slots.lock().remove(&slot)
    }

    /// Current occupant of `slot`
    pub fn pinned(&self, slot: PinSlot) -> Option<Resource> {
        self.slots.lock().get(&slot).cloned()
    }

    /// Unpin everything
    ///
    /// The wrappers are dropped after the lock is released, since a drop may
    /// schedule a release.
    pub fn clear(&self) -> usize {
        let drained: Vec<Resource> = self.slots.lock().drain().map(|(_, r)| r).collect();
        drained.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PinTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinTable").field("pinned", &self.len()).finish()
    }
}
