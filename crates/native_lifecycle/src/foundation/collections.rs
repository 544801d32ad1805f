//! Specialized collection types

pub use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Versioned key of a record in the registry
    ///
    /// A key is never reissued after its record is removed, so a stale key
    /// can never resolve to a newer record that reused the slot.
    pub struct RecordId;
}

/// Slot map keyed by [`RecordId`]
pub type RecordMap<T> = SlotMap<RecordId, T>;
