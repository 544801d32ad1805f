//! Ownership graph maintenance
//!
//! Ownership is a strict tree stored in the records themselves: each record
//! holds a weak link to its owner and strong links to its children. The
//! edges follow the native library's derivation rules (a renderer is created
//! from a window, a texture from a renderer), and the lifecycle controller
//! uses them to destroy dependents before the object they came from.

use crate::error::{LifecycleError, LifecycleResult, OwnerRejection};
use crate::handle::ResourceKind;
use crate::registry::ResourceRecord;
use std::sync::Arc;

/// Check that `owner` may own a new resource of `child_kind`
///
/// # Errors
/// [`LifecycleError::InvalidOwner`] if the owner is destroyed or its kind
/// cannot own `child_kind`.
pub fn validate_owner(owner: &ResourceRecord, child_kind: ResourceKind) -> LifecycleResult<()> {
    let reject = |reason| LifecycleError::InvalidOwner {
        parent: owner.handle(),
        child_kind,
        reason,
    };

    if owner.is_destroyed() {
        return Err(reject(OwnerRejection::OwnerDestroyed));
    }
    if !child_kind.accepts_owner(owner.kind()) {
        return Err(reject(OwnerRejection::KindMismatch));
    }
    Ok(())
}

/// Record that `child` must be destroyed no later than `parent`
///
/// A child has at most one owner: if it is currently attached elsewhere it
/// is detached from the old owner once the new edge is in place. Attaching
/// to the current owner again is a no-op.
///
/// # Errors
/// - [`LifecycleError::InvalidOwner`] if `parent` is destroyed, cannot own
///   the child's kind, or is the child itself or one of its descendants
/// - [`LifecycleError::UseAfterFree`] if `child` is destroyed
pub fn attach_child(parent: &Arc<ResourceRecord>, child: &Arc<ResourceRecord>) -> LifecycleResult<()> {
    validate_owner(parent, child.kind())?;
    if child.is_destroyed() {
        return Err(LifecycleError::UseAfterFree {
            handle: child.handle(),
        });
    }

    let previous = child.owner();
    if previous.as_ref().is_some_and(|owner| Arc::ptr_eq(owner, parent)) {
        return Ok(());
    }
    if is_ancestor_or_self(child, parent) {
        return Err(LifecycleError::InvalidOwner {
            parent: parent.handle(),
            child_kind: child.kind(),
            reason: OwnerRejection::Cycle,
        });
    }

    if !parent.push_child(Arc::clone(child)) {
        // Lost a race with the parent's destruction
        return Err(LifecycleError::InvalidOwner {
            parent: parent.handle(),
            child_kind: child.kind(),
            reason: OwnerRejection::OwnerDestroyed,
        });
    }
    child.set_owner(Some(parent));

    if let Some(previous) = previous {
        previous.remove_child(child.id());
    }
    Ok(())
}

/// Remove the edge between `parent` and `child`
///
/// Returns `false` if `child` was not attached to `parent`. Tolerates
/// either side having been destroyed.
pub fn detach_child(parent: &ResourceRecord, child: &ResourceRecord) -> bool {
    let removed = parent.remove_child(child.id());
    if child.owner().is_some_and(|owner| owner.id() == parent.id()) {
        child.set_owner(None);
    }
    removed
}

/// Move `child` under `new_parent`
///
/// Detaches from the old owner's child set and attaches to the new one.
///
/// # Errors
/// Same as [`attach_child`].
pub fn reparent(child: &Arc<ResourceRecord>, new_parent: &Arc<ResourceRecord>) -> LifecycleResult<()> {
    let old = child.owner().map(|owner| owner.handle());
    attach_child(new_parent, child)?;
    log::debug!(
        "Reparented {} from {:?} to {}",
        child.handle(),
        old,
        new_parent.handle()
    );
    Ok(())
}

/// Live records of the subtree rooted at `root`, in destroy order
///
/// Children come before their parent; siblings are ordered most recently
/// attached first. Returns an empty list if `root` is destroyed.
pub fn destroy_order(root: &Arc<ResourceRecord>) -> Vec<Arc<ResourceRecord>> {
    fn visit(record: &Arc<ResourceRecord>, out: &mut Vec<Arc<ResourceRecord>>) {
        if record.is_destroyed() {
            return;
        }
        for child in record.children().iter().rev() {
            visit(child, out);
        }
        out.push(Arc::clone(record));
    }

    let mut order = Vec::new();
    visit(root, &mut order);
    order
}

fn is_ancestor_or_self(candidate: &Arc<ResourceRecord>, of: &Arc<ResourceRecord>) -> bool {
    let mut current = Some(Arc::clone(of));
    while let Some(record) = current {
        if record.id() == candidate.id() {
            return true;
        }
        current = record.owner();
    }
    false
}
