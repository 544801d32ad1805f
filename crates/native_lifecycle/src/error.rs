//! Error types for the lifecycle core

use crate::handle::{Handle, ResourceKind};
use crate::subsystem::Subsystem;
use thiserror::Error;

/// Failure reported by a native library call
///
/// Mirrors how the native layer reports errors: a negative status code, the
/// library's last error message and the name of the function that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (cfunc={function})")]
pub struct NativeError {
    /// Status code returned by the native call (negative on failure)
    pub code: i32,
    /// Name of the native function that failed
    pub function: &'static str,
    /// Message retrieved from the native library
    pub message: String,
}

impl NativeError {
    /// Create a native error with the conventional `-1` status code
    pub fn new(function: &'static str, message: impl Into<String>) -> Self {
        Self {
            code: -1,
            function,
            message: message.into(),
        }
    }

    /// Override the status code
    #[must_use]
    pub const fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }
}

/// Why an ownership edge was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerRejection {
    /// The prospective owner has already been destroyed
    OwnerDestroyed,
    /// The native library does not derive this kind from the owner's kind
    KindMismatch,
    /// The owner is the child itself or one of its descendants
    Cycle,
}

impl std::fmt::Display for OwnerRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::OwnerDestroyed => "owner is already destroyed",
            Self::KindMismatch => "owner kind cannot own this kind",
            Self::Cycle => "ownership would form a cycle",
        };
        f.write_str(text)
    }
}

/// Lifecycle errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The native constructor failed; no record was created
    #[error("Failed to allocate {kind}: {source}")]
    Allocation {
        /// Kind that was being allocated
        kind: ResourceKind,
        /// Native failure
        #[source]
        source: NativeError,
    },

    /// A child cannot be attached to the requested owner
    #[error("Invalid owner {parent} for {child_kind}: {reason}")]
    InvalidOwner {
        /// Rejected owner
        parent: Handle,
        /// Kind of the child being attached
        child_kind: ResourceKind,
        /// Why the edge was rejected
        reason: OwnerRejection,
    },

    /// An operation targeted a destroyed resource
    #[error("{} is already destroyed", .handle.kind)]
    UseAfterFree {
        /// Handle the destroyed record used to wrap
        handle: Handle,
    },

    /// A native subsystem failed to initialize
    #[error("Failed to initialize {subsystem} subsystem: {source}")]
    Initialization {
        /// Subsystem that failed
        subsystem: Subsystem,
        /// Native failure
        #[source]
        source: NativeError,
    },

    /// A live record already wraps this handle
    #[error("Handle {handle} is already registered")]
    HandleInUse {
        /// Duplicated handle
        handle: Handle,
    },

    /// The subsystem a kind depends on has not been initialized
    #[error("Cannot create {kind}: {subsystem} subsystem is not initialized")]
    SubsystemNotInitialized {
        /// Kind that was being created
        kind: ResourceKind,
        /// Missing subsystem
        subsystem: Subsystem,
    },

    /// The library has been shut down; no new resources can be created
    #[error("Native library has already been finalized")]
    LibraryFinalized,
}

/// Result alias for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;
