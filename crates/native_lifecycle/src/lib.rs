//! # Native Lifecycle
//!
//! Ownership and lifetime management for native multimedia handles
//! (windows, renderers, textures, surfaces, audio, fonts, input devices and
//! GL contexts) exposed through reference-counted wrappers.
//!
//! ## Features
//!
//! - **Exactly-once release**: every native handle is released at most once,
//!   whether it is destroyed explicitly, by cascade or after its last wrapper
//!   is dropped
//! - **Ownership cascade**: destroying a window destroys its renderer and the
//!   renderer's textures first
//! - **Deferred finalization**: wrapper drops from any thread only queue a
//!   release; the owner thread performs it at a safe point
//! - **Subsystem reference counts**: nested init/quit with implied
//!   dependencies and RAII guards
//! - **Diagnostics**: debug snapshots and RON leak reports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use native_lifecycle::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), LifecycleError> {
//!     let backend = Arc::new(RecordingBackend::new());
//!     let runtime = Runtime::new(backend, LifecycleConfig::default());
//!     runtime.init(InitFlags::VIDEO)?;
//!
//!     let window = runtime.create_resource(ResourceKind::Window, None, || Ok(NativeId(0x1000)))?;
//!     let renderer =
//!         runtime.create_resource(ResourceKind::Renderer, Some(&window), || Ok(NativeId(0x2000)))?;
//!
//!     runtime.destroy(&window);
//!     assert!(renderer.is_destroyed());
//!
//!     runtime.shutdown();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod foundation;
pub mod handle;
pub mod lifecycle;
pub mod ownership;
pub mod pins;
pub mod registry;
pub mod report;
pub mod resource;
pub mod runtime;
pub mod subsystem;

#[cfg(test)]
mod tests;

pub use config::{Config, ConfigError, LifecycleConfig};
pub use error::{LifecycleError, LifecycleResult, NativeError, OwnerRejection};
pub use handle::{Handle, NativeId, ResourceKind};
pub use lifecycle::DestroyOutcome;
pub use resource::Resource;
pub use runtime::{LibraryState, Runtime};

/// Common imports for binding code
pub mod prelude {
    pub use crate::{
        backend::{NativeBackend, RecordingBackend},
        config::{Config, LifecycleConfig},
        error::{LifecycleError, LifecycleResult, NativeError},
        finalizer::DrainReport,
        handle::{Handle, NativeId, ResourceKind},
        lifecycle::DestroyOutcome,
        pins::PinSlot,
        report::{DebugInfo, LeakReport},
        resource::Resource,
        runtime::{LibraryState, Runtime},
        subsystem::{InitFlags, Subsystem},
    };
}
