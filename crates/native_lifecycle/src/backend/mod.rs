//! Native library backend
//!
//! The lifecycle core never calls the native library directly. Everything it
//! needs (subsystem init/quit and releasing one handle) goes through the
//! [`NativeBackend`] trait, so a real FFI binding and the in-process
//! [`RecordingBackend`] used by tests are interchangeable.
//!
//! Allocation is not part of the trait: collaborators pass a constructor
//! closure to `Runtime::create_resource`, because every kind has its own
//! creation parameters.

pub mod recording;

pub use recording::RecordingBackend;

use crate::error::NativeError;
use crate::handle::Handle;
use crate::subsystem::Subsystem;

/// Operations the lifecycle core performs against the native library
///
/// # Thread Safety
/// The trait is `Send + Sync` because the runtime that owns it may be shared
/// across threads. The core itself only calls these methods from the owner
/// thread (explicit destroys, drains, init/quit), never from a wrapper drop.
pub trait NativeBackend: Send + Sync {
    /// Initialize one native subsystem
    ///
    /// Called only on the 0→1 transition of the subsystem's init count.
    fn init_subsystem(&self, subsystem: Subsystem) -> Result<(), NativeError>;

    /// Tear down one native subsystem
    ///
    /// Called only on the 1→0 transition. Native quit calls do not report
    /// errors.
    fn quit_subsystem(&self, subsystem: Subsystem);

    /// Release the native object behind `handle`
    ///
    /// Dispatches on `handle.kind` to the matching destroy/free/close call.
    /// Called at most once per handle; a returned error is logged and the
    /// record is still considered destroyed.
    fn release(&self, handle: Handle) -> Result<(), NativeError>;
}
