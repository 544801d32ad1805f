//! In-process backend that records every native call
//!
//! Stands in for the native library when no device is available. It keeps a
//! log of init/quit/release calls in order and can be told to fail specific
//! calls, which is how tests exercise the rollback and fail-safe paths.

use crate::backend::NativeBackend;
use crate::error::NativeError;
use crate::handle::Handle;
use crate::subsystem::Subsystem;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// One recorded native call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeCall {
    /// `init_subsystem` was invoked
    Init(Subsystem),
    /// `quit_subsystem` was invoked
    Quit(Subsystem),
    /// `release` was invoked
    Release(Handle),
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<NativeCall>,
    failing_inits: HashSet<Subsystem>,
    failing_releases: HashSet<Handle>,
}

/// Backend that logs calls instead of touching a native library
#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<RecordingState>,
}

impl RecordingBackend {
    /// Create a backend with an empty call log
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `init_subsystem(subsystem)` fail
    pub fn fail_init(&self, subsystem: Subsystem) {
        self.state.lock().failing_inits.insert(subsystem);
    }

    /// Let `init_subsystem(subsystem)` succeed again
    pub fn allow_init(&self, subsystem: Subsystem) {
        self.state.lock().failing_inits.remove(&subsystem);
    }

    /// Make the release of `handle` report an error
    pub fn fail_release(&self, handle: Handle) {
        self.state.lock().failing_releases.insert(handle);
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<NativeCall> {
        self.state.lock().calls.clone()
    }

    /// Handles released so far, in order
    pub fn released(&self) -> Vec<Handle> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                NativeCall::Release(handle) => Some(*handle),
                _ => None,
            })
            .collect()
    }

    /// Number of release calls made for `handle`
    pub fn release_count(&self, handle: Handle) -> usize {
        self.count(|call| *call == NativeCall::Release(handle))
    }

    /// Number of native init calls made for `subsystem`
    pub fn init_count(&self, subsystem: Subsystem) -> usize {
        self.count(|call| *call == NativeCall::Init(subsystem))
    }

    /// Number of native quit calls made for `subsystem`
    pub fn quit_count(&self, subsystem: Subsystem) -> usize {
        self.count(|call| *call == NativeCall::Quit(subsystem))
    }

    /// Release counts grouped by handle
    pub fn release_histogram(&self) -> HashMap<Handle, usize> {
        let mut histogram = HashMap::new();
        for handle in self.released() {
            *histogram.entry(handle).or_insert(0) += 1;
        }
        histogram
    }

    fn count(&self, predicate: impl Fn(&NativeCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| predicate(call)).count()
    }
}

impl NativeBackend for RecordingBackend {
    fn init_subsystem(&self, subsystem: Subsystem) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.calls.push(NativeCall::Init(subsystem));
        if state.failing_inits.contains(&subsystem) {
            return Err(NativeError::new(
                "SDL_InitSubSystem",
                format!("{subsystem} not available"),
            ));
        }
        Ok(())
    }

    fn quit_subsystem(&self, subsystem: Subsystem) {
        self.state.lock().calls.push(NativeCall::Quit(subsystem));
    }

    fn release(&self, handle: Handle) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.calls.push(NativeCall::Release(handle));
        if state.failing_releases.contains(&handle) {
            return Err(NativeError::new("release", format!("could not release {handle}")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingBackend")
            .field("calls", &self.state.lock().calls.len())
            .finish()
    }
}
