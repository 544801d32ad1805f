//! Lifecycle runtime
//!
//! [`Runtime`] ties the registry, the lifecycle controller, the finalization
//! queue, the subsystem table and the pin table to one native backend. Binding
//! code creates every native object through [`Runtime::create_resource`] and
//! calls [`Runtime::drain`] at its safe point (once per frame is typical).
//!
//! One runtime can be installed as the process-wide instance with
//! [`Runtime::install_global`]. Statics are never dropped, so a global
//! runtime must be shut down explicitly with [`Runtime::shutdown`].

use crate::backend::NativeBackend;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, LifecycleResult, NativeError};
use crate::finalizer::{DrainReport, FinalizationQueue};
use crate::handle::{Handle, NativeId, ResourceKind};
use crate::lifecycle::{DestroyOutcome, LifecycleController};
use crate::ownership;
use crate::pins::{PinSlot, PinTable};
use crate::registry::{ResourceRecord, ResourceRegistry};
use crate::report::{DebugInfo, LeakReport};
use crate::resource::Resource;
use crate::subsystem::{InitFlags, SubsystemInitRegistry};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

static GLOBAL: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Process-level state of the native library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryState {
    /// No subsystem has been initialized through this runtime yet
    NotInitialized,
    /// At least one `init` call succeeded
    Initialized,
    /// `shutdown` ran; terminal
    Finalized,
}

impl LibraryState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::NotInitialized => 0,
            Self::Initialized => 1,
            Self::Finalized => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotInitialized,
            1 => Self::Initialized,
            _ => Self::Finalized,
        }
    }
}

/// Owner of all lifecycle state for one native library instance
pub struct Runtime {
    backend: Arc<dyn NativeBackend>,
    registry: Arc<ResourceRegistry>,
    subsystems: Arc<SubsystemInitRegistry>,
    controller: LifecycleController,
    finalizer: Arc<FinalizationQueue>,
    pins: PinTable,
    state: AtomicU8,
    config: LifecycleConfig,
}

impl Runtime {
    /// Create a runtime over `backend`
    pub fn new(backend: Arc<dyn NativeBackend>, config: LifecycleConfig) -> Self {
        let registry = Arc::new(ResourceRegistry::new());
        let subsystems = Arc::new(SubsystemInitRegistry::new(Arc::clone(&backend)));
        let controller = LifecycleController::new(
            Arc::clone(&backend),
            Arc::clone(&registry),
            Arc::clone(&subsystems),
        );
        let finalizer = Arc::new(FinalizationQueue::with_warn_threshold(
            config.pending_warn_threshold,
        ));

        log::info!("Creating lifecycle runtime");
        log::debug!("Lifecycle config: {:?}", config);

        Self {
            backend,
            registry,
            subsystems,
            controller,
            finalizer,
            pins: PinTable::new(),
            state: AtomicU8::new(LibraryState::NotInitialized.to_u8()),
            config,
        }
    }

    /// Install `runtime` as the process-wide instance
    ///
    /// # Errors
    /// Returns the rejected runtime if one is already installed.
    pub fn install_global(runtime: Self) -> Result<&'static Arc<Self>, Arc<Self>> {
        let installed = GLOBAL
            .try_insert(Arc::new(runtime))
            .map_err(|(_, rejected)| rejected)?;
        log::info!("Installed global lifecycle runtime");
        Ok(installed)
    }

    /// The process-wide instance, if one was installed
    pub fn global() -> Option<&'static Arc<Self>> {
        GLOBAL.get()
    }

    /// Current library state
    pub fn state(&self) -> LibraryState {
        LibraryState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Active configuration
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// The record table
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// The subsystem reference counts
    pub fn subsystems(&self) -> &SubsystemInitRegistry {
        &self.subsystems
    }

    /// Number of releases waiting for the next drain
    pub fn pending_releases(&self) -> usize {
        self.finalizer.len()
    }

    /// Acquire `flags` and their implied subsystems
    ///
    /// # Errors
    /// - [`LifecycleError::LibraryFinalized`] after shutdown
    /// - [`LifecycleError::Initialization`] if a native init fails; nothing
    ///   acquired by this call stays acquired
    pub fn init(&self, flags: impl Into<InitFlags>) -> LifecycleResult<()> {
        if self.state() == LibraryState::Finalized {
            return Err(LifecycleError::LibraryFinalized);
        }

        let acquired = self.subsystems.acquire_all(flags.into())?;
        if self
            .state
            .compare_exchange(
                LibraryState::NotInitialized.to_u8(),
                LibraryState::Initialized.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            log::info!("Native library initialized");
        }
        log::debug!("Acquired subsystems {:?}", acquired);
        Ok(())
    }

    /// Release what a matching [`Runtime::init`] acquired
    ///
    /// Does nothing after shutdown, which already tore every subsystem down.
    ///
    /// # Panics
    /// Panics if any member of `flags` is not currently acquired.
    pub fn quit(&self, flags: impl Into<InitFlags>) {
        if self.state() == LibraryState::Finalized {
            log::debug!("Ignoring subsystem quit after shutdown");
            return;
        }
        self.subsystems.release_all(flags.into());
    }

    /// Run `body` with `flags` acquired, releasing them on every exit path
    ///
    /// # Errors
    /// [`LifecycleError::Initialization`] if acquisition fails; `body` is not
    /// run.
    pub fn with_subsystem<R>(
        &self,
        flags: impl Into<InitFlags>,
        body: impl FnOnce(&Self) -> R,
    ) -> LifecycleResult<R> {
        let _guard = self.subsystems.scoped(flags)?;
        Ok(body(self))
    }

    /// Create a managed resource
    ///
    /// `construct` performs the native allocation and returns the new
    /// object's id. The owner is validated before `construct` runs, so a
    /// rejected owner never allocates. The caller's location is recorded as
    /// the allocation site.
    ///
    /// # Errors
    /// - [`LifecycleError::LibraryFinalized`] after shutdown
    /// - [`LifecycleError::SubsystemNotInitialized`] if the kind's subsystem
    ///   is down and `enforce_subsystems` is set
    /// - [`LifecycleError::InvalidOwner`] if `owner` cannot own `kind`
    /// - [`LifecycleError::UseAfterFree`] if `owner` is destroyed
    /// - [`LifecycleError::Allocation`] if `construct` fails or returns null
    /// - [`LifecycleError::HandleInUse`] if the id is already wrapped
    #[track_caller]
    pub fn create_resource<F>(
        &self,
        kind: ResourceKind,
        owner: Option<&Resource>,
        construct: F,
    ) -> LifecycleResult<Resource>
    where
        F: FnOnce() -> Result<NativeId, NativeError>,
    {
        if self.state() == LibraryState::Finalized {
            return Err(LifecycleError::LibraryFinalized);
        }
        if self.config.drain_on_create {
            self.drain();
        }
        if self.config.enforce_subsystems {
            if let Some(subsystem) = kind.subsystem() {
                if !self.subsystems.is_initialized(subsystem) {
                    return Err(LifecycleError::SubsystemNotInitialized { kind, subsystem });
                }
            }
        }

        let owner = match owner {
            Some(owner) => {
                LifecycleController::ensure_live(owner.record())?;
                ownership::validate_owner(owner.record(), kind)?;
                Some(owner.record())
            }
            None => None,
        };

        let native_id = construct().map_err(|source| LifecycleError::Allocation { kind, source })?;
        let handle = Handle::new(kind, native_id);

        let record = match self.registry.register(handle, owner) {
            Ok(record) => record,
            Err(err) => {
                // The owner died between validation and attach; the new
                // object belongs to nobody
                if matches!(err, LifecycleError::InvalidOwner { .. }) {
                    self.release_orphan(handle);
                }
                return Err(err);
            }
        };

        log::debug!("Created {}", handle);
        Ok(Resource::new(record, Arc::clone(&self.finalizer)))
    }

    /// Destroy `resource` and everything it owns
    ///
    /// Idempotent: a second call reports [`DestroyOutcome::AlreadyDestroyed`].
    pub fn destroy(&self, resource: &Resource) -> DestroyOutcome {
        self.controller.destroy(resource.record())
    }

    /// Destroy a record obtained from [`Runtime::lookup`]
    pub fn destroy_record(&self, record: &Arc<ResourceRecord>) -> DestroyOutcome {
        self.controller.destroy(record)
    }

    /// Whether `resource` has been destroyed
    pub fn is_destroyed(&self, resource: &Resource) -> bool {
        LifecycleController::is_destroyed(resource.record())
    }

    /// Snapshot of `resource` for diagnostics
    pub fn debug_info(&self, resource: &Resource) -> DebugInfo {
        DebugInfo::of(resource.record())
    }

    /// Live record wrapping `handle`
    pub fn lookup(&self, handle: Handle) -> Option<Arc<ResourceRecord>> {
        self.registry.lookup(handle)
    }

    /// Move `child` under `new_parent`
    ///
    /// # Errors
    /// See [`ownership::reparent`].
    pub fn reparent(&self, child: &Resource, new_parent: &Resource) -> LifecycleResult<()> {
        ownership::reparent(child.record(), new_parent.record())
    }

    /// Release every resource whose last wrapper was dropped
    ///
    /// Call on the owner thread at a safe point.
    pub fn drain(&self) -> DrainReport {
        self.finalizer.drain(&self.controller)
    }

    /// Keep `resource` alive while the native library uses it from `slot`
    ///
    /// Returns the previous occupant of the slot.
    ///
    /// # Errors
    /// [`LifecycleError::UseAfterFree`] if `resource` is destroyed.
    pub fn pin(&self, slot: PinSlot, resource: &Resource) -> LifecycleResult<Option<Resource>> {
        resource.handle()?;
        Ok(self.pins.pin(slot, resource.clone()))
    }

    /// Stop keeping the occupant of `slot` alive
    pub fn unpin(&self, slot: PinSlot) -> Option<Resource> {
        self.pins.unpin(slot)
    }

    /// Current occupant of `slot`
    pub fn pinned(&self, slot: PinSlot) -> Option<Resource> {
        self.pins.pinned(slot)
    }

    /// Every record that is still live
    pub fn leak_report(&self) -> LeakReport {
        LeakReport::from_records(&self.registry.enumerate_live())
    }

    /// Destroy everything and tear the native library down
    ///
    /// Unpins every slot, drains pending releases, reports what is still
    /// live, destroys the remaining roots (newest first) and force-quits
    /// every subsystem. Idempotent; after the first call the runtime refuses
    /// to create resources.
    pub fn shutdown(&self) {
        let previous = self.state.swap(LibraryState::Finalized.to_u8(), Ordering::AcqRel);
        if LibraryState::from_u8(previous) == LibraryState::Finalized {
            return;
        }
        log::info!("Shutting down lifecycle runtime");

        self.pins.clear();
        self.drain();

        if self.config.report_leaks_on_shutdown {
            self.report_leaks();
        }

        let mut destroyed = 0;
        for record in self.registry.enumerate_live().iter().rev() {
            if record.owner().is_none() && self.controller.destroy(record).was_live() {
                destroyed += 1;
            }
        }
        // Anything whose owner record is gone from memory
        for record in self.registry.enumerate_live().iter().rev() {
            if self.controller.destroy(record).was_live() {
                destroyed += 1;
            }
        }
        self.drain();

        let quit = self.subsystems.quit_all();
        log::info!(
            "Lifecycle runtime shut down ({} resource(s) destroyed, {} subsystem(s) quit)",
            destroyed,
            quit.len()
        );
    }

    fn report_leaks(&self) {
        let report = self.leak_report();
        if report.is_empty() {
            return;
        }

        log::warn!("{} resource(s) still live at shutdown", report.len());
        report.log();

        if let Some(path) = &self.config.leak_report_path {
            if let Err(err) = report.write_to(path) {
                log::warn!("Failed to write leak report to {}: {}", path.display(), err);
            }
        }
    }

    fn release_orphan(&self, handle: Handle) {
        log::debug!("Releasing unregistered {}", handle);
        if let Err(err) = self.backend.release(handle) {
            log::warn!("Native release of {} failed: {}", handle, err);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("subsystems", &self.subsystems)
            .field("finalizer", &self.finalizer)
            .field("pins", &self.pins)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::subsystem::Subsystem;

    fn runtime(config: LifecycleConfig) -> (Arc<RecordingBackend>, Runtime) {
        crate::foundation::logging::init_for_tests();
        let backend = Arc::new(RecordingBackend::new());
        let runtime = Runtime::new(backend.clone(), config);
        (backend, runtime)
    }

    #[test]
    fn test_library_state_transitions() {
        let (_backend, rt) = runtime(LifecycleConfig::default());
        assert_eq!(rt.state(), LibraryState::NotInitialized);

        rt.init(Subsystem::Video).unwrap();
        assert_eq!(rt.state(), LibraryState::Initialized);

        rt.shutdown();
        assert_eq!(rt.state(), LibraryState::Finalized);
        assert!(matches!(rt.init(Subsystem::Video), Err(LifecycleError::LibraryFinalized)));
        assert!(matches!(
            rt.create_resource(ResourceKind::Surface, None, || Ok(NativeId(1))),
            Err(LifecycleError::LibraryFinalized)
        ));
    }

    #[test]
    fn test_enforced_subsystem_gate() {
        let (_backend, rt) = runtime(LifecycleConfig::default());
        let err = rt
            .create_resource(ResourceKind::Window, None, || Ok(NativeId(1)))
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::SubsystemNotInitialized { subsystem: Subsystem::Video, .. }
        ));

        // Surfaces need no subsystem
        assert!(rt
            .create_resource(ResourceKind::Surface, None, || Ok(NativeId(2)))
            .is_ok());
    }

    #[test]
    fn test_constructor_failure_creates_nothing() {
        let (backend, rt) = runtime(LifecycleConfig {
            enforce_subsystems: false,
            ..LifecycleConfig::default()
        });

        let err = rt
            .create_resource(ResourceKind::Font, None, || {
                Err(NativeError::new("TTF_OpenFont", "Couldn't open font.ttf"))
            })
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Allocation { kind: ResourceKind::Font, .. }));
        assert!(rt.registry().is_empty());

        let err = rt
            .create_resource(ResourceKind::Font, None, || Ok(NativeId::NULL))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Allocation { .. }));
        assert!(backend.released().is_empty());
    }

    #[test]
    fn test_rejected_owner_never_constructs() {
        let (_backend, rt) = runtime(LifecycleConfig::default());
        rt.init(Subsystem::Video).unwrap();
        let window = rt
            .create_resource(ResourceKind::Window, None, || Ok(NativeId(1)))
            .unwrap();

        let mut constructed = false;
        let err = rt
            .create_resource(ResourceKind::Texture, Some(&window), || {
                constructed = true;
                Ok(NativeId(2))
            })
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidOwner { .. }));
        assert!(!constructed);

        rt.destroy(&window);
        let err = rt
            .create_resource(ResourceKind::Renderer, Some(&window), || Ok(NativeId(3)))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UseAfterFree { .. }));
    }

    #[test]
    fn test_with_subsystem_releases_on_exit() {
        let (backend, rt) = runtime(LifecycleConfig::default());

        let live = rt
            .with_subsystem(Subsystem::GameController, |rt| {
                rt.subsystems().is_initialized(Subsystem::Joystick)
            })
            .unwrap();
        assert!(live);
        assert!(!rt.subsystems().is_initialized(Subsystem::GameController));
        assert_eq!(backend.quit_count(Subsystem::Events), 1);

        backend.fail_init(Subsystem::Audio);
        let mut ran = false;
        assert!(rt.with_subsystem(Subsystem::Mixer, |_| ran = true).is_err());
        assert!(!ran);
    }

    #[test]
    fn test_with_subsystem_releases_on_unwind() {
        let (_backend, rt) = runtime(LifecycleConfig::default());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.with_subsystem(Subsystem::Video, |_| panic!("body failed"))
        }));
        assert!(result.is_err());
        assert_eq!(rt.subsystems().count(Subsystem::Video), 0);
    }

    #[test]
    fn test_shutdown_inside_scoped_subsystem() {
        let (backend, rt) = runtime(LifecycleConfig::default());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.with_subsystem(Subsystem::Video, Runtime::shutdown)
        }));
        assert!(result.is_ok());
        assert_eq!(rt.state(), LibraryState::Finalized);
        assert_eq!(backend.quit_count(Subsystem::Video), 1);
        assert_eq!(backend.quit_count(Subsystem::Events), 1);
    }

    #[test]
    fn test_balanced_quit_after_shutdown_is_ignored() {
        let (backend, rt) = runtime(LifecycleConfig::default());
        rt.init(Subsystem::GameController).unwrap();

        rt.shutdown();
        rt.quit(Subsystem::GameController);

        assert_eq!(backend.quit_count(Subsystem::GameController), 1);
        assert_eq!(backend.quit_count(Subsystem::Joystick), 1);
    }

    #[test]
    fn test_shutdown_writes_leak_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaks.ron");
        let (backend, rt) = runtime(LifecycleConfig {
            leak_report_path: Some(path.clone()),
            ..LifecycleConfig::default()
        });
        rt.init(Subsystem::Video).unwrap();

        let window = rt
            .create_resource(ResourceKind::Window, None, || Ok(NativeId(1)))
            .unwrap();
        window.set_debug_tag("forgotten window");
        let surface = rt
            .create_resource(ResourceKind::Surface, None, || Ok(NativeId(2)))
            .unwrap();
        drop(surface);

        rt.shutdown();
        rt.shutdown();

        let report: LeakReport = ron::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report.entries[0].debug_tag, "forgotten window");
        assert!(window.is_destroyed());
        assert_eq!(backend.release_count(Handle::new(ResourceKind::Window, NativeId(1))), 1);
        assert_eq!(backend.quit_count(Subsystem::Video), 1);
    }
}
