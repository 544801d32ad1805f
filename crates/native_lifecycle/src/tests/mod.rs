//! End-to-end lifecycle scenarios driven through [`Runtime`]

use crate::backend::RecordingBackend;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, OwnerRejection};
use crate::handle::{Handle, NativeId, ResourceKind};
use crate::lifecycle::DestroyOutcome;
use crate::pins::PinSlot;
use crate::registry::LifecycleState;
use crate::resource::Resource;
use crate::runtime::Runtime;
use crate::subsystem::{InitFlags, Subsystem};
use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;


struct Harness {
    backend: Arc<RecordingBackend>,
    runtime: Runtime,
    next_id: AtomicU64,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    fn with_config(config: LifecycleConfig) -> Self {
        crate::foundation::logging::init_for_tests();
        let backend = Arc::new(RecordingBackend::new());
        let runtime = Runtime::new(backend.clone(), config);
        runtime
            .init(InitFlags::VIDEO | InitFlags::MIXER | InitFlags::FONT | InitFlags::GAMECONTROLLER)
            .unwrap();
        Self {
            backend,
            runtime,
            next_id: AtomicU64::new(0x1000),
        }
    }

    #[track_caller]
    fn create(&self, kind: ResourceKind, owner: Option<&Resource>) -> Resource {
        let id = NativeId(self.next_id.fetch_add(0x10, Ordering::Relaxed));
        self.runtime.create_resource(kind, owner, || Ok(id)).unwrap()
    }

    fn released(&self, resource: &Resource) -> usize {
        self.backend.release_count(resource.record().handle())
    }
}

#[test]
fn test_is_destroyed_is_monotonic() {
    let h = Harness::new();
    let font = h.create(ResourceKind::Font, None);

    assert!(!h.runtime.is_destroyed(&font));
    assert!(!h.runtime.is_destroyed(&font));
    h.runtime.destroy(&font);
    for _ in 0..3 {
        assert!(h.runtime.is_destroyed(&font));
        h.runtime.drain();
    }
}

#[test]
fn test_second_destroy_is_noop() {
    let h = Harness::new();
    let music = h.create(ResourceKind::Music, None);

    assert_eq!(h.runtime.destroy(&music), DestroyOutcome::Released);
    assert_eq!(h.runtime.destroy(&music), DestroyOutcome::AlreadyDestroyed);
    assert_eq!(h.released(&music), 1);
}

#[test]
fn test_window_renderer_texture_cascade() {
    let h = Harness::new();
    let window = h.create(ResourceKind::Window, None);
    let renderer = h.create(ResourceKind::Renderer, Some(&window));
    let texture = h.create(ResourceKind::Texture, Some(&renderer));

    h.runtime.destroy(&window);

    assert!(h.runtime.is_destroyed(&texture));
    assert!(h.runtime.is_destroyed(&renderer));
    assert!(h.runtime.is_destroyed(&window));
    let live = h.runtime.registry().enumerate_live();
    for resource in [&window, &renderer, &texture] {
        assert!(!live.iter().any(|record| Arc::ptr_eq(record, resource.record())));
    }
    assert_eq!(
        h.backend.released(),
        vec![
            texture.record().handle(),
            renderer.record().handle(),
            window.record().handle()
        ]
    );
}

#[test]
fn test_cascade_reaches_every_child() {
    let h = Harness::new();
    let window = h.create(ResourceKind::Window, None);
    let renderer = h.create(ResourceKind::Renderer, Some(&window));
    let textures: Vec<_> = (0..5)
        .map(|_| h.create(ResourceKind::Texture, Some(&renderer)))
        .collect();
    let context = h.create(ResourceKind::GlContext, Some(&window));

    h.runtime.destroy(&window);

    assert!(textures.iter().all(Resource::is_destroyed));
    assert!(context.is_destroyed());
    assert!(h.runtime.registry().is_empty());
}

#[test]
fn test_unowned_surface_finalized_by_drain() {
    let h = Harness::new();
    let surface = h.create(ResourceKind::Surface, None);
    let record = Arc::clone(surface.record());

    drop(surface);
    assert_eq!(h.runtime.pending_releases(), 1);
    assert!(!record.is_destroyed());

    let report = h.runtime.drain();
    assert_eq!(report.released, 1);
    assert!(record.is_destroyed());
    assert_eq!(h.backend.release_count(record.handle()), 1);
}

#[test]
fn test_destroyed_surface_not_released_by_drain() {
    let h = Harness::new();
    let surface = h.create(ResourceKind::Surface, None);
    let record = Arc::clone(surface.record());

    h.runtime.destroy(&surface);
    assert_eq!(h.backend.release_count(record.handle()), 1);
    drop(surface);

    let report = h.runtime.drain();
    assert_eq!(report.processed(), 0);
    assert_eq!(h.backend.release_count(record.handle()), 1);
}

#[test]
fn test_schedule_then_destroy_then_drain() {
    let h = Harness::new();
    let chunk = h.create(ResourceKind::AudioChunk, None);
    let record = Arc::clone(chunk.record());

    drop(chunk);
    assert_eq!(h.runtime.pending_releases(), 1);
    h.runtime.destroy_record(&record);

    let report = h.runtime.drain();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.backend.release_count(record.handle()), 1);
}

#[test]
fn test_nested_acquire_inits_and_quits_once() {
    let h = Harness::new();
    let subsystems = h.runtime.subsystems();

    subsystems.acquire(Subsystem::Haptic).unwrap();
    subsystems.acquire(Subsystem::Haptic).unwrap();
    subsystems.release(Subsystem::Haptic);
    assert!(subsystems.is_initialized(Subsystem::Haptic));
    subsystems.release(Subsystem::Haptic);

    assert_eq!(subsystems.count(Subsystem::Haptic), 0);
    assert_eq!(h.backend.init_count(Subsystem::Haptic), 1);
    assert_eq!(h.backend.quit_count(Subsystem::Haptic), 1);
}

#[test]
fn test_child_of_destroyed_parent_rejected() {
    let h = Harness::new();
    let window = h.create(ResourceKind::Window, None);
    let renderer = h.create(ResourceKind::Renderer, Some(&window));
    h.runtime.destroy(&renderer);

    let err = h
        .runtime
        .create_resource(ResourceKind::Texture, Some(&renderer), || Ok(NativeId(0xdead)))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UseAfterFree { .. }));
    assert!(!window.is_destroyed());
    assert_eq!(window.record().child_count(), 0);
}

#[test]
fn test_owner_destroyed_during_construction_releases_new_handle() {
    let h = Harness::new();
    let window = h.create(ResourceKind::Window, None);
    let orphan = Handle::new(ResourceKind::Renderer, NativeId(0xbeef));

    let err = h
        .runtime
        .create_resource(ResourceKind::Renderer, Some(&window), || {
            h.runtime.destroy(&window);
            Ok(orphan.native_id)
        })
        .unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::InvalidOwner { reason: OwnerRejection::OwnerDestroyed, .. }
    ));
    assert_eq!(h.backend.release_count(orphan), 1);
    assert_eq!(h.released(&window), 1);
    assert!(h.runtime.registry().is_empty());
    assert!(h.runtime.lookup(orphan).is_none());
}

#[test]
fn test_reparent_then_destroy_old_parent() {
    let h = Harness::new();
    let first = h.create(ResourceKind::Window, None);
    let second = h.create(ResourceKind::Window, None);
    let context = h.create(ResourceKind::GlContext, Some(&first));

    h.runtime.reparent(&context, &second).unwrap();
    h.runtime.destroy(&first);
    assert!(!context.is_destroyed());

    h.runtime.destroy(&second);
    assert!(context.is_destroyed());
    assert_eq!(h.released(&context), 1);
}

#[test]
fn test_reparent_to_wrong_kind_keeps_old_owner() {
    let h = Harness::new();
    let window = h.create(ResourceKind::Window, None);
    let renderer = h.create(ResourceKind::Renderer, Some(&window));
    let texture = h.create(ResourceKind::Texture, Some(&renderer));

    let err = h.runtime.reparent(&texture, &window).unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidOwner { .. }));
    assert!(Arc::ptr_eq(&texture.record().owner().unwrap(), renderer.record()));
}

#[test]
fn test_pinned_chunk_survives_until_unpinned() {
    let h = Harness::new();
    let chunk = h.create(ResourceKind::AudioChunk, None);
    let record = Arc::clone(chunk.record());

    h.runtime.pin(PinSlot::Channel(2), &chunk).unwrap();
    drop(chunk);
    h.runtime.drain();
    assert!(!record.is_destroyed());

    drop(h.runtime.unpin(PinSlot::Channel(2)));
    h.runtime.drain();
    assert!(record.is_destroyed());
    assert_eq!(h.backend.release_count(record.handle()), 1);
}

#[test]
fn test_pin_destroyed_resource_is_rejected() {
    let h = Harness::new();
    let music = h.create(ResourceKind::Music, None);
    h.runtime.destroy(&music);

    assert!(h.runtime.pin(PinSlot::Music, &music).is_err());
    assert!(h.runtime.pinned(PinSlot::Music).is_none());
}

#[test]
fn test_drop_on_other_thread_released_on_owner_thread() {
    let h = Harness::new();
    let surfaces: Vec<_> = (0..8).map(|_| h.create(ResourceKind::Surface, None)).collect();
    let handles: Vec<_> = surfaces.iter().map(|s| s.record().handle()).collect();

    std::thread::spawn(move || drop(surfaces)).join().unwrap();
    assert!(h.backend.released().is_empty());

    assert_eq!(h.runtime.drain().released, 8);
    for handle in handles {
        assert_eq!(h.backend.release_count(handle), 1);
    }
}

#[test]
fn test_create_drains_pending_releases() {
    let h = Harness::new();
    let old = h.create(ResourceKind::Surface, None);
    let record = Arc::clone(old.record());
    drop(old);

    let _new = h.create(ResourceKind::Surface, None);
    assert!(record.is_destroyed());
    assert_eq!(h.runtime.pending_releases(), 0);
}

#[test]
fn test_create_without_drain() {
    let h = Harness::with_config(LifecycleConfig {
        drain_on_create: false,
        ..LifecycleConfig::default()
    });
    let old = h.create(ResourceKind::Surface, None);
    drop(old);

    let _new = h.create(ResourceKind::Surface, None);
    assert_eq!(h.runtime.pending_releases(), 1);
}

#[test]
fn test_debug_info_tracks_state() {
    let h = Harness::new();
    let window = h.create(ResourceKind::Window, None);
    window.set_debug_tag("main");
    let renderer = h.create(ResourceKind::Renderer, Some(&window));

    let info = h.runtime.debug_info(&renderer);
    assert_eq!(info.owner_tag.as_deref(), Some("main"));
    assert_eq!(info.state, LifecycleState::Live);
    assert!(info.debug_tag.starts_with("Renderer allocated at "));
    assert!(info.alloc_site.contains("tests"));

    h.runtime.destroy(&window);
    let info = h.runtime.debug_info(&renderer);
    assert_eq!(info.state, LifecycleState::Destroyed);
    assert!(info.owner_tag.is_none());
}

#[test]
fn test_device_close_skipped_after_subsystem_quit() {
    let h = Harness::new();
    let controller = h.create(ResourceKind::Controller, None);

    h.runtime.quit(
        InitFlags::VIDEO | InitFlags::MIXER | InitFlags::FONT | InitFlags::GAMECONTROLLER,
    );
    assert!(!h.runtime.subsystems().is_initialized(Subsystem::GameController));

    drop(controller);
    h.runtime.drain();
    assert!(h.backend.released().is_empty());
    assert!(h.runtime.registry().is_empty());
}

#[test]
fn test_shutdown_destroys_in_reverse_creation_order() {
    let h = Harness::with_config(LifecycleConfig {
        report_leaks_on_shutdown: false,
        ..LifecycleConfig::default()
    });
    let font = h.create(ResourceKind::Font, None);
    let window = h.create(ResourceKind::Window, None);
    let renderer = h.create(ResourceKind::Renderer, Some(&window));
    let joystick = h.create(ResourceKind::Joystick, None);

    h.runtime.shutdown();

    assert_eq!(
        h.backend.released(),
        vec![
            joystick.record().handle(),
            renderer.record().handle(),
            window.record().handle(),
            font.record().handle()
        ]
    );
    assert!(h.runtime.subsystems().quit_all().is_empty());
    assert!(matches!(font.handle(), Err(LifecycleError::UseAfterFree { .. })));

    // Wrappers outliving the runtime's shutdown schedule nothing
    drop((font, window, renderer, joystick));
    assert_eq!(h.runtime.pending_releases(), 0);
}

#[test]
fn test_global_runtime_installs_once() {
    let first = Runtime::new(Arc::new(RecordingBackend::new()), LifecycleConfig::default());
    let installed = Runtime::install_global(first).unwrap();
    assert!(Arc::ptr_eq(installed, Runtime::global().unwrap()));

    let second = Runtime::new(Arc::new(RecordingBackend::new()), LifecycleConfig::default());
    assert!(Runtime::install_global(second).is_err());

    installed.shutdown();
}

proptest! {
    #[test]
    fn test_destroy_reports_match_native_releases(ops in proptest::collection::vec(any::<bool>(), 1..24)) {
        let h = Harness::new();
        let resources: Vec<_> = ops.iter().map(|_| h.create(ResourceKind::Font, None)).collect();

        let mut explicit = 0;
        for (resource, destroy_twice) in resources.iter().zip(&ops) {
            if h.runtime.destroy(resource).was_live() {
                explicit += 1;
            }
            if *destroy_twice {
                prop_assert_eq!(h.runtime.destroy(resource), DestroyOutcome::AlreadyDestroyed);
            }
        }

        prop_assert_eq!(explicit, resources.len());
        prop_assert_eq!(h.backend.released().len(), resources.len());
    }
}
