//! Reference-counted native subsystem initialization
//!
//! The native library's init/quit calls are reentrant per subsystem: each
//! successful init must be paired with one quit, and only the first init and
//! the last quit do real work. [`SubsystemInitRegistry`] keeps those counts so
//! independent parts of an application can acquire the same subsystem
//! without tearing it down under each other.

use crate::backend::NativeBackend;
use crate::error::{LifecycleError, LifecycleResult};
use bitflags::bitflags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Coarse-grained native feature area with its own init/quit lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsystem {
    /// Event queue
    Events,
    /// Timers
    Timer,
    /// Audio devices
    Audio,
    /// Windows and rendering
    Video,
    /// Joystick devices
    Joystick,
    /// Force feedback
    Haptic,
    /// Game controller mapping layer
    GameController,
    /// Image decoding library
    Image,
    /// Font rendering library
    Font,
    /// Audio mixer and its decoder format set
    Mixer,
}

impl Subsystem {
    /// Order in which subsystems are initialized when several are requested
    ///
    /// Every subsystem appears after the subsystems it implies, so quitting
    /// in reverse order never tears down a dependency first.
    pub const INIT_ORDER: [Self; 10] = [
        Self::Events,
        Self::Timer,
        Self::Audio,
        Self::Video,
        Self::Joystick,
        Self::Haptic,
        Self::GameController,
        Self::Image,
        Self::Font,
        Self::Mixer,
    ];

    /// The flag bit for this subsystem
    pub const fn flag(self) -> InitFlags {
        match self {
            Self::Events => InitFlags::EVENTS,
            Self::Timer => InitFlags::TIMER,
            Self::Audio => InitFlags::AUDIO,
            Self::Video => InitFlags::VIDEO,
            Self::Joystick => InitFlags::JOYSTICK,
            Self::Haptic => InitFlags::HAPTIC,
            Self::GameController => InitFlags::GAMECONTROLLER,
            Self::Image => InitFlags::IMAGE,
            Self::Font => InitFlags::FONT,
            Self::Mixer => InitFlags::MIXER,
        }
    }

    /// Subsystems the native library initializes implicitly with this one
    pub const fn implies(self) -> InitFlags {
        match self {
            Self::Video | Self::Joystick => InitFlags::EVENTS,
            Self::GameController => InitFlags::JOYSTICK,
            Self::Mixer => InitFlags::AUDIO,
            Self::Events
            | Self::Timer
            | Self::Audio
            | Self::Haptic
            | Self::Image
            | Self::Font => InitFlags::empty(),
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Events => "events",
            Self::Timer => "timer",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Joystick => "joystick",
            Self::Haptic => "haptic",
            Self::GameController => "game controller",
            Self::Image => "image",
            Self::Font => "font",
            Self::Mixer => "mixer",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Set of subsystems requested together
    ///
    /// The core bits use the native library's own init flag values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InitFlags: u32 {
        /// Timers
        const TIMER = 0x0000_0001;
        /// Audio devices
        const AUDIO = 0x0000_0010;
        /// Windows and rendering
        const VIDEO = 0x0000_0020;
        /// Joystick devices
        const JOYSTICK = 0x0000_0200;
        /// Force feedback
        const HAPTIC = 0x0000_1000;
        /// Game controller mapping layer
        const GAMECONTROLLER = 0x0000_2000;
        /// Event queue
        const EVENTS = 0x0000_4000;
        /// Image decoding library
        const IMAGE = 0x0100_0000;
        /// Font rendering library
        const FONT = 0x0200_0000;
        /// Audio mixer
        const MIXER = 0x0400_0000;
        /// Every core subsystem
        const EVERYTHING = Self::TIMER.bits()
            | Self::AUDIO.bits()
            | Self::VIDEO.bits()
            | Self::JOYSTICK.bits()
            | Self::HAPTIC.bits()
            | Self::GAMECONTROLLER.bits()
            | Self::EVENTS.bits();
    }
}

impl InitFlags {
    /// Close this set over implied dependencies
    pub fn with_implied(self) -> Self {
        let mut closed = self;
        loop {
            let mut next = closed;
            for subsystem in closed.subsystems() {
                next |= subsystem.implies();
            }
            if next == closed {
                return closed;
            }
            closed = next;
        }
    }

    /// Members of this set in init order (implied dependencies not added)
    pub fn subsystems(self) -> Vec<Subsystem> {
        Subsystem::INIT_ORDER
            .into_iter()
            .filter(|subsystem| self.contains(subsystem.flag()))
            .collect()
    }
}

impl From<Subsystem> for InitFlags {
    fn from(subsystem: Subsystem) -> Self {
        subsystem.flag()
    }
}

/// Reference counts for every native subsystem
pub struct SubsystemInitRegistry {
    backend: Arc<dyn NativeBackend>,
    counts: Mutex<HashMap<Subsystem, u32>>,
    /// Bumped by every `quit_all`; guards from an earlier generation no
    /// longer own a count
    generation: AtomicU64,
}

impl SubsystemInitRegistry {
    /// Create a registry with every count at zero
    pub fn new(backend: Arc<dyn NativeBackend>) -> Self {
        Self {
            backend,
            counts: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Acquire one reference to `subsystem`
    ///
    /// The native init call happens only on the 0→1 transition. If it fails
    /// the count stays at zero and the error is returned.
    pub fn acquire(&self, subsystem: Subsystem) -> LifecycleResult<()> {
        let mut counts = self.counts.lock();
        let count = counts.entry(subsystem).or_insert(0);

        if *count == 0 {
            self.backend
                .init_subsystem(subsystem)
                .map_err(|source| LifecycleError::Initialization { subsystem, source })?;
            log::info!("Initialized {} subsystem", subsystem);
        }

        *count += 1;
        log::trace!("Acquired {} subsystem (count: {})", subsystem, *count);
        Ok(())
    }

    /// Release one reference to `subsystem`
    ///
    /// The native quit call happens only on the 1→0 transition.
    ///
    /// # Panics
    /// Panics if the subsystem is not currently acquired. An unbalanced
    /// release would otherwise tear the subsystem down under another owner.
    pub fn release(&self, subsystem: Subsystem) {
        let mut counts = self.counts.lock();
        if !self.release_locked(&mut counts, subsystem) {
            drop(counts);
            panic!("release of {subsystem} subsystem without a matching acquire");
        }
    }

    /// Release one reference taken during `generation`
    ///
    /// Does nothing if `quit_all` ran since then: the forced teardown already
    /// dropped that reference.
    fn release_from(&self, subsystem: Subsystem, generation: u64) {
        let mut counts = self.counts.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            log::debug!(
                "Skipping release of {} subsystem acquired before a forced teardown",
                subsystem
            );
            return;
        }
        if !self.release_locked(&mut counts, subsystem) {
            drop(counts);
            panic!("release of {subsystem} subsystem without a matching acquire");
        }
    }

    fn release_locked(&self, counts: &mut HashMap<Subsystem, u32>, subsystem: Subsystem) -> bool {
        let current = counts.get(&subsystem).copied().unwrap_or(0);
        if current == 0 {
            return false;
        }

        let remaining = current - 1;
        log::trace!("Released {} subsystem (count: {})", subsystem, remaining);

        if remaining == 0 {
            counts.remove(&subsystem);
            self.backend.quit_subsystem(subsystem);
            log::info!("Quit {} subsystem", subsystem);
        } else {
            counts.insert(subsystem, remaining);
        }
        true
    }

    /// Acquire every subsystem in `flags` plus their implied dependencies
    ///
    /// Each member is acquired independently in init order. If one fails,
    /// the members this call already acquired are released in reverse
    /// order before the error is returned.
    pub fn acquire_all(&self, flags: InitFlags) -> LifecycleResult<Vec<Subsystem>> {
        let members = flags.with_implied().subsystems();
        let mut acquired = Vec::with_capacity(members.len());

        for subsystem in members {
            if let Err(err) = self.acquire(subsystem) {
                log::warn!(
                    "Unwinding {} subsystem(s) after {} failed to initialize",
                    acquired.len(),
                    subsystem
                );
                for done in acquired.iter().rev() {
                    self.release(*done);
                }
                return Err(err);
            }
            acquired.push(subsystem);
        }

        Ok(acquired)
    }

    /// Release every subsystem acquired by `acquire_all(flags)`
    ///
    /// # Panics
    /// Panics if any member is not currently acquired.
    pub fn release_all(&self, flags: InitFlags) {
        for subsystem in flags.with_implied().subsystems().into_iter().rev() {
            self.release(subsystem);
        }
    }

    /// Acquire `flags` for the lifetime of the returned guard
    pub fn scoped(&self, flags: impl Into<InitFlags>) -> LifecycleResult<SubsystemGuard<'_>> {
        let generation = self.generation();
        let acquired = self.acquire_all(flags.into())?;
        Ok(SubsystemGuard {
            registry: self,
            acquired,
            generation,
        })
    }

    /// Current reference count of `subsystem`
    pub fn count(&self, subsystem: Subsystem) -> u32 {
        self.counts.lock().get(&subsystem).copied().unwrap_or(0)
    }

    /// Whether `subsystem` is currently initialized at the native layer
    pub fn is_initialized(&self, subsystem: Subsystem) -> bool {
        self.count(subsystem) > 0
    }

    /// Number of forced teardowns so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Tear down every initialized subsystem regardless of its count
    ///
    /// Used at library shutdown. Subsystems are quit in reverse init order;
    /// the ones that were torn down are returned. Guards alive across this
    /// call release nothing when dropped.
    pub fn quit_all(&self) -> Vec<Subsystem> {
        let mut counts = self.counts.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut quit = Vec::new();

        for subsystem in Subsystem::INIT_ORDER.into_iter().rev() {
            if let Some(count) = counts.remove(&subsystem) {
                if count > 0 {
                    log::debug!("Forcing {} subsystem down (count was {})", subsystem, count);
                    self.backend.quit_subsystem(subsystem);
                    quit.push(subsystem);
                }
            }
        }

        quit
    }
}

impl fmt::Debug for SubsystemInitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemInitRegistry")
            .field("counts", &*self.counts.lock())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// RAII guard that releases its subsystems when dropped
///
/// Release happens on every exit path, including unwinding out of the
/// scope that holds the guard.
#[must_use = "subsystems are released as soon as the guard is dropped"]
pub struct SubsystemGuard<'a> {
    registry: &'a SubsystemInitRegistry,
    acquired: Vec<Subsystem>,
    generation: u64,
}

impl SubsystemGuard<'_> {
    /// Subsystems held by this guard, in init order
    pub fn subsystems(&self) -> &[Subsystem] {
        &self.acquired
    }
}

impl Drop for SubsystemGuard<'_> {
    fn drop(&mut self) {
        for subsystem in self.acquired.drain(..).rev() {
            self.registry.release_from(subsystem, self.generation);
        }
    }
}
