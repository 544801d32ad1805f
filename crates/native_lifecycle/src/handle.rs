//! Native handle identity
//!
//! A [`Handle`] is the value the binding layer uses to name one native-side
//! allocation: the opaque pointer bits (or device index) returned by the
//! native library, tagged with the kind of object it refers to.

use crate::subsystem::Subsystem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier returned by a native constructor
///
/// Usually the address of the native object. Zero is the native library's
/// "no object" value and never names a live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeId(pub u64);

impl NativeId {
    /// The null id reported by a failed native constructor
    pub const NULL: Self = Self(0);

    /// Check whether this id is the null id
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Kind of native object a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Top-level window
    Window,
    /// Accelerated renderer bound to a window
    Renderer,
    /// Texture uploaded to a renderer
    Texture,
    /// CPU-side pixel surface
    Surface,
    /// Decoded sound effect
    AudioChunk,
    /// Streamed music track
    Music,
    /// Loaded font face
    Font,
    /// Opened joystick device
    Joystick,
    /// Opened game controller device
    Controller,
    /// OpenGL context created for a window
    GlContext,
}

impl ResourceKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 10] = [
        Self::Window,
        Self::Renderer,
        Self::Texture,
        Self::Surface,
        Self::AudioChunk,
        Self::Music,
        Self::Font,
        Self::Joystick,
        Self::Controller,
        Self::GlContext,
    ];

    /// Kinds that may own a resource of this kind
    ///
    /// An empty slice means the kind is always a root. The native library
    /// requires dependents to be destroyed before the object they were
    /// derived from, which is what these edges encode.
    pub const fn accepted_owners(self) -> &'static [Self] {
        match self {
            Self::Renderer | Self::GlContext => &[Self::Window],
            Self::Texture => &[Self::Renderer],
            Self::Surface => &[Self::Window],
            Self::Window
            | Self::AudioChunk
            | Self::Music
            | Self::Font
            | Self::Joystick
            | Self::Controller => &[],
        }
    }

    /// Check whether `owner` may own a resource of this kind
    pub fn accepts_owner(self, owner: Self) -> bool {
        self.accepted_owners().contains(&owner)
    }

    /// Subsystem that must be initialized to create a resource of this kind
    pub const fn subsystem(self) -> Option<Subsystem> {
        match self {
            Self::Window | Self::Renderer | Self::Texture | Self::GlContext => {
                Some(Subsystem::Video)
            }
            Self::AudioChunk | Self::Music => Some(Subsystem::Mixer),
            Self::Font => Some(Subsystem::Font),
            Self::Joystick => Some(Subsystem::Joystick),
            Self::Controller => Some(Subsystem::GameController),
            Self::Surface => None,
        }
    }

    /// Whether the native release call is only valid while the kind's
    /// subsystem is still initialized
    ///
    /// Device handles must not be closed after their subsystem has been
    /// torn down; the record is still marked destroyed but the native call
    /// is skipped.
    pub const fn requires_active_library(self) -> bool {
        matches!(self, Self::Joystick | Self::Controller)
    }

    /// Class-style name used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::Window => "Window",
            Self::Renderer => "Renderer",
            Self::Texture => "Texture",
            Self::Surface => "Surface",
            Self::AudioChunk => "Mixer::Chunk",
            Self::Music => "Mixer::Music",
            Self::Font => "TTF",
            Self::Joystick => "Joystick",
            Self::Controller => "GameController",
            Self::GlContext => "GL::Context",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one native allocation
///
/// Immutable once created. The registry guarantees that no two live records
/// share a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    /// Opaque native identifier
    pub native_id: NativeId,
    /// What kind of object `native_id` refers to
    pub kind: ResourceKind,
}

impl Handle {
    /// Create a handle
    pub const fn new(kind: ResourceKind, native_id: NativeId) -> Self {
        Self { native_id, kind }
    }

    /// Check whether the native id is null
    pub const fn is_null(&self) -> bool {
        self.native_id.is_null()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.native_id)
    }
}
