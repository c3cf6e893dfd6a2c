//! Collaborator traits for the scene graph side.
//!
//! The engine never owns windowing, rendering or UI state; it talks to the
//! embedding scene graph exclusively through these traits. All of them are
//! consumed as black boxes.

use crate::Error;

/// Identity of a graphics-side resource (a texture name or equivalent).
/// Zero means the resource does not exist yet.
pub type GraphicsResourceId = u64;

/// Width and height of a texture-like source, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Raw handles of the graphics context the compute context must share state
/// with. Which variant a provider reports depends on its windowing stack;
/// which variants the engine accepts depends on the build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeGraphicsBinding {
    /// macOS: the CGL share group of the current context.
    Cgl { share_group: u64 },
    /// Windows: the WGL context and device context.
    Wgl { context: u64, dc: u64 },
    /// EGL context plus display.
    Egl { context: u64, display: u64 },
    /// GLX context plus X display.
    Glx { context: u64, display: u64 },
    /// A GLES-over-translation stack with no usable native handles.
    Unavailable,
}

/// Reports on the graphics context owned by the render thread.
pub trait GraphicsContextProvider {
    /// Whether a graphics context is current on the calling thread.
    fn is_current(&self) -> bool;

    /// The graphics implementation's vendor string, used by the best-effort
    /// platform-selection heuristic.
    fn vendor(&self) -> String;

    /// Native handles for interop context creation.
    fn native_binding(&self) -> NativeGraphicsBinding;

    /// Allocates a texture the engine will render compute output into.
    ///
    /// # Errors
    /// Fails when the graphics side cannot allocate a texture of this size.
    fn create_texture(&self, size: ImageSize) -> Result<GraphicsResourceId, Error>;

    /// Destroys a texture previously allocated with
    /// [`create_texture`](GraphicsContextProvider::create_texture).
    fn destroy_texture(&self, id: GraphicsResourceId);
}

/// A texture-like source in the scene whose identity and size may change
/// between passes.
pub trait GraphicsResourceProvider {
    /// Current resource identity; zero while the source is not ready.
    fn resource_id(&self) -> GraphicsResourceId;

    /// Current size of the source.
    fn size(&self) -> ImageSize;
}

/// Accepts "run another update pass" requests.
///
/// Implementations must be callable from any thread, including the driver's
/// completion-callback thread, and must degrade to a no-op once the
/// requesting item is gone.
pub trait SceneUpdateScheduler: Send + Sync {
    fn request_update(&self);
}

/// Receives computed results, exactly once per completed operation, always
/// on the control thread.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, data: &[u8]);
}
