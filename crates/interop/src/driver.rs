//! The seam between the engine and the native compute API.
//!
//! Everything the engine needs from a compute runtime — platforms, interop
//! contexts, queues, kernels, shared memory objects, fencing and completion
//! events — is expressed as the object-safe [`ComputeDriver`] trait over
//! opaque handles. The engine never talks to a concrete API directly, which
//! keeps the completion state machine testable with the in-process mock
//! driver and lets the GPU implementation live behind the `gpu` feature.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::scene::{GraphicsResourceId, NativeGraphicsBinding};

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

driver_handle!(
    /// A compute platform (an installed implementation of the compute API).
    PlatformId
);
driver_handle!(
    /// A compute device belonging to a platform.
    DeviceId
);
driver_handle!(
    /// A compute context sharing state with a live graphics context.
    ContextId
);
driver_handle!(
    /// An in-order command queue on a context.
    QueueId
);
driver_handle!(
    /// A compiled kernel program.
    ProgramId
);
driver_handle!(
    /// A single kernel entry point within a program.
    KernelId
);
driver_handle!(
    /// A compute memory object, possibly wrapping a graphics resource.
    MemId
);
driver_handle!(
    /// An asynchronous completion event.
    EventId
);

/// Name and handle of an enumerated compute platform.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub id: PlatformId,
    pub name: String,
}

/// Access mode requested for a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// A kernel argument. Memory objects are passed by handle, scalars by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Mem(MemId),
    U32(u32),
    I32(i32),
    F32(f32),
}

/// Work-item geometry for a dispatch.
///
/// `global` counts work items, not groups. When `local` is present the
/// caller guarantees `global` is a multiple of it; when absent the backend
/// picks its own grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub global: [u32; 2],
    pub local: Option<[u32; 2]>,
}

/// Native handles needed to request a context that shares live graphics
/// state, assembled per target platform by the context layer.
#[derive(Debug, Clone)]
pub struct InteropDescriptor {
    pub platform: PlatformId,
    pub binding: NativeGraphicsBinding,
}

/// Failures reported by a driver implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The referenced graphics object exists but is not usable yet, e.g. a
    /// texture that has not been rendered to. Deferral, not a hard failure.
    #[error("graphics object is not usable yet")]
    InvalidGraphicsObject,
    /// Anything else the backend refuses to do.
    #[error("{0}")]
    Backend(&'static str),
}

/// Host-side destination for an asynchronous read-back.
///
/// The driver fills the buffer before completing the read's event, so a
/// consumer that observed the event complete may lock and read it.
pub type ReadTarget = Arc<Mutex<Vec<u8>>>;

/// The native compute API as consumed by the engine.
///
/// Implementations must be callable from any thread; the engine confines
/// queue operations to the render thread by convention, but event callbacks
/// and [`release_event`](ComputeDriver::release_event) run wherever the
/// driver's completion thread happens to be.
pub trait ComputeDriver: Send + Sync + 'static {
    /// Lists the available compute platforms. Empty means no backend is
    /// installed at all.
    fn enumerate_platforms(&self) -> Vec<PlatformInfo>;

    /// Requests a GPU-class context sharing state with the graphics context
    /// named by the descriptor.
    fn create_context(&self, desc: &InteropDescriptor) -> Result<ContextId, DriverError>;

    /// Releases a context. Must not be called while work is outstanding.
    fn release_context(&self, context: ContextId);

    /// Resolves the device driving the graphics context, when the platform
    /// exposes an interop query for it.
    fn query_interop_device(
        &self,
        context: ContextId,
        desc: &InteropDescriptor,
    ) -> Option<DeviceId>;

    /// First GPU-class device on the platform, the fallback when no interop
    /// query is available.
    ///
    /// # Errors
    /// Fails when the platform has no GPU-class device.
    fn first_gpu_device(&self, platform: PlatformId) -> Result<DeviceId, DriverError>;

    /// Whether the device signals graphics/compute hand-over with native
    /// events. When false the engine must fall back to explicit
    /// full-pipeline synchronization around shared resources.
    fn device_has_native_sync(&self, device: DeviceId) -> bool;

    /// Creates an in-order command queue, optionally with profiling
    /// timestamps enabled.
    fn create_queue(
        &self,
        context: ContextId,
        device: DeviceId,
        profiling: bool,
    ) -> Result<QueueId, DriverError>;

    fn release_queue(&self, queue: QueueId);

    /// Compiles a kernel program from source text.
    fn build_program(&self, context: ContextId, source: &str) -> Result<ProgramId, DriverError>;

    fn release_program(&self, program: ProgramId);

    /// Looks up one kernel entry point in a built program.
    fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId, DriverError>;

    fn release_kernel(&self, kernel: KernelId);

    /// Wraps a graphics texture as a compute memory object.
    ///
    /// # Errors
    /// [`DriverError::InvalidGraphicsObject`] when the texture is not yet
    /// usable; the caller should retry on a later pass.
    fn wrap_texture(
        &self,
        context: ContextId,
        access: MemAccess,
        texture: GraphicsResourceId,
    ) -> Result<MemId, DriverError>;

    /// Allocates a device buffer of `len` bytes.
    fn create_buffer(
        &self,
        context: ContextId,
        access: MemAccess,
        len: usize,
    ) -> Result<MemId, DriverError>;

    fn release_mem(&self, mem: MemId);

    /// Enqueues exclusive acquisition of shared memory objects for compute
    /// use. Must precede any dispatch touching them.
    fn enqueue_acquire(&self, queue: QueueId, objects: &[MemId]) -> Result<(), DriverError>;

    /// Enqueues the matching hand-back of shared memory objects to the
    /// graphics pipeline.
    fn enqueue_release(&self, queue: QueueId, objects: &[MemId]) -> Result<(), DriverError>;

    /// Enqueues a timestamped marker and returns its event.
    fn enqueue_marker(&self, queue: QueueId) -> Result<EventId, DriverError>;

    /// Enqueues one kernel dispatch.
    fn enqueue_dispatch(
        &self,
        queue: QueueId,
        kernel: KernelId,
        args: &[KernelArg],
        grid: DispatchGrid,
    ) -> Result<(), DriverError>;

    /// Enqueues an asynchronous read of a device buffer into `target`,
    /// returning the event that completes once the bytes have landed.
    fn enqueue_read(
        &self,
        queue: QueueId,
        source: MemId,
        target: &ReadTarget,
    ) -> Result<EventId, DriverError>;

    /// Blocks until every command enqueued so far has retired.
    fn finish(&self, queue: QueueId) -> Result<(), DriverError>;

    /// Full graphics-pipeline barrier, the explicit-sync fallback used when
    /// [`device_has_native_sync`](ComputeDriver::device_has_native_sync)
    /// reports false.
    fn graphics_barrier(&self);

    /// Registers a completion callback for an event. The callback runs on an
    /// unspecified driver thread, possibly before this call returns if the
    /// event already completed.
    fn set_event_callback(
        &self,
        event: EventId,
        callback: Box<dyn FnOnce() + Send>,
    ) -> Result<(), DriverError>;

    /// Releases an event handle. Each event must be released exactly once.
    fn release_event(&self, event: EventId);

    /// Milliseconds between two completed marker events, queue-clock based.
    /// `None` when either event has not completed or profiling is off.
    fn elapsed_ms(&self, start: EventId, end: EventId) -> Option<f64>;
}
