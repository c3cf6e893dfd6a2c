#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

//! Compute interop engine for retained-mode scene graphs.
//!
//! A visual item in a scene graph drives GPU compute kernels over textures
//! the scene graph produced, and results flow back into the scene or into
//! arbitrary non-graphical consumers without stalling the render loop. The
//! crate provides the four pieces that make this safe:
//!
//! - [`context::ComputeContext`] — a compute context created to interoperate
//!   with the live graphics context, platform and device chosen to match;
//! - [`bindings::InteropImageCache`] — graphics textures wrapped as compute
//!   memory objects, invalidated as a pair when the source changes;
//! - [`pipeline::ImagePipeline`] — queue ownership, acquire/dispatch/release
//!   fencing, dispatch sizing and optional host read-back;
//! - [`completion`] — routing of driver-thread completion callbacks to the
//!   control thread, with at-most-one-in-flight submission tracking that
//!   survives handler failures and owner destruction.
//!
//! Everything underneath runs against the [`driver::ComputeDriver`] seam;
//! the `mock` feature (default) supplies a deterministic in-process driver
//! and the `gpu` feature a wgpu-backed one.

use std::sync::Arc;

use thiserror::Error;

pub mod bindings;
pub mod completion;
pub mod context;
pub mod driver;
#[cfg(feature = "mock")]
pub mod mock;
pub mod pending;
pub mod pipeline;
pub mod runner;
pub mod scene;
pub mod sizing;
#[cfg(feature = "gpu")]
pub mod wgpu_driver;

pub use bindings::{Bindings, InteropImageCache};
pub use completion::{CompletionRouter, CompletionToken, CompletionWatcher};
pub use context::ComputeContext;
pub use driver::ComputeDriver;
pub use pending::{PendingOpGuard, PendingOperation};
pub use pipeline::{ImagePipeline, KernelSpec, PipelineConfig, SubmissionOutcome};
pub use runner::ImageComputeRunner;
pub use scene::{
    GraphicsContextProvider, GraphicsResourceId, GraphicsResourceProvider, ImageSize, ResultSink,
    SceneUpdateScheduler,
};

/// Engine-level failures, inspected by callers as values; nothing here ever
/// crosses a thread boundary as a panic.
#[derive(Error, Debug)]
pub enum Error {
    /// No compute backend is present. Terminal for the item; the process
    /// continues and the item renders nothing.
    #[error("no compute platform available")]
    PlatformUnavailable,
    /// The interop context request was rejected. Terminal for the item.
    #[error("compute context creation failed: {0}")]
    ContextCreationFailed(String),
    /// Wrapping a graphics resource failed. The current pass is abandoned
    /// and retried on the next scheduled update.
    #[error("failed to wrap graphics resource: {0}")]
    ResourceBindingFailed(String),
    /// A queue or dispatch call failed. Same retry policy as above.
    #[error("compute submission failed: {0}")]
    SubmissionFailed(&'static str),
    /// The source resource is not valid yet. Not a real error: defer and
    /// retry on a later scheduled pass.
    #[error("graphics source not ready")]
    NotReady,
}

/// Returns a compute driver, preferring the GPU implementation when the
/// `gpu` feature is enabled and its initialization succeeds.
#[must_use]
pub fn default_driver() -> Arc<dyn ComputeDriver> {
    #[cfg(feature = "gpu")]
    {
        match wgpu_driver::WgpuDriver::try_new() {
            Ok(gpu) => {
                tracing::info!("using wgpu compute driver");
                return Arc::new(gpu);
            }
            Err(e) => {
                tracing::warn!("wgpu driver initialization failed, falling back: {e}");
            }
        }
    }

    #[cfg(feature = "mock")]
    {
        tracing::info!("using mock compute driver");
        return Arc::new(mock::MockDriver::default());
    }

    #[cfg(not(feature = "mock"))]
    {
        compile_error!(
            "No compute driver available. Enable the 'mock' feature or ensure a GPU driver can initialize."
        );
    }
}
