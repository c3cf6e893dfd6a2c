//! Render-thread orchestration for one visual item.
//!
//! Each update pass resolves the item's source, refreshes the interop
//! bindings, submits the pipeline and arranges completion watching. The
//! returned disposition tells the embedding scene item what to do with its
//! renderable node; the runner itself never touches scene-graph state.

use std::sync::Arc;

use crate::bindings::InteropImageCache;
use crate::completion::CompletionWatcher;
use crate::context::ComputeContext;
use crate::driver::ReadTarget;
use crate::pending::PendingOperation;
use crate::pipeline::{ImagePipeline, KernelSpec, PipelineConfig, SubmissionOutcome};
use crate::scene::{
    GraphicsContextProvider, GraphicsResourceId, GraphicsResourceProvider, SceneUpdateScheduler,
};
use crate::Error;

/// What the embedding item should do with its renderable node after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassDisposition {
    /// No source to compute from; drop any node.
    Clear,
    /// Keep whatever node exists; prior output remains visible.
    Keep,
    /// The bindings were rebuilt; recreate the node around the new output
    /// texture (`None` for raw-result pipelines, which render nothing).
    Rebuild {
        output_texture: Option<GraphicsResourceId>,
    },
}

/// Per-item orchestrator living on the render thread.
pub struct ImageComputeRunner {
    cache: InteropImageCache,
    pipeline: ImagePipeline,
    watcher: CompletionWatcher,
    scheduler: Arc<dyn SceneUpdateScheduler>,
    want_output: bool,
}

impl ImageComputeRunner {
    /// Builds the per-item pipeline and binding cache on a valid context.
    ///
    /// # Errors
    /// Fails when the context has no native handle; a pipeline whose
    /// kernels fail to build is NOT an error here — it stays inert and the
    /// item renders nothing.
    pub fn new(
        context: &ComputeContext,
        spec: &KernelSpec,
        config: PipelineConfig,
        watcher: CompletionWatcher,
        scheduler: Arc<dyn SceneUpdateScheduler>,
    ) -> Result<Self, Error> {
        let raw = context.raw().ok_or_else(|| {
            Error::ContextCreationFailed("compute context is not valid".into())
        })?;
        let want_output = !config.no_output_image;
        Ok(Self {
            cache: InteropImageCache::new(context.driver(), raw),
            pipeline: ImagePipeline::new(context, spec, config),
            watcher,
            scheduler,
            want_output,
        })
    }

    /// Runs one update pass: refresh bindings, submit, watch.
    ///
    /// Per-frame failures are logged and absorbed — the scheduled update
    /// cadence is the retry mechanism, so nothing here escalates.
    pub fn update(
        &mut self,
        graphics: &dyn GraphicsContextProvider,
        source: &dyn GraphicsResourceProvider,
    ) -> PassDisposition {
        let id = source.resource_id();
        let size = source.size();
        if size.is_empty() {
            return PassDisposition::Clear;
        }

        let bindings = match self.cache.ensure(graphics, id, size, self.want_output) {
            Ok(bindings) => bindings,
            Err(Error::NotReady) => {
                // The source may become valid on a later pass; ask for one.
                self.scheduler.request_update();
                return PassDisposition::Keep;
            }
            Err(e) => {
                tracing::warn!("binding pass abandoned: {e}");
                return PassDisposition::Keep;
            }
        };

        match self.pipeline.submit(bindings.input, bindings.output, size) {
            Ok(SubmissionOutcome::PendingAsync(token)) => {
                self.watcher.watch(token);
            }
            Ok(SubmissionOutcome::CompletedSynchronously { elapsed_ms }) => {
                if let Some(ms) = elapsed_ms {
                    tracing::debug!("compute time: {ms:.3} ms");
                }
                if self.pipeline.has_readback() {
                    self.watcher.notify_completed();
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("submission pass abandoned: {e}");
            }
        }

        if bindings.rebuilt {
            PassDisposition::Rebuild {
                output_texture: self.cache.output_texture(),
            }
        } else {
            PassDisposition::Keep
        }
    }

    /// The engine-allocated output texture, for embedders building their
    /// first renderable node.
    #[must_use]
    pub fn output_texture(&self) -> Option<GraphicsResourceId> {
        self.cache.output_texture()
    }

    /// The pipeline's submission flag, for the control-side drain.
    #[must_use]
    pub fn pending(&self) -> Arc<PendingOperation> {
        self.pipeline.pending()
    }

    /// The host buffer results land in, for the control-side handler.
    #[must_use]
    pub fn results(&self) -> ReadTarget {
        self.pipeline.results()
    }

    /// Last profiled device time, when profiling is configured.
    #[must_use]
    pub fn elapsed_ms(&self) -> Option<f64> {
        self.pipeline.elapsed_ms()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    /// Releases the interop bindings if no operation is outstanding.
    /// Returns false — and does nothing — while one is, so callers retry on
    /// a later pass; a context must never be torn down under a pending
    /// operation.
    pub fn try_release(&mut self, graphics: &dyn GraphicsContextProvider) -> bool {
        if self.pipeline.pending().is_submitted() {
            tracing::debug!("release deferred, a compute operation is still in flight");
            return false;
        }
        self.cache.release(graphics);
        true
    }
}
