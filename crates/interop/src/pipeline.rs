//! Kernel submission with acquire/release fencing and optional read-back.
//!
//! A pipeline owns one in-order compute queue and the kernels of its plan.
//! Submission brackets every touch of shared memory between an acquire and
//! a release on that queue, falls back to a full graphics barrier when the
//! device cannot signal hand-over natively, and either blocks (explicit
//! sync, forced sync, profiling) or hands back a completion token.
//!
//! A pipeline whose program or kernels failed to build is permanently
//! inert: submissions become no-ops rather than crashing the render loop,
//! and the item simply renders nothing.

use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::completion::CompletionToken;
use crate::context::ComputeContext;
use crate::driver::{
    ComputeDriver, ContextId, DriverError, EventId, KernelArg, KernelId, MemAccess, MemId,
    ProgramId, QueueId, ReadTarget,
};
use crate::pending::PendingOperation;
use crate::scene::ImageSize;
use crate::sizing::{
    image_grid, reduction_combine_grid, reduction_partial_grid, REDUCTION_BINS, REDUCTION_BLOCK,
};
use crate::Error;

/// Per-pipeline configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Skip the output interop binding and output texture; results leave
    /// through the raw-result path instead.
    pub no_output_image: bool,
    /// Force synchronous completion and record start/end timestamps,
    /// exposed as elapsed milliseconds.
    pub profiling: bool,
    /// Always block until the device queue is empty, even when asynchronous
    /// interop is available.
    pub force_full_sync: bool,
    /// Which named property of the embedding item supplies the input
    /// graphics resource.
    pub source_attribute: Cow<'static, str>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            no_output_image: false,
            profiling: false,
            force_full_sync: false,
            source_attribute: Cow::Borrowed("source"),
        }
    }
}

/// Kernel program source plus the entry points of the chosen plan.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    pub source: String,
    pub plan: PlanSpec,
}

/// Which dispatch plan the pipeline runs.
#[derive(Debug, Clone)]
pub enum PlanSpec {
    /// A general image-to-image kernel, one work item per pixel. Extra
    /// arguments follow the input and output images.
    Image {
        kernel: String,
        extra_args: Vec<KernelArg>,
    },
    /// The two-stage reduction: partial aggregation per work group, then a
    /// single-group combine writing the final result, which is read back to
    /// the host.
    Reduction { partial: String, combine: String },
}

/// What a call to [`ImagePipeline::submit`] did.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// The pipeline is inert or otherwise unable to run; nothing was
    /// enqueued.
    NotReady,
    /// A previous submission is still outstanding. This one was dropped —
    /// not queued — and the next scheduled pass retries from scratch.
    Skipped,
    /// Work was enqueued and the in-order queue makes its results visible
    /// to the graphics pass; nothing to wait for.
    Enqueued,
    /// The queue was drained before returning. `elapsed_ms` carries the
    /// profiled duration when profiling is on.
    CompletedSynchronously { elapsed_ms: Option<f64> },
    /// Work was enqueued and the caller must watch the token for
    /// completion.
    PendingAsync(CompletionToken),
}

enum BuiltPlan {
    Image {
        kernel: KernelId,
        extra_args: Vec<KernelArg>,
    },
    Reduction {
        partial: KernelId,
        combine: KernelId,
        /// Lazily created; resized when the group count changes.
        partials: Option<(MemId, u32)>,
        result: MemId,
    },
}

/// The per-item pipeline owning the compute queue, kernels and host-side
/// result buffer for one visual item's compute work.
pub struct ImagePipeline {
    driver: Arc<dyn ComputeDriver>,
    context: Option<ContextId>,
    queue: Option<QueueId>,
    program: Option<ProgramId>,
    plan: Option<BuiltPlan>,
    needs_explicit_sync: bool,
    config: PipelineConfig,
    pending: Arc<PendingOperation>,
    host: ReadTarget,
    elapsed_ms: Option<f64>,
}

impl ImagePipeline {
    /// Builds the pipeline's queue, program and kernels. Any failure is
    /// logged and leaves the pipeline inert; it never panics and never
    /// fails the caller.
    #[must_use]
    pub fn new(context: &ComputeContext, spec: &KernelSpec, config: PipelineConfig) -> Self {
        let driver = context.driver();
        let mut pipeline = Self {
            driver,
            context: context.raw(),
            queue: None,
            program: None,
            plan: None,
            needs_explicit_sync: false,
            config,
            pending: PendingOperation::new(),
            host: Arc::new(Mutex::new(Vec::new())),
            elapsed_ms: None,
        };

        let (Some(raw), Some(device)) = (context.raw(), context.device()) else {
            tracing::warn!("compute context is not valid, pipeline left inert");
            return pipeline;
        };

        pipeline.queue = match pipeline
            .driver
            .create_queue(raw, device, pipeline.config.profiling)
        {
            Ok(queue) => Some(queue),
            Err(e) => {
                tracing::warn!("failed to create compute command queue: {e}");
                return pipeline;
            }
        };
        pipeline.needs_explicit_sync = !pipeline.driver.device_has_native_sync(device);

        let program = match pipeline.driver.build_program(raw, &spec.source) {
            Ok(program) => program,
            Err(e) => {
                tracing::warn!("failed to build kernel program: {e}");
                return pipeline;
            }
        };
        pipeline.program = Some(program);

        pipeline.plan = match &spec.plan {
            PlanSpec::Image { kernel, extra_args } => {
                match pipeline.driver.create_kernel(program, kernel) {
                    Ok(kernel) => Some(BuiltPlan::Image {
                        kernel,
                        extra_args: extra_args.clone(),
                    }),
                    Err(e) => {
                        tracing::warn!("failed to create image kernel: {e}");
                        None
                    }
                }
            }
            PlanSpec::Reduction { partial, combine } => {
                pipeline.build_reduction(raw, program, partial, combine)
            }
        };

        pipeline
    }

    fn build_reduction(
        &self,
        context: ContextId,
        program: ProgramId,
        partial: &str,
        combine: &str,
    ) -> Option<BuiltPlan> {
        let partial = match self.driver.create_kernel(program, partial) {
            Ok(kernel) => kernel,
            Err(e) => {
                tracing::warn!("failed to create partial-aggregation kernel: {e}");
                return None;
            }
        };
        let combine = match self.driver.create_kernel(program, combine) {
            Ok(kernel) => kernel,
            Err(e) => {
                tracing::warn!("failed to create combine kernel: {e}");
                self.driver.release_kernel(partial);
                return None;
            }
        };
        let result_len = REDUCTION_BINS * std::mem::size_of::<u32>();
        match self
            .driver
            .create_buffer(context, MemAccess::WriteOnly, result_len)
        {
            Ok(result) => Some(BuiltPlan::Reduction {
                partial,
                combine,
                partials: None,
                result,
            }),
            Err(e) => {
                tracing::warn!("failed to create result buffer: {e}");
                self.driver.release_kernel(partial);
                self.driver.release_kernel(combine);
                None
            }
        }
    }

    /// Whether construction failed and every submit is a no-op.
    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.plan.is_none()
    }

    /// Whether the plan reads its result back to the host.
    #[must_use]
    pub fn has_readback(&self) -> bool {
        matches!(self.plan, Some(BuiltPlan::Reduction { .. }))
    }

    /// The submission flag shared with the control thread.
    #[must_use]
    pub fn pending(&self) -> Arc<PendingOperation> {
        Arc::clone(&self.pending)
    }

    /// The host buffer asynchronous reads land in.
    #[must_use]
    pub fn results(&self) -> ReadTarget {
        Arc::clone(&self.host)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Milliseconds spent on device work during the last profiled
    /// submission.
    #[must_use]
    pub fn elapsed_ms(&self) -> Option<f64> {
        self.elapsed_ms
    }

    /// Submits one pass over the bound images.
    ///
    /// # Errors
    /// [`Error::SubmissionFailed`] when an enqueue fails; the submission is
    /// aborted, nothing stays acquired (an aborted acquire gets no matching
    /// release, since half-acquired state cannot be dispatched against),
    /// and the next scheduled pass retries.
    pub fn submit(
        &mut self,
        input: MemId,
        output: Option<MemId>,
        size: ImageSize,
    ) -> Result<SubmissionOutcome, Error> {
        let Some(queue) = self.queue else {
            return Ok(SubmissionOutcome::NotReady);
        };
        if self.plan.is_none() {
            return Ok(SubmissionOutcome::NotReady);
        }

        // Read-back plans hold the in-flight slot until the control thread
        // consumes the completion; everything else is fire-and-forget.
        let guard = if self.has_readback() {
            match self.pending.begin() {
                Some(guard) => Some(guard),
                None => return Ok(SubmissionOutcome::Skipped),
            }
        } else {
            None
        };

        if self.needs_explicit_sync {
            self.driver.graphics_barrier();
        }

        let mut shared = vec![input];
        if let Some(output) = output {
            shared.push(output);
        }
        self.driver
            .enqueue_acquire(queue, &shared)
            .map_err(|e| stage_failed("acquiring the shared images", &e))?;

        let prof_start = self.profiling_marker(queue, "start");

        let result_buffer = self.dispatch_stages(queue, input, output, size)?;

        let prof_end = self.profiling_marker(queue, "end");

        self.driver
            .enqueue_release(queue, &shared)
            .map_err(|e| stage_failed("releasing the shared images", &e))?;

        let read_event = match result_buffer {
            Some(buffer) => Some(
                self.driver
                    .enqueue_read(queue, buffer, &self.host)
                    .map_err(|e| stage_failed("reading back the result buffer", &e))?,
            ),
            None => None,
        };

        let blocking =
            self.needs_explicit_sync || self.config.force_full_sync || self.config.profiling;
        if blocking {
            self.driver
                .finish(queue)
                .map_err(|e| stage_failed("finishing the queue", &e))?;
            if let (Some(start), Some(end)) = (prof_start, prof_end) {
                self.elapsed_ms = self.driver.elapsed_ms(start, end);
                self.driver.release_event(start);
                self.driver.release_event(end);
            }
            if let Some(event) = read_event {
                // Observed complete here; the control thread still gets a
                // tokenless notification so delivery stays on its side.
                self.driver.release_event(event);
            }
            if let Some(guard) = guard {
                guard.commit();
            }
            let elapsed_ms = self.config.profiling.then_some(self.elapsed_ms).flatten();
            return Ok(SubmissionOutcome::CompletedSynchronously { elapsed_ms });
        }

        match read_event {
            Some(event) => {
                if let Some(guard) = guard {
                    guard.commit();
                }
                Ok(SubmissionOutcome::PendingAsync(CompletionToken::new(event)))
            }
            None => Ok(SubmissionOutcome::Enqueued),
        }
    }

    fn profiling_marker(&self, queue: QueueId, which: &str) -> Option<EventId> {
        if !self.config.profiling {
            return None;
        }
        match self.driver.enqueue_marker(queue) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("failed to enqueue profiling marker ({which}): {e}");
                None
            }
        }
    }

    fn dispatch_stages(
        &mut self,
        queue: QueueId,
        input: MemId,
        output: Option<MemId>,
        size: ImageSize,
    ) -> Result<Option<MemId>, Error> {
        let driver = Arc::clone(&self.driver);
        let context = self.context;
        match self.plan.as_mut() {
            None => Ok(None),
            Some(BuiltPlan::Image { kernel, extra_args }) => {
                let mut args = vec![KernelArg::Mem(input)];
                if let Some(output) = output {
                    args.push(KernelArg::Mem(output));
                }
                args.extend(extra_args.iter().copied());
                driver
                    .enqueue_dispatch(queue, *kernel, &args, image_grid(size))
                    .map_err(|e| stage_failed("dispatching the image kernel", &e))?;
                Ok(None)
            }
            Some(BuiltPlan::Reduction {
                partial,
                combine,
                partials,
                result,
            }) => {
                let geometry = reduction_partial_grid(size);
                let group_count = geometry.group_count();

                let partials_buffer = match partials {
                    Some((mem, count)) if *count == group_count => *mem,
                    _ => {
                        if let Some((old, _)) = partials.take() {
                            driver.release_mem(old);
                        }
                        let Some(context) = context else {
                            return Err(Error::SubmissionFailed("missing compute context"));
                        };
                        let len =
                            group_count as usize * REDUCTION_BINS * std::mem::size_of::<u32>();
                        let mem = driver
                            .create_buffer(context, MemAccess::ReadWrite, len)
                            .map_err(|e| {
                                tracing::warn!("failed to create partial results buffer: {e}");
                                Error::SubmissionFailed("creating the partial results buffer")
                            })?;
                        *partials = Some((mem, group_count));
                        mem
                    }
                };

                #[allow(clippy::cast_possible_wrap)]
                let block = REDUCTION_BLOCK as i32;
                driver
                    .enqueue_dispatch(
                        queue,
                        *partial,
                        &[
                            KernelArg::Mem(input),
                            KernelArg::I32(block),
                            KernelArg::Mem(partials_buffer),
                        ],
                        geometry.grid,
                    )
                    .map_err(|e| stage_failed("dispatching the partial-aggregation kernel", &e))?;

                #[allow(clippy::cast_possible_wrap)]
                let groups = group_count as i32;
                driver
                    .enqueue_dispatch(
                        queue,
                        *combine,
                        &[
                            KernelArg::Mem(partials_buffer),
                            KernelArg::I32(groups),
                            KernelArg::Mem(*result),
                        ],
                        reduction_combine_grid(),
                    )
                    .map_err(|e| stage_failed("dispatching the combine kernel", &e))?;

                Ok(Some(*result))
            }
        }
    }
}

fn stage_failed(stage: &'static str, e: &DriverError) -> Error {
    tracing::warn!("failed while {stage}: {e}");
    Error::SubmissionFailed(stage)
}

impl Drop for ImagePipeline {
    fn drop(&mut self) {
        match self.plan.take() {
            Some(BuiltPlan::Image { kernel, .. }) => {
                self.driver.release_kernel(kernel);
            }
            Some(BuiltPlan::Reduction {
                partial,
                combine,
                partials,
                result,
            }) => {
                self.driver.release_kernel(partial);
                self.driver.release_kernel(combine);
                if let Some((mem, _)) = partials {
                    self.driver.release_mem(mem);
                }
                self.driver.release_mem(result);
            }
            None => {}
        }
        if let Some(program) = self.program.take() {
            self.driver.release_program(program);
        }
        if let Some(queue) = self.queue.take() {
            self.driver.release_queue(queue);
        }
    }
}
