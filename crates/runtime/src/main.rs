#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::unnecessary_wraps)]

//! Headless demonstration of the compute interop engine.
//!
//! Stands in for a scene graph with fixed collaborators, runs a handful of
//! update passes on a render thread against the mock driver, and drains
//! completions on the control thread the way an embedding UI would. Run
//! with `--profile` to force synchronous submissions with device timing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use interop::mock::MockDriver;
use interop::pipeline::PlanSpec;
use interop::scene::NativeGraphicsBinding;
use interop::{
    ComputeContext, ComputeDriver, CompletionRouter, CompletionWatcher, GraphicsContextProvider,
    GraphicsResourceId, GraphicsResourceProvider, ImageComputeRunner, ImageSize, KernelSpec,
    PipelineConfig, ResultSink, SceneUpdateScheduler,
};

const PASSES: u32 = 5;

/// Graphics-context stand-in: always current, fixed vendor, counts the
/// output textures it hands out.
struct HeadlessGraphics {
    next_texture: AtomicU64,
}

impl GraphicsContextProvider for HeadlessGraphics {
    fn is_current(&self) -> bool {
        true
    }

    fn vendor(&self) -> String {
        "Headless Mock Renderer".to_string()
    }

    fn native_binding(&self) -> NativeGraphicsBinding {
        native_binding()
    }

    fn create_texture(&self, _size: ImageSize) -> Result<GraphicsResourceId, interop::Error> {
        Ok(self.next_texture.fetch_add(1, Ordering::Relaxed))
    }

    fn destroy_texture(&self, _id: GraphicsResourceId) {}
}

#[cfg(target_os = "macos")]
fn native_binding() -> NativeGraphicsBinding {
    NativeGraphicsBinding::Cgl { share_group: 1 }
}

#[cfg(target_os = "windows")]
fn native_binding() -> NativeGraphicsBinding {
    NativeGraphicsBinding::Wgl { context: 1, dc: 1 }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn native_binding() -> NativeGraphicsBinding {
    NativeGraphicsBinding::Egl {
        context: 1,
        display: 1,
    }
}

/// A texture-like source of fixed identity and size.
struct SceneSource;

impl GraphicsResourceProvider for SceneSource {
    fn resource_id(&self) -> GraphicsResourceId {
        7
    }

    fn size(&self) -> ImageSize {
        ImageSize::new(1200, 600)
    }
}

/// Scheduler stand-in: latches update requests from any thread.
#[derive(Default)]
struct PassScheduler {
    requested: AtomicBool,
}

impl PassScheduler {
    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

impl SceneUpdateScheduler for PassScheduler {
    fn request_update(&self) {
        self.requested.store(true, Ordering::Release);
    }
}

/// Logs each delivered histogram.
struct HistogramSink;

impl ResultSink for HistogramSink {
    fn deliver(&self, data: &[u8]) {
        let bins: &[u32] = bytemuck::cast_slice(data);
        let total: u64 = bins.iter().map(|b| u64::from(*b)).sum();
        tracing::info!(
            "histogram delivered: {} bins, {} samples, bins[0..4] = {:?}",
            bins.len(),
            total,
            &bins[..bins.len().min(4)]
        );
    }
}

fn render_thread(
    driver: Arc<MockDriver>,
    graphics: &HeadlessGraphics,
    source: &SceneSource,
    scheduler: Arc<PassScheduler>,
    watcher: CompletionWatcher,
    profile: bool,
    handles_tx: &mpsc::Sender<(Arc<interop::PendingOperation>, interop::driver::ReadTarget)>,
) -> Result<()> {
    let context = ComputeContext::create(driver as Arc<dyn ComputeDriver>, graphics)
        .context("compute context creation failed")?;
    tracing::info!("using platform {}", context.platform_name());

    let spec = KernelSpec {
        source: include_str!("../../../shaders/reduce.wgsl").to_string(),
        plan: PlanSpec::Reduction {
            partial: "reduce_partial".to_string(),
            combine: "reduce_combine".to_string(),
        },
    };
    let config = PipelineConfig {
        no_output_image: true,
        profiling: profile,
        ..PipelineConfig::default()
    };
    let mut runner = ImageComputeRunner::new(&context, &spec, config, watcher, scheduler)
        .context("runner creation failed")?;
    handles_tx
        .send((runner.pending(), runner.results()))
        .context("control thread went away")?;

    for pass in 0..PASSES {
        let disposition = runner.update(graphics, source);
        tracing::debug!("pass {pass}: {disposition:?}");
        if profile {
            if let Some(ms) = runner.elapsed_ms() {
                tracing::info!("compute time: {ms:.3} ms");
            }
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    while !runner.try_release(graphics) {
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let profile = std::env::args().any(|arg| arg == "--profile");

    let driver = Arc::new(MockDriver::default());
    // Pretend the device produced a ramp so deliveries show real content.
    let ramp: Vec<u32> = (0..256).collect();
    driver.set_read_fill_words(&ramp);

    let graphics = HeadlessGraphics {
        next_texture: AtomicU64::new(1000),
    };
    let source = SceneSource;
    let scheduler = Arc::new(PassScheduler::default());
    let sink = HistogramSink;

    let (router, watcher) = CompletionRouter::new(
        Arc::clone(&driver) as Arc<dyn ComputeDriver>,
        Arc::clone(&scheduler) as Arc<dyn SceneUpdateScheduler>,
    );

    let (handles_tx, handles_rx) = mpsc::channel();
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let render_driver = Arc::clone(&driver);
        let render_scheduler = Arc::clone(&scheduler);
        let graphics = &graphics;
        let source = &source;
        let done = &done;
        scope.spawn(move || {
            if let Err(e) = render_thread(
                render_driver,
                graphics,
                source,
                render_scheduler,
                watcher,
                profile,
                &handles_tx,
            ) {
                tracing::error!("render thread failed: {e:?}");
            }
            done.store(true, Ordering::Release);
        });

        // Control side: drain completions as they are routed over.
        let Ok((pending, results)) = handles_rx.recv() else {
            tracing::error!("render thread never initialized");
            return;
        };
        let mut delivered = 0usize;
        loop {
            if scheduler.take() {
                tracing::debug!("another update pass was requested");
            }
            delivered += router.drain(&pending, || {
                let data = results.lock();
                sink.deliver(&data);
                Ok(())
            });
            if done.load(Ordering::Acquire) {
                // One last sweep for anything posted right before exit.
                delivered += router.drain(&pending, || {
                    let data = results.lock();
                    sink.deliver(&data);
                    Ok(())
                });
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        tracing::info!("control thread consumed {delivered} completions");
    });

    Ok(())
}
