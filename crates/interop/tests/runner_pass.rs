//! Render-thread orchestration: deferral, node dispositions, teardown.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use interop::driver::ComputeDriver;
use interop::mock::MockDriver;
use interop::pipeline::PlanSpec;
use interop::runner::PassDisposition;
use interop::scene::{
    GraphicsContextProvider, GraphicsResourceId, GraphicsResourceProvider, ImageSize,
    NativeGraphicsBinding, SceneUpdateScheduler,
};
use interop::{
    ComputeContext, CompletionRouter, Error, ImageComputeRunner, KernelSpec, PipelineConfig,
};

struct TestGraphics {
    next_texture: RefCell<GraphicsResourceId>,
}

impl TestGraphics {
    fn new() -> Self {
        Self {
            next_texture: RefCell::new(1000),
        }
    }
}

impl GraphicsContextProvider for TestGraphics {
    fn is_current(&self) -> bool {
        true
    }

    fn vendor(&self) -> String {
        "Test".to_string()
    }

    fn native_binding(&self) -> NativeGraphicsBinding {
        test_binding()
    }

    fn create_texture(&self, _size: ImageSize) -> Result<GraphicsResourceId, Error> {
        let mut next = self.next_texture.borrow_mut();
        *next += 1;
        Ok(*next)
    }

    fn destroy_texture(&self, _id: GraphicsResourceId) {}
}

#[cfg(target_os = "macos")]
fn test_binding() -> NativeGraphicsBinding {
    NativeGraphicsBinding::Cgl { share_group: 11 }
}

#[cfg(target_os = "windows")]
fn test_binding() -> NativeGraphicsBinding {
    NativeGraphicsBinding::Wgl { context: 11, dc: 12 }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn test_binding() -> NativeGraphicsBinding {
    NativeGraphicsBinding::Egl {
        context: 11,
        display: 12,
    }
}

struct MutableSource {
    id: RefCell<GraphicsResourceId>,
    size: RefCell<ImageSize>,
}

impl GraphicsResourceProvider for MutableSource {
    fn resource_id(&self) -> GraphicsResourceId {
        *self.id.borrow()
    }

    fn size(&self) -> ImageSize {
        *self.size.borrow()
    }
}

#[derive(Default)]
struct CountingScheduler {
    requests: AtomicUsize,
}

impl SceneUpdateScheduler for CountingScheduler {
    fn request_update(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

fn image_spec() -> KernelSpec {
    KernelSpec {
        source: "(kernel source)".to_string(),
        plan: PlanSpec::Image {
            kernel: "tint".to_string(),
            extra_args: Vec::new(),
        },
    }
}

fn setup(
    driver: &Arc<MockDriver>,
    config: PipelineConfig,
) -> (
    ComputeContext,
    CompletionRouter,
    ImageComputeRunner,
    Arc<CountingScheduler>,
) {
    let scheduler = Arc::new(CountingScheduler::default());
    let context =
        ComputeContext::create(Arc::clone(driver) as Arc<dyn ComputeDriver>, &TestGraphics::new())
            .unwrap();
    let (router, watcher) = CompletionRouter::new(
        Arc::clone(driver) as Arc<dyn ComputeDriver>,
        Arc::clone(&scheduler) as Arc<dyn SceneUpdateScheduler>,
    );
    let runner = ImageComputeRunner::new(
        &context,
        &image_spec(),
        config,
        watcher,
        Arc::clone(&scheduler) as Arc<dyn SceneUpdateScheduler>,
    )
    .unwrap();
    (context, router, runner, scheduler)
}

#[test]
fn empty_source_clears_the_node() {
    let driver = Arc::new(MockDriver::default());
    let (_context, _router, mut runner, _scheduler) = setup(&driver, PipelineConfig::default());
    let graphics = TestGraphics::new();
    let source = MutableSource {
        id: RefCell::new(5),
        size: RefCell::new(ImageSize::new(0, 0)),
    };

    assert_eq!(runner.update(&graphics, &source), PassDisposition::Clear);
}

#[test]
fn not_ready_source_defers_and_requests_another_pass() {
    let driver = Arc::new(MockDriver::default());
    let (_context, _router, mut runner, scheduler) = setup(&driver, PipelineConfig::default());
    let graphics = TestGraphics::new();
    let source = MutableSource {
        id: RefCell::new(0),
        size: RefCell::new(ImageSize::new(64, 64)),
    };

    assert_eq!(runner.update(&graphics, &source), PassDisposition::Keep);
    assert_eq!(scheduler.requests.load(Ordering::SeqCst), 1);

    // Source becomes ready; the retried pass proceeds.
    *source.id.borrow_mut() = 5;
    assert_eq!(runner.update(&graphics, &source), PassDisposition::Keep);
    assert!(runner.output_texture().is_some());
}

#[test]
fn source_change_reports_a_rebuild_with_the_new_texture() {
    let driver = Arc::new(MockDriver::default());
    let (_context, _router, mut runner, _scheduler) = setup(&driver, PipelineConfig::default());
    let graphics = TestGraphics::new();
    let source = MutableSource {
        id: RefCell::new(5),
        size: RefCell::new(ImageSize::new(64, 64)),
    };

    assert_eq!(runner.update(&graphics, &source), PassDisposition::Keep);
    let first_texture = runner.output_texture().unwrap();

    *source.size.borrow_mut() = ImageSize::new(128, 128);
    match runner.update(&graphics, &source) {
        PassDisposition::Rebuild { output_texture } => {
            let texture = output_texture.unwrap();
            assert_ne!(texture, first_texture);
            assert_eq!(runner.output_texture(), Some(texture));
        }
        other => panic!("expected Rebuild, got {other:?}"),
    }
}

#[test]
fn raw_result_runner_never_allocates_an_output_texture() {
    let driver = Arc::new(MockDriver::default());
    let config = PipelineConfig {
        no_output_image: true,
        ..PipelineConfig::default()
    };
    let (_context, router, mut runner, _scheduler) = setup(&driver, config);
    let graphics = TestGraphics::new();
    let source = MutableSource {
        id: RefCell::new(5),
        size: RefCell::new(ImageSize::new(64, 64)),
    };

    // Image plan with no output: nothing renderable, nothing to rebuild.
    assert_eq!(runner.update(&graphics, &source), PassDisposition::Keep);
    assert!(runner.output_texture().is_none());
    // The embedder reads the source property name off the config.
    assert_eq!(runner.config().source_attribute, "source");
    drop(router);
}

#[test]
fn release_waits_for_the_outstanding_operation() {
    let driver = Arc::new(MockDriver::default());
    driver.set_auto_complete(false);
    let scheduler = Arc::new(CountingScheduler::default());
    let context =
        ComputeContext::create(Arc::clone(&driver) as Arc<dyn ComputeDriver>, &TestGraphics::new())
            .unwrap();
    let (router, watcher) = CompletionRouter::new(
        Arc::clone(&driver) as Arc<dyn ComputeDriver>,
        Arc::clone(&scheduler) as Arc<dyn SceneUpdateScheduler>,
    );
    let spec = KernelSpec {
        source: "(kernel source)".to_string(),
        plan: PlanSpec::Reduction {
            partial: "reduce_partial".to_string(),
            combine: "reduce_combine".to_string(),
        },
    };
    let config = PipelineConfig {
        no_output_image: true,
        ..PipelineConfig::default()
    };
    let mut runner = ImageComputeRunner::new(
        &context,
        &spec,
        config,
        watcher,
        Arc::clone(&scheduler) as Arc<dyn SceneUpdateScheduler>,
    )
    .unwrap();
    let graphics = TestGraphics::new();
    let source = MutableSource {
        id: RefCell::new(5),
        size: RefCell::new(ImageSize::new(64, 64)),
    };

    runner.update(&graphics, &source);
    assert!(runner.pending().is_submitted());
    assert!(!runner.try_release(&graphics), "must refuse while in flight");

    // Completion arrives and is consumed; release then proceeds.
    let pending = runner.pending();
    let ops = driver.all_ops();
    let event = ops
        .iter()
        .find_map(|op| match op {
            interop::mock::QueueOp::Read { event, .. } => Some(*event),
            _ => None,
        })
        .unwrap();
    if let Some(handle) = driver.complete_event(event) {
        handle.join().unwrap();
    }
    while router.drain(&pending, || Ok(())) == 0 {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(runner.try_release(&graphics));
}
