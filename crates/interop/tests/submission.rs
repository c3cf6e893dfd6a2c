//! Submission fencing, in-flight tracking and synchronous fallbacks.

use std::sync::Arc;

use interop::driver::{ComputeDriver, MemAccess, MemId};
use interop::mock::{FailPoint, MockDriver, QueueOp};
use interop::pipeline::PlanSpec;
use interop::scene::{
    GraphicsContextProvider, GraphicsResourceId, ImageSize, NativeGraphicsBinding,
    SceneUpdateScheduler,
};
use interop::{
    ComputeContext, CompletionRouter, Error, ImagePipeline, KernelSpec, PipelineConfig,
    SubmissionOutcome,
};

struct TestGraphics;

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
        Ok(500)
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

struct NullScheduler;

impl SceneUpdateScheduler for NullScheduler {
    fn request_update(&self) {}
}

fn reduction_spec() -> KernelSpec {
    KernelSpec {
        source: "(kernel source)".to_string(),
        plan: PlanSpec::Reduction {
            partial: "reduce_partial".to_string(),
            combine: "reduce_combine".to_string(),
        },
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
    spec: &KernelSpec,
    config: PipelineConfig,
) -> (ComputeContext, ImagePipeline, MemId) {
    let context =
        ComputeContext::create(Arc::clone(driver) as Arc<dyn ComputeDriver>, &TestGraphics)
            .unwrap();
    let pipeline = ImagePipeline::new(&context, spec, config);
    let input = driver
        .wrap_texture(context.raw().unwrap(), MemAccess::ReadOnly, 5)
        .unwrap();
    (context, pipeline, input)
}

fn op_names(pipeline_ops: &[QueueOp]) -> Vec<&'static str> {
    pipeline_ops
        .iter()
        .map(|op| match op {
            QueueOp::Acquire(_) => "acquire",
            QueueOp::Release(_) => "release",
            QueueOp::Marker(_) => "marker",
            QueueOp::Dispatch { .. } => "dispatch",
            QueueOp::Read { .. } => "read",
            QueueOp::Finish => "finish",
        })
        .collect()
}


#[test]
fn at_most_one_submission_in_flight() {
    let driver = Arc::new(MockDriver::default());
    driver.set_auto_complete(false);
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());
    let size = ImageSize::new(256, 256);

    let first = pipeline.submit(input, None, size).unwrap();
    assert!(matches!(first, SubmissionOutcome::PendingAsync(_)));
    let ops_after_first = driver.all_ops().len();

    for _ in 0..4 {
        let outcome = pipeline.submit(input, None, size).unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Skipped));
    }
    // Dropped submissions left no trace on the queue.
    assert_eq!(driver.all_ops().len(), ops_after_first);
    assert!(pipeline.pending().is_submitted());
}

#[test]
fn acquire_precedes_dispatch_precedes_release() {
    let driver = Arc::new(MockDriver::default());
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());

    let outcome = pipeline.submit(input, None, ImageSize::new(1200, 600)).unwrap();
    assert!(matches!(outcome, SubmissionOutcome::PendingAsync(_)));

    let ops = driver.all_ops();
    assert_eq!(
        op_names(&ops),
        vec!["acquire", "dispatch", "dispatch", "release", "read"]
    );
    match (&ops[0], &ops[3]) {
        (QueueOp::Acquire(acquired), QueueOp::Release(released)) => {
            assert_eq!(acquired, released);
            assert_eq!(acquired.as_slice(), &[input]);
        }
        other => panic!("unexpected bracket ops: {other:?}"),
    }
}

#[test]
fn reduction_dispatch_uses_contract_geometry() {
    let driver = Arc::new(MockDriver::default());
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());

    pipeline.submit(input, None, ImageSize::new(1200, 600)).unwrap();

    let ops = driver.all_ops();
    let QueueOp::Dispatch { grid, .. } = &ops[1] else {
        panic!("expected partial dispatch, got {:?}", ops[1]);
    };
    assert_eq!(grid.global, [48, 600]);
    assert_eq!(grid.local, Some([16, 8]));

    let QueueOp::Dispatch { grid, .. } = &ops[2] else {
        panic!("expected combine dispatch, got {:?}", ops[2]);
    };
    assert_eq!(grid.global, [256, 1]);
    assert_eq!(grid.local, Some([256, 1]));
}

#[test]
fn enqueue_failure_aborts_without_matching_release() {
    let driver = Arc::new(MockDriver::default());
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());
    let size = ImageSize::new(256, 256);

    driver.fail_next(FailPoint::Dispatch);
    match pipeline.submit(input, None, size) {
        Err(Error::SubmissionFailed(_)) => {}
        other => panic!("expected SubmissionFailed, got {other:?}"),
    }

    let names = op_names(&driver.all_ops());
    assert!(names.contains(&"acquire"));
    assert!(!names.contains(&"release"), "aborted acquire must not release");
    // The in-flight slot was returned; the next pass can submit.
    assert!(!pipeline.pending().is_submitted());
    let outcome = pipeline.submit(input, None, size).unwrap();
    assert!(matches!(outcome, SubmissionOutcome::PendingAsync(_)));
}

#[test]
fn failed_acquire_enqueues_nothing() {
    let driver = Arc::new(MockDriver::default());
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());

    driver.fail_next(FailPoint::Acquire);
    assert!(pipeline.submit(input, None, ImageSize::new(64, 64)).is_err());
    assert!(driver.all_ops().is_empty());
}

#[test]
fn missing_native_sync_forces_synchronous_completion() {
    let driver = Arc::new(MockDriver::default());
    driver.set_native_sync(false);
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());

    let outcome = pipeline.submit(input, None, ImageSize::new(64, 64)).unwrap();
    match outcome {
        SubmissionOutcome::CompletedSynchronously { elapsed_ms } => {
            assert!(elapsed_ms.is_none(), "no profiling requested");
        }
        other => panic!("expected CompletedSynchronously, got {other:?}"),
    }
    assert_eq!(driver.graphics_barriers(), 1);
    let names = op_names(&driver.all_ops());
    assert_eq!(names.last(), Some(&"finish"));

    // Delivery still happens on the control side, which frees the slot.
    let (router, watcher) = CompletionRouter::new(
        Arc::clone(&driver) as Arc<dyn ComputeDriver>,
        Arc::new(NullScheduler),
    );
    assert!(pipeline.pending().is_submitted());
    watcher.notify_completed();
    let handled = router.drain(&pipeline.pending(), || Ok(()));
    assert_eq!(handled, 1);
    assert!(!pipeline.pending().is_submitted());
}

#[test]
fn profiling_reports_non_negative_elapsed_time() {
    let driver = Arc::new(MockDriver::default());
    driver.set_native_sync(false);
    let config = PipelineConfig {
        profiling: true,
        ..PipelineConfig::default()
    };
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), config);

    let outcome = pipeline.submit(input, None, ImageSize::new(64, 64)).unwrap();
    match outcome {
        SubmissionOutcome::CompletedSynchronously { elapsed_ms } => {
            let elapsed = elapsed_ms.expect("profiling must report elapsed time");
            assert!(elapsed >= 0.0);
        }
        other => panic!("expected CompletedSynchronously, got {other:?}"),
    }
    assert_eq!(pipeline.elapsed_ms().map(|ms| ms >= 0.0), Some(true));
    let names = op_names(&driver.all_ops());
    assert_eq!(names.iter().filter(|n| **n == "marker").count(), 2);
}

#[test]
fn forced_full_sync_blocks_even_with_native_sync() {
    let driver = Arc::new(MockDriver::default());
    let config = PipelineConfig {
        force_full_sync: true,
        ..PipelineConfig::default()
    };
    let (_context, mut pipeline, input) = setup(&driver, &image_spec(), config);

    let outcome = pipeline.submit(input, None, ImageSize::new(64, 64)).unwrap();
    assert!(matches!(
        outcome,
        SubmissionOutcome::CompletedSynchronously { .. }
    ));
    // Native sync present: no graphics barrier, just the queue drain.
    assert_eq!(driver.graphics_barriers(), 0);
}

#[test]
fn broken_program_leaves_pipeline_permanently_inert() {
    let driver = Arc::new(MockDriver::default());
    driver.fail_program_build(true);
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());

    assert!(pipeline.is_inert());
    for _ in 0..3 {
        let outcome = pipeline.submit(input, None, ImageSize::new(64, 64)).unwrap();
        assert!(matches!(outcome, SubmissionOutcome::NotReady));
    }
    assert!(driver.all_ops().is_empty());
}

#[test]
fn image_plan_is_fire_and_forget() {
    let driver = Arc::new(MockDriver::default());
    let (context, mut pipeline, input) = setup(&driver, &image_spec(), PipelineConfig::default());
    let output = driver
        .wrap_texture(context.raw().unwrap(), MemAccess::WriteOnly, 501)
        .unwrap();

    let first = pipeline
        .submit(input, Some(output), ImageSize::new(320, 240))
        .unwrap();
    let second = pipeline
        .submit(input, Some(output), ImageSize::new(320, 240))
        .unwrap();
    assert!(matches!(first, SubmissionOutcome::Enqueued));
    assert!(matches!(second, SubmissionOutcome::Enqueued));
    assert!(!pipeline.pending().is_submitted());

    let ops = driver.all_ops();
    let names = op_names(&ops);
    assert!(!names.contains(&"read"));
    match &ops[0] {
        QueueOp::Acquire(objects) => assert_eq!(objects.as_slice(), &[input, output]),
        other => panic!("expected acquire, got {other:?}"),
    }
    let QueueOp::Dispatch { grid, .. } = &ops[1] else {
        panic!("expected dispatch, got {:?}", ops[1]);
    };
    assert_eq!(grid.global, [320, 240]);
    assert_eq!(grid.local, None);
}

#[test]
fn partials_buffer_is_recreated_when_geometry_changes() {
    let driver = Arc::new(MockDriver::default());
    let (_context, mut pipeline, input) = setup(&driver, &reduction_spec(), PipelineConfig::default());

    // Same geometry twice: the partials buffer is reused.
    pipeline.submit(input, None, ImageSize::new(512, 8)).unwrap();
    drain_in_flight(&driver, &pipeline);
    pipeline.submit(input, None, ImageSize::new(512, 8)).unwrap();
    drain_in_flight(&driver, &pipeline);
    assert!(driver.released_mems().is_empty());

    // Different geometry: exactly one stale partials buffer released.
    pipeline.submit(input, None, ImageSize::new(2048, 64)).unwrap();
    drain_in_flight(&driver, &pipeline);
    assert_eq!(driver.released_mems().len(), 1);
}

fn drain_in_flight(driver: &Arc<MockDriver>, pipeline: &ImagePipeline) {
    let (router, watcher) = CompletionRouter::new(
        Arc::clone(driver) as Arc<dyn ComputeDriver>,
        Arc::new(NullScheduler),
    );
    watcher.notify_completed();
    router.drain(&pipeline.pending(), || Ok(()));
}
