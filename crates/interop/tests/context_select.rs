//! Platform selection and context lifecycle against the mock driver.

use std::sync::Arc;

use interop::mock::MockDriver;
use interop::scene::{
    GraphicsContextProvider, GraphicsResourceId, ImageSize, NativeGraphicsBinding,
};
use interop::{ComputeContext, ComputeDriver, Error};

struct TestGraphics {
    current: bool,
    vendor: String,
}

impl TestGraphics {
    fn with_vendor(vendor: &str) -> Self {
        Self {
            current: true,
            vendor: vendor.to_string(),
        }
    }
}

impl GraphicsContextProvider for TestGraphics {
    fn is_current(&self) -> bool {
        self.current
    }

    fn vendor(&self) -> String {
        self.vendor.clone()
    }

    fn native_binding(&self) -> NativeGraphicsBinding {
        test_binding()
    }

    fn create_texture(&self, _size: ImageSize) -> Result<GraphicsResourceId, Error> {
        Ok(100)
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

#[test]
fn vendor_heuristic_prefers_matching_platform() {
    let driver = Arc::new(MockDriver::with_platforms(&[
        "Portable Accelerator",
        "NVIDIA CUDA",
    ]));
    let graphics = TestGraphics::with_vendor("NVIDIA Corporation");
    let context = ComputeContext::create(driver, &graphics).unwrap();
    assert_eq!(context.platform_name(), "NVIDIA CUDA");
}

#[test]
fn ati_vendor_token_matches_amd_platform() {
    let driver = Arc::new(MockDriver::with_platforms(&[
        "Portable Accelerator",
        "AMD Accelerated Parallel Processing",
    ]));
    let graphics = TestGraphics::with_vendor("ATI Technologies Inc.");
    let context = ComputeContext::create(driver, &graphics).unwrap();
    assert_eq!(
        context.platform_name(),
        "AMD Accelerated Parallel Processing"
    );
}

#[test]
fn unmatched_vendor_falls_back_to_default_platform() {
    let driver = Arc::new(MockDriver::with_platforms(&["Alpha Compute", "Beta Compute"]));
    let graphics = TestGraphics::with_vendor("Gallium 0.4 on llvmpipe");
    let context = ComputeContext::create(driver, &graphics).unwrap();
    assert_eq!(context.platform_name(), "Alpha Compute");
    assert!(context.is_valid());
}

#[test]
fn no_platforms_reports_platform_unavailable() {
    let driver = Arc::new(MockDriver::without_platforms());
    let graphics = TestGraphics::with_vendor("Whatever");
    match ComputeContext::create(driver, &graphics) {
        Err(Error::PlatformUnavailable) => {}
        Err(other) => panic!("expected PlatformUnavailable, got {other:?}"),
        Ok(_) => panic!("expected PlatformUnavailable, got a context"),
    }
}

#[test]
fn missing_current_graphics_context_fails() {
    let driver = Arc::new(MockDriver::default());
    let graphics = TestGraphics {
        current: false,
        vendor: "Whatever".to_string(),
    };
    match ComputeContext::create(driver, &graphics) {
        Err(Error::ContextCreationFailed(_)) => {}
        Err(other) => panic!("expected ContextCreationFailed, got {other:?}"),
        Ok(_) => panic!("expected ContextCreationFailed, got a context"),
    }
}

#[test]
fn destroy_is_idempotent() {
    let driver = Arc::new(MockDriver::default());
    let graphics = TestGraphics::with_vendor("Whatever");
    let mut context = ComputeContext::create(Arc::clone(&driver) as Arc<dyn ComputeDriver>, &graphics).unwrap();
    assert!(context.is_valid());

    context.destroy();
    context.destroy();

    assert!(!context.is_valid());
    assert!(context.platform().is_none());
    assert!(context.device().is_none());
    assert_eq!(context.platform_name(), "");
    assert_eq!(driver.released_contexts(), 1);
}

#[test]
fn interop_query_fallback_uses_first_gpu_device() {
    let driver = Arc::new(MockDriver::default());
    driver.set_interop_query(false);
    let graphics = TestGraphics::with_vendor("Whatever");
    let context =
        ComputeContext::create(Arc::clone(&driver) as Arc<dyn ComputeDriver>, &graphics).unwrap();
    let platform = context.platform().unwrap();
    let fallback = driver.first_gpu_device(platform).unwrap();
    assert_eq!(context.device(), Some(fallback));
}

#[test]
fn drop_releases_the_native_context() {
    let driver = Arc::new(MockDriver::default());
    let graphics = TestGraphics::with_vendor("Whatever");
    {
        let _context =
            ComputeContext::create(Arc::clone(&driver) as Arc<dyn ComputeDriver>, &graphics)
                .unwrap();
    }
    assert_eq!(driver.released_contexts(), 1);
}
