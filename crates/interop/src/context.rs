//! Compute context creation against a live graphics context.
//!
//! Platform selection follows the graphics implementation's vendor string as
//! a best-effort hint; the native handles needed to actually share state are
//! assembled by [`build_interop_descriptor`], the one genuinely
//! platform-dependent piece, with one implementation per build target.

use std::sync::Arc;

use crate::driver::{ComputeDriver, ContextId, DeviceId, InteropDescriptor, PlatformId};
use crate::scene::{GraphicsContextProvider, NativeGraphicsBinding};
use crate::Error;

/// A compute context interoperable with the graphics context that was
/// current when it was created.
///
/// Created lazily on the render thread, exclusively owned by one visual
/// item, never migrated across threads after creation. Destroyed on scene
/// invalidation or explicit release; dropping the value destroys it too.
pub struct ComputeContext {
    driver: Arc<dyn ComputeDriver>,
    platform: Option<PlatformId>,
    platform_name: String,
    device: Option<DeviceId>,
    raw: Option<ContextId>,
}

impl ComputeContext {
    /// Creates a compute context matching the graphics context current on
    /// the calling thread.
    ///
    /// # Errors
    /// [`Error::PlatformUnavailable`] when no compute backend is installed;
    /// [`Error::ContextCreationFailed`] when no graphics context is current
    /// or the interop context request is rejected. Both are terminal for the
    /// requesting item and are not retried.
    pub fn create(
        driver: Arc<dyn ComputeDriver>,
        graphics: &dyn GraphicsContextProvider,
    ) -> Result<Self, Error> {
        tracing::debug!("creating new compute context");

        if !graphics.is_current() {
            tracing::warn!("attempted compute interop without a current graphics context");
            return Err(Error::ContextCreationFailed(
                "no graphics context current on this thread".into(),
            ));
        }

        let platforms = driver.enumerate_platforms();
        if platforms.is_empty() {
            tracing::warn!("no compute platform found");
            if cfg!(target_os = "linux") {
                tracing::warn!("could not find a compute implementation; ICD missing?");
            }
            return Err(Error::PlatformUnavailable);
        }

        let vendor = graphics.vendor();
        tracing::debug!("graphics vendor: {vendor}");
        let is_nvidia = vendor.contains("NVIDIA");
        let is_intel = vendor.contains("Intel");
        let is_amd = vendor.contains("ATI");

        tracing::debug!("found {} compute platforms", platforms.len());
        let mut chosen = &platforms[0];
        for platform in &platforms {
            tracing::debug!("platform {:?}: {}", platform.id, platform.name);
            if is_nvidia && platform.name.contains("NVIDIA") {
                chosen = platform;
            } else if is_intel && platform.name.contains("Intel") {
                chosen = platform;
            } else if is_amd && platform.name.contains("AMD") {
                chosen = platform;
            }
        }
        tracing::debug!("using platform {:?} ({})", chosen.id, chosen.name);

        let desc = build_interop_descriptor(chosen.id, graphics)?;

        let raw = driver.create_context(&desc).map_err(|e| {
            tracing::warn!("failed to create compute context: {e}");
            Error::ContextCreationFailed(e.to_string())
        })?;
        tracing::debug!("using context {raw:?}");

        let device = match driver.query_interop_device(raw, &desc) {
            Some(device) => device,
            None => {
                tracing::warn!(
                    "no interop device query on this platform, falling back to the first GPU device"
                );
                match driver.first_gpu_device(chosen.id) {
                    Ok(device) => device,
                    Err(e) => {
                        tracing::warn!("failed to get a compute device: {e}");
                        driver.release_context(raw);
                        return Err(Error::ContextCreationFailed(e.to_string()));
                    }
                }
            }
        };
        tracing::debug!("using device {device:?}");

        Ok(Self {
            driver,
            platform: Some(chosen.id),
            platform_name: chosen.name.clone(),
            device: Some(device),
            raw: Some(raw),
        })
    }

    /// True once the native context exists.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    #[must_use]
    pub fn platform(&self) -> Option<PlatformId> {
        self.platform
    }

    /// Name of the chosen platform, empty after destroy.
    #[must_use]
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    #[must_use]
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    /// The native context handle, `None` until creation succeeds.
    #[must_use]
    pub fn raw(&self) -> Option<ContextId> {
        self.raw
    }

    /// The driver this context was created on.
    #[must_use]
    pub fn driver(&self) -> Arc<dyn ComputeDriver> {
        Arc::clone(&self.driver)
    }

    /// Releases the native context and clears the platform and device
    /// handles. Idempotent. Callers must ensure no operation is pending on
    /// queues of this context.
    pub fn destroy(&mut self) {
        if let Some(raw) = self.raw.take() {
            tracing::debug!("releasing compute context {raw:?}");
            self.driver.release_context(raw);
        }
        self.device = None;
        self.platform = None;
        self.platform_name.clear();
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Assembles the native handles needed to request a context sharing state
/// with the current graphics context. macOS build: requires the CGL share
/// group.
#[cfg(target_os = "macos")]
fn build_interop_descriptor(
    platform: PlatformId,
    graphics: &dyn GraphicsContextProvider,
) -> Result<InteropDescriptor, Error> {
    match graphics.native_binding() {
        binding @ NativeGraphicsBinding::Cgl { .. } => Ok(InteropDescriptor { platform, binding }),
        other => {
            tracing::warn!("unsupported graphics binding for this target: {other:?}");
            Err(Error::ContextCreationFailed(
                "expected a CGL share group".into(),
            ))
        }
    }
}

/// Windows build: requires a WGL context and device context. A
/// GLES-over-translation stack has no usable handles and is rejected.
#[cfg(target_os = "windows")]
fn build_interop_descriptor(
    platform: PlatformId,
    graphics: &dyn GraphicsContextProvider,
) -> Result<InteropDescriptor, Error> {
    match graphics.native_binding() {
        binding @ NativeGraphicsBinding::Wgl { .. } => Ok(InteropDescriptor { platform, binding }),
        NativeGraphicsBinding::Unavailable => {
            tracing::warn!("GLES translation layers are not supported");
            Err(Error::ContextCreationFailed(
                "GLES translation layer is not supported".into(),
            ))
        }
        other => {
            tracing::warn!("unsupported graphics binding for this target: {other:?}");
            Err(Error::ContextCreationFailed(
                "expected a WGL context".into(),
            ))
        }
    }
}

/// Other unix builds: EGL preferred, GLX as the fallback. A zero context
/// handle is tolerated with a warning, matching drivers that resolve it
/// from the display alone.
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn build_interop_descriptor(
    platform: PlatformId,
    graphics: &dyn GraphicsContextProvider,
) -> Result<InteropDescriptor, Error> {
    match graphics.native_binding() {
        binding @ NativeGraphicsBinding::Egl { .. } => {
            if let NativeGraphicsBinding::Egl { context: 0, .. } = binding {
                tracing::warn!("failed to get the underlying EGL context from the graphics context");
            }
            Ok(InteropDescriptor { platform, binding })
        }
        binding @ NativeGraphicsBinding::Glx { .. } => {
            if let NativeGraphicsBinding::Glx { context: 0, .. } = binding {
                tracing::warn!("failed to get the underlying GLX context from the graphics context");
            }
            Ok(InteropDescriptor { platform, binding })
        }
        other => {
            tracing::warn!("unsupported graphics binding for this target: {other:?}");
            Err(Error::ContextCreationFailed(
                "expected an EGL or GLX context".into(),
            ))
        }
    }
}
