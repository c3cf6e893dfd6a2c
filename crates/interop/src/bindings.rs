//! Wrapping of graphics textures as compute memory objects.
//!
//! The cache tracks the previously wrapped source identity and size per
//! role. Whenever either changes, the input and output wrappers are released
//! and recreated together with the engine-allocated graphics output texture,
//! because the pair must stay consistent; the caller is told to rebuild any
//! renderable representation it derived from the old pair.

use std::sync::Arc;

use crate::driver::{ComputeDriver, ContextId, DriverError, MemAccess, MemId};
use crate::scene::{GraphicsContextProvider, GraphicsResourceId, ImageSize};
use crate::Error;

/// The memory objects a submission should run against.
#[derive(Debug, Clone, Copy)]
pub struct Bindings {
    pub input: MemId,
    /// Absent for pipelines that emit a raw result instead of an image.
    pub output: Option<MemId>,
    /// True when the pair was recreated since the last successful call, so
    /// downstream renderable state must be rebuilt.
    pub rebuilt: bool,
}

struct CachedImage {
    source: GraphicsResourceId,
    mem: MemId,
}

/// Per-item cache of the wrapped input and output images.
pub struct InteropImageCache {
    driver: Arc<dyn ComputeDriver>,
    context: ContextId,
    size: ImageSize,
    input: Option<CachedImage>,
    output: Option<CachedImage>,
    output_texture: Option<GraphicsResourceId>,
    node_stale: bool,
}

impl InteropImageCache {
    #[must_use]
    pub fn new(driver: Arc<dyn ComputeDriver>, context: ContextId) -> Self {
        Self {
            driver,
            context,
            size: ImageSize::default(),
            input: None,
            output: None,
            output_texture: None,
            node_stale: false,
        }
    }

    /// Returns current bindings for the given source, recreating them when
    /// the source identity or size changed.
    ///
    /// # Errors
    /// [`Error::NotReady`] when the source id is zero or the driver reports
    /// the texture unusable — defer and retry on a later scheduled pass.
    /// [`Error::ResourceBindingFailed`] for real wrap failures; the pass is
    /// abandoned and retried on the normal update cadence.
    pub fn ensure(
        &mut self,
        graphics: &dyn GraphicsContextProvider,
        source: GraphicsResourceId,
        size: ImageSize,
        want_output: bool,
    ) -> Result<Bindings, Error> {
        if source == 0 {
            return Err(Error::NotReady);
        }

        let invalidate = match &self.input {
            Some(cached) => {
                cached.source != source
                    || self.size != size
                    || (want_output && self.output.is_none())
            }
            None => false,
        };
        if invalidate {
            tracing::debug!("source changed, recreating interop bindings");
            self.release(graphics);
            self.node_stale = true;
        }

        let input = if let Some(cached) = &self.input {
            cached.mem
        } else {
            let mem = self
                .driver
                .wrap_texture(self.context, MemAccess::ReadOnly, source)
                .map_err(|e| match e {
                    // The texture provider may not be ready yet; try again
                    // on a later pass.
                    DriverError::InvalidGraphicsObject => Error::NotReady,
                    other => {
                        tracing::warn!(
                            "failed to create compute image from input texture: {other}"
                        );
                        Error::ResourceBindingFailed(other.to_string())
                    }
                })?;
            self.input = Some(CachedImage { source, mem });
            self.size = size;
            mem
        };

        if want_output && self.output.is_none() {
            let texture = graphics.create_texture(size)?;
            match self
                .driver
                .wrap_texture(self.context, MemAccess::WriteOnly, texture)
            {
                Ok(mem) => {
                    self.output_texture = Some(texture);
                    self.output = Some(CachedImage {
                        source: texture,
                        mem,
                    });
                }
                Err(e) => {
                    tracing::warn!("failed to create compute image for output texture: {e}");
                    graphics.destroy_texture(texture);
                    return Err(Error::ResourceBindingFailed(e.to_string()));
                }
            }
        }

        Ok(Bindings {
            input,
            output: self.output.as_ref().map(|cached| cached.mem),
            rebuilt: std::mem::take(&mut self.node_stale),
        })
    }

    /// The engine-allocated texture the output image wraps, when present.
    #[must_use]
    pub fn output_texture(&self) -> Option<GraphicsResourceId> {
        self.output_texture
    }

    /// Releases the wrapped pair and the output texture. Safe to call with
    /// nothing cached.
    pub fn release(&mut self, graphics: &dyn GraphicsContextProvider) {
        self.release_mems();
        if let Some(texture) = self.output_texture.take() {
            graphics.destroy_texture(texture);
        }
    }

    fn release_mems(&mut self) {
        if let Some(cached) = self.input.take() {
            self.driver.release_mem(cached.mem);
        }
        if let Some(cached) = self.output.take() {
            self.driver.release_mem(cached.mem);
        }
    }
}

impl Drop for InteropImageCache {
    fn drop(&mut self) {
        // The graphics-side output texture needs the provider to destroy;
        // callers release it through `release`. Compute-side wrappers can
        // always be dropped here.
        self.release_mems();
    }
}
