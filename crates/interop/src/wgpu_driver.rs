//! wgpu-backed implementation of the driver seam.
//!
//! Adapters stand in for platforms, one device per context, WGSL compiled
//! at runtime. Kernel arguments map positionally onto bind group entries:
//! wrapped textures become (storage) texture bindings, buffers become
//! storage buffers, scalars become single-value uniform buffers, so a
//! kernel's WGSL must declare its bindings in argument order. Acquire and
//! release are recorded as no-ops — wgpu tracks cross-pass hazards itself —
//! which keeps the fencing bracket visible at this boundary without extra
//! synchronization.
//!
//! Completion callbacks fire on a per-context poll thread, which is this
//! driver's "unspecified driver thread".

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::driver::{
    ComputeDriver, ContextId, DeviceId, DispatchGrid, DriverError, EventId, InteropDescriptor,
    KernelArg, KernelId, MemAccess, MemId, PlatformId, PlatformInfo, ProgramId, QueueId,
    ReadTarget,
};
use crate::scene::GraphicsResourceId;

/// Workgroup geometry assumed for dispatches that leave grouping to the
/// backend; image kernels compiled for this driver use a matching
/// `@workgroup_size` and clamp their own edge reads.
const DEFAULT_IMAGE_LOCAL: [u32; 2] = [8, 8];

struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter: usize,
    poll_tx: Sender<()>,
    poll_thread: Option<JoinHandle<()>>,
}

struct GpuQueue {
    context: u64,
    encoder: Option<wgpu::CommandEncoder>,
    /// Marker events completing with the next submission.
    unflushed_markers: Vec<u64>,
}

struct GpuKernel {
    program: u64,
    entry: String,
    pipeline: Option<(Arc<wgpu::ComputePipeline>, Arc<wgpu::BindGroupLayout>)>,
}

enum GpuMem {
    Buffer(Arc<wgpu::Buffer>),
    Texture(Arc<wgpu::Texture>, MemAccess),
}

struct GpuEvent {
    queued: Instant,
    completed: Option<Instant>,
    callback: Option<Box<dyn FnOnce() + Send>>,
    staging: Option<Arc<wgpu::Buffer>>,
}

#[derive(Default)]
struct Registry {
    contexts: HashMap<u64, GpuContext>,
    queues: HashMap<u64, GpuQueue>,
    programs: HashMap<u64, (u64, wgpu::ShaderModule)>,
    kernels: HashMap<u64, GpuKernel>,
    mems: HashMap<u64, GpuMem>,
    textures: HashMap<GraphicsResourceId, Arc<wgpu::Texture>>,
    events: HashMap<u64, GpuEvent>,
    next_handle: u64,
    next_texture_id: GraphicsResourceId,
}

impl Registry {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

struct Inner {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
    registry: Mutex<Registry>,
}

/// GPU driver built on wgpu.
pub struct WgpuDriver {
    inner: Arc<Inner>,
}

impl WgpuDriver {
    /// Enumerates adapters on all backends.
    ///
    /// # Errors
    /// Fails when no adapter is present at all.
    pub fn try_new() -> Result<Self, DriverError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .collect();
        if adapters.is_empty() {
            return Err(DriverError::Backend("no graphics adapter found"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                instance,
                adapters,
                registry: Mutex::new(Registry::default()),
            }),
        })
    }

    /// Registers a graphics-side texture so the engine can wrap it. The
    /// returned id is what a `GraphicsResourceProvider` should report.
    #[must_use]
    pub fn register_texture(&self, texture: Arc<wgpu::Texture>) -> GraphicsResourceId {
        let mut registry = self.inner.registry.lock();
        registry.next_texture_id += 1;
        let id = registry.next_texture_id;
        registry.textures.insert(id, texture);
        id
    }

    /// Drops a previously registered texture.
    pub fn unregister_texture(&self, id: GraphicsResourceId) {
        self.inner.registry.lock().textures.remove(&id);
    }

    fn adapter_index(&self, platform: PlatformId) -> Result<usize, DriverError> {
        let index = usize::try_from(platform.0)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .ok_or(DriverError::Backend("unknown platform"))?;
        if index >= self.inner.adapters.len() {
            return Err(DriverError::Backend("unknown platform"));
        }
        Ok(index)
    }

    /// Submits the queue's open encoder, completing its markers once the
    /// device reports the submission done.
    fn flush_queue(&self, queue: QueueId) -> Result<(), DriverError> {
        let (device_queue, commands, markers) = {
            let mut registry = self.inner.registry.lock();
            let record = registry
                .queues
                .get_mut(&queue.0)
                .ok_or(DriverError::Backend("unknown queue"))?;
            let Some(encoder) = record.encoder.take() else {
                return Ok(());
            };
            let markers = std::mem::take(&mut record.unflushed_markers);
            let context = record.context;
            let context = registry
                .contexts
                .get(&context)
                .ok_or(DriverError::Backend("queue context gone"))?;
            (Arc::clone(&context.queue), encoder.finish(), markers)
        };

        device_queue.submit(Some(commands));
        if !markers.is_empty() {
            let inner = Arc::clone(&self.inner);
            device_queue.on_submitted_work_done(move || {
                let callbacks: Vec<_> = {
                    let mut registry = inner.registry.lock();
                    markers
                        .iter()
                        .filter_map(|ev| {
                            let rec = registry.events.get_mut(ev)?;
                            rec.completed = Some(Instant::now());
                            rec.callback.take()
                        })
                        .collect()
                };
                for cb in callbacks {
                    cb();
                }
            });
        }
        self.kick_poll(queue);
        Ok(())
    }

    /// Wakes the context's poll thread so pending map/submit callbacks run.
    fn kick_poll(&self, queue: QueueId) {
        let registry = self.inner.registry.lock();
        if let Some(record) = registry.queues.get(&queue.0) {
            if let Some(context) = registry.contexts.get(&record.context) {
                let _ = context.poll_tx.send(());
            }
        }
    }

    fn with_encoder<R>(
        &self,
        queue: QueueId,
        f: impl FnOnce(&wgpu::Device, &mut wgpu::CommandEncoder, &mut Registry) -> Result<R, DriverError>,
    ) -> Result<R, DriverError> {
        let mut registry = self.inner.registry.lock();
        let registry = &mut *registry;
        let record = registry
            .queues
            .get_mut(&queue.0)
            .ok_or(DriverError::Backend("unknown queue"))?;
        let device = Arc::clone(
            &registry
                .contexts
                .get(&record.context)
                .ok_or(DriverError::Backend("queue context gone"))?
                .device,
        );
        if record.encoder.is_none() {
            record.encoder = Some(device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("compute interop"),
                },
            ));
        }
        let mut encoder = record
            .encoder
            .take()
            .ok_or(DriverError::Backend("encoder missing"))?;
        let result = f(&device, &mut encoder, registry);
        if let Some(record) = registry.queues.get_mut(&queue.0) {
            record.encoder = Some(encoder);
        }
        result
    }

    fn layout_entry(
        registry: &Registry,
        binding: u32,
        arg: &KernelArg,
    ) -> Result<wgpu::BindGroupLayoutEntry, DriverError> {
        let ty = match arg {
            KernelArg::Mem(mem) => match registry
                .mems
                .get(&mem.0)
                .ok_or(DriverError::Backend("unknown memory object"))?
            {
                GpuMem::Buffer(_) => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                GpuMem::Texture(_, MemAccess::ReadOnly) => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                GpuMem::Texture(_, _) => wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
            },
            KernelArg::U32(_) | KernelArg::I32(_) | KernelArg::F32(_) => {
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                }
            }
        };
        Ok(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        })
    }
}

impl ComputeDriver for WgpuDriver {
    fn enumerate_platforms(&self) -> Vec<PlatformInfo> {
        self.inner
            .adapters
            .iter()
            .enumerate()
            .map(|(i, adapter)| {
                let info = adapter.get_info();
                PlatformInfo {
                    id: PlatformId(i as u64 + 1),
                    name: format!("{} ({:?})", info.name, info.backend),
                }
            })
            .collect()
    }

    fn create_context(&self, desc: &InteropDescriptor) -> Result<ContextId, DriverError> {
        let index = self.adapter_index(desc.platform)?;
        let adapter = &self.inner.adapters[index];
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("compute interop device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| {
            tracing::warn!("device request failed: {e}");
            DriverError::Backend("device request failed")
        })?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let (poll_tx, poll_rx) = std::sync::mpsc::channel::<()>();
        let poll_device = Arc::clone(&device);
        let poll_thread = std::thread::spawn(move || {
            while poll_rx.recv().is_ok() {
                let _ = poll_device.poll(wgpu::Maintain::Wait);
            }
        });

        let mut registry = self.inner.registry.lock();
        let id = registry.mint();
        registry.contexts.insert(
            id,
            GpuContext {
                device,
                queue,
                adapter: index,
                poll_tx,
                poll_thread: Some(poll_thread),
            },
        );
        Ok(ContextId(id))
    }

    fn release_context(&self, context: ContextId) {
        let removed = self.inner.registry.lock().contexts.remove(&context.0);
        if let Some(mut ctx) = removed {
            // Closing the channel ends the poll thread.
            drop(ctx.poll_tx);
            if let Some(thread) = ctx.poll_thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn query_interop_device(
        &self,
        context: ContextId,
        _desc: &InteropDescriptor,
    ) -> Option<DeviceId> {
        let registry = self.inner.registry.lock();
        let ctx = registry.contexts.get(&context.0)?;
        Some(DeviceId(ctx.adapter as u64 + 1))
    }

    fn first_gpu_device(&self, platform: PlatformId) -> Result<DeviceId, DriverError> {
        let index = self.adapter_index(platform)?;
        Ok(DeviceId(index as u64 + 1))
    }

    fn device_has_native_sync(&self, _device: DeviceId) -> bool {
        // Submissions on one device are ordered; no cross-API fence needed.
        true
    }

    fn create_queue(
        &self,
        context: ContextId,
        _device: DeviceId,
        _profiling: bool,
    ) -> Result<QueueId, DriverError> {
        let mut registry = self.inner.registry.lock();
        if !registry.contexts.contains_key(&context.0) {
            return Err(DriverError::Backend("unknown context"));
        }
        let id = registry.mint();
        registry.queues.insert(
            id,
            GpuQueue {
                context: context.0,
                encoder: None,
                unflushed_markers: Vec::new(),
            },
        );
        Ok(QueueId(id))
    }

    fn release_queue(&self, queue: QueueId) {
        self.inner.registry.lock().queues.remove(&queue.0);
    }

    fn build_program(&self, context: ContextId, source: &str) -> Result<ProgramId, DriverError> {
        let mut registry = self.inner.registry.lock();
        let device = Arc::clone(
            &registry
                .contexts
                .get(&context.0)
                .ok_or(DriverError::Backend("unknown context"))?
                .device,
        );
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("compute interop program"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let id = registry.mint();
        registry.programs.insert(id, (context.0, module));
        Ok(ProgramId(id))
    }

    fn release_program(&self, program: ProgramId) {
        self.inner.registry.lock().programs.remove(&program.0);
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId, DriverError> {
        let mut registry = self.inner.registry.lock();
        if !registry.programs.contains_key(&program.0) {
            return Err(DriverError::Backend("unknown program"));
        }
        let id = registry.mint();
        registry.kernels.insert(
            id,
            GpuKernel {
                program: program.0,
                entry: name.to_string(),
                pipeline: None,
            },
        );
        Ok(KernelId(id))
    }

    fn release_kernel(&self, kernel: KernelId) {
        self.inner.registry.lock().kernels.remove(&kernel.0);
    }

    fn wrap_texture(
        &self,
        context: ContextId,
        access: MemAccess,
        texture: GraphicsResourceId,
    ) -> Result<MemId, DriverError> {
        let mut registry = self.inner.registry.lock();
        if !registry.contexts.contains_key(&context.0) {
            return Err(DriverError::Backend("unknown context"));
        }
        let Some(texture) = registry.textures.get(&texture).cloned() else {
            return Err(DriverError::InvalidGraphicsObject);
        };
        let id = registry.mint();
        registry.mems.insert(id, GpuMem::Texture(texture, access));
        Ok(MemId(id))
    }

    fn create_buffer(
        &self,
        context: ContextId,
        _access: MemAccess,
        len: usize,
    ) -> Result<MemId, DriverError> {
        let mut registry = self.inner.registry.lock();
        let device = Arc::clone(
            &registry
                .contexts
                .get(&context.0)
                .ok_or(DriverError::Backend("unknown context"))?
                .device,
        );
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("compute interop buffer"),
            size: len as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let id = registry.mint();
        registry.mems.insert(id, GpuMem::Buffer(Arc::new(buffer)));
        Ok(MemId(id))
    }

    fn release_mem(&self, mem: MemId) {
        self.inner.registry.lock().mems.remove(&mem.0);
    }

    fn enqueue_acquire(&self, _queue: QueueId, _objects: &[MemId]) -> Result<(), DriverError> {
        // Hazard tracking is internal to wgpu; the bracket stays for the
        // engine's ordering contract.
        Ok(())
    }

    fn enqueue_release(&self, _queue: QueueId, _objects: &[MemId]) -> Result<(), DriverError> {
        Ok(())
    }

    fn enqueue_marker(&self, queue: QueueId) -> Result<EventId, DriverError> {
        let mut registry = self.inner.registry.lock();
        let id = registry.mint();
        registry.events.insert(
            id,
            GpuEvent {
                queued: Instant::now(),
                completed: None,
                callback: None,
                staging: None,
            },
        );
        registry
            .queues
            .get_mut(&queue.0)
            .ok_or(DriverError::Backend("unknown queue"))?
            .unflushed_markers
            .push(id);
        Ok(EventId(id))
    }

    fn enqueue_dispatch(
        &self,
        queue: QueueId,
        kernel: KernelId,
        args: &[KernelArg],
        grid: DispatchGrid,
    ) -> Result<(), DriverError> {
        self.with_encoder(queue, |device, encoder, registry| {
            let (pipeline, layout) = {
                let record = registry
                    .kernels
                    .get(&kernel.0)
                    .ok_or(DriverError::Backend("unknown kernel"))?;
                if let Some(cached) = &record.pipeline {
                    cached.clone()
                } else {
                    let entries = args
                        .iter()
                        .enumerate()
                        .map(|(i, arg)| Self::layout_entry(registry, i as u32, arg))
                        .collect::<Result<Vec<_>, _>>()?;
                    let layout =
                        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: None,
                            entries: &entries,
                        });
                    let pipeline_layout =
                        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: None,
                            bind_group_layouts: &[&layout],
                            push_constant_ranges: &[],
                        });
                    let record = registry
                        .kernels
                        .get(&kernel.0)
                        .ok_or(DriverError::Backend("unknown kernel"))?;
                    let (_, module) = registry
                        .programs
                        .get(&record.program)
                        .ok_or(DriverError::Backend("kernel program gone"))?;
                    let pipeline =
                        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some(&record.entry),
                            layout: Some(&pipeline_layout),
                            module,
                            entry_point: &record.entry,
                        });
                    let cached = (Arc::new(pipeline), Arc::new(layout));
                    if let Some(record) = registry.kernels.get_mut(&kernel.0) {
                        record.pipeline = Some(cached.clone());
                    }
                    cached
                }
            };

            // Views and scalar uniforms live until the encoder is submitted.
            let mut views = Vec::new();
            let mut uniforms = Vec::new();
            for arg in args {
                match arg {
                    KernelArg::Mem(mem) => {
                        if let Some(GpuMem::Texture(texture, _)) = registry.mems.get(&mem.0) {
                            views.push(
                                texture.create_view(&wgpu::TextureViewDescriptor::default()),
                            );
                        }
                    }
                    KernelArg::U32(v) => uniforms.push(device.create_buffer_init(
                        &wgpu::util::BufferInitDescriptor {
                            label: None,
                            contents: bytemuck::bytes_of(v),
                            usage: wgpu::BufferUsages::UNIFORM,
                        },
                    )),
                    KernelArg::I32(v) => uniforms.push(device.create_buffer_init(
                        &wgpu::util::BufferInitDescriptor {
                            label: None,
                            contents: bytemuck::bytes_of(v),
                            usage: wgpu::BufferUsages::UNIFORM,
                        },
                    )),
                    KernelArg::F32(v) => uniforms.push(device.create_buffer_init(
                        &wgpu::util::BufferInitDescriptor {
                            label: None,
                            contents: bytemuck::bytes_of(v),
                            usage: wgpu::BufferUsages::UNIFORM,
                        },
                    )),
                }
            }

            let mut view_iter = views.iter();
            let mut uniform_iter = uniforms.iter();
            let mut entries = Vec::with_capacity(args.len());
            for (i, arg) in args.iter().enumerate() {
                let resource = match arg {
                    KernelArg::Mem(mem) => match registry
                        .mems
                        .get(&mem.0)
                        .ok_or(DriverError::Backend("unknown memory object"))?
                    {
                        GpuMem::Buffer(buffer) => buffer.as_entire_binding(),
                        GpuMem::Texture(..) => {
                            let view = view_iter
                                .next()
                                .ok_or(DriverError::Backend("texture view missing"))?;
                            wgpu::BindingResource::TextureView(view)
                        }
                    },
                    _ => uniform_iter
                        .next()
                        .ok_or(DriverError::Backend("uniform buffer missing"))?
                        .as_entire_binding(),
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource,
                });
            }
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &layout,
                entries: &entries,
            });

            let local = grid.local.unwrap_or(DEFAULT_IMAGE_LOCAL);
            let groups = [
                grid.global[0].div_ceil(local[0]),
                grid.global[1].div_ceil(local[1]),
            ];

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: None,
                    timestamp_writes: None,
                });
                pass.set_pipeline(&pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups[0], groups[1], 1);
            }
            Ok(())
        })
    }

    fn enqueue_read(
        &self,
        queue: QueueId,
        source: MemId,
        target: &ReadTarget,
    ) -> Result<EventId, DriverError> {
        let (event, staging) = self.with_encoder(queue, |device, encoder, registry| {
            let GpuMem::Buffer(buffer) = registry
                .mems
                .get(&source.0)
                .ok_or(DriverError::Backend("unknown memory object"))?
            else {
                return Err(DriverError::Backend("read source is not a buffer"));
            };
            let buffer = Arc::clone(buffer);
            let staging = Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("read-back staging"),
                size: buffer.size(),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            encoder.copy_buffer_to_buffer(&buffer, 0, &staging, 0, buffer.size());
            let id = registry.mint();
            registry.events.insert(
                id,
                GpuEvent {
                    queued: Instant::now(),
                    completed: None,
                    callback: None,
                    staging: Some(Arc::clone(&staging)),
                },
            );
            Ok((EventId(id), staging))
        })?;

        // The copy has to be on the device before the map request.
        self.flush_queue(queue)?;

        let inner = Arc::clone(&self.inner);
        let target = Arc::clone(target);
        let map_source = Arc::clone(&staging);
        map_source.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let callback = {
                    let mut registry = inner.registry.lock();
                    let Some(record) = registry.events.get_mut(&event.0) else {
                        return;
                    };
                    match result {
                        Ok(()) => {
                            let mapped = staging.slice(..).get_mapped_range();
                            *target.lock() = mapped.to_vec();
                            drop(mapped);
                            staging.unmap();
                        }
                        Err(e) => {
                            tracing::warn!("read-back map failed: {e:?}");
                        }
                    }
                    record.completed = Some(Instant::now());
                    record.staging = None;
                    record.callback.take()
                };
                if let Some(cb) = callback {
                    cb();
                }
            });
        self.kick_poll(queue);
        Ok(event)
    }

    fn finish(&self, queue: QueueId) -> Result<(), DriverError> {
        self.flush_queue(queue)?;
        let device = {
            let registry = self.inner.registry.lock();
            let record = registry
                .queues
                .get(&queue.0)
                .ok_or(DriverError::Backend("unknown queue"))?;
            let context = registry
                .contexts
                .get(&record.context)
                .ok_or(DriverError::Backend("queue context gone"))?;
            Arc::clone(&context.device)
        };
        let _ = device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn graphics_barrier(&self) {
        let devices: Vec<_> = {
            let registry = self.inner.registry.lock();
            registry
                .contexts
                .values()
                .map(|ctx| Arc::clone(&ctx.device))
                .collect()
        };
        for device in devices {
            let _ = device.poll(wgpu::Maintain::Wait);
        }
    }

    fn set_event_callback(
        &self,
        event: EventId,
        callback: Box<dyn FnOnce() + Send>,
    ) -> Result<(), DriverError> {
        let fire_now = {
            let mut registry = self.inner.registry.lock();
            let record = registry
                .events
                .get_mut(&event.0)
                .ok_or(DriverError::Backend("unknown event"))?;
            if record.completed.is_some() {
                Some(callback)
            } else {
                record.callback = Some(callback);
                None
            }
        };
        if let Some(cb) = fire_now {
            std::thread::spawn(cb);
        }
        Ok(())
    }

    fn release_event(&self, event: EventId) {
        self.inner.registry.lock().events.remove(&event.0);
    }

    fn elapsed_ms(&self, start: EventId, end: EventId) -> Option<f64> {
        let registry = self.inner.registry.lock();
        let start = registry.events.get(&start.0)?;
        let end = registry.events.get(&end.0)?;
        let end_at = end.completed?;
        Some(end_at.duration_since(start.queued).as_secs_f64() * 1000.0)
    }
}
