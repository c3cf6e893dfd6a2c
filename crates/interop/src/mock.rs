//! Deterministic in-process driver used by tests and the demo binary.
//!
//! The mock records every queue operation in order, mints handles from one
//! counter, and fires event callbacks on a spawned thread so the rest of
//! the engine sees the same "completion arrives on some other thread"
//! contract a real driver exhibits. Failure injection hooks cover the
//! paths a healthy GPU never takes.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::driver::{
    ComputeDriver, ContextId, DeviceId, DispatchGrid, DriverError, EventId, InteropDescriptor,
    KernelArg, KernelId, MemAccess, MemId, PlatformId, PlatformInfo, ProgramId, QueueId,
    ReadTarget,
};
use crate::scene::GraphicsResourceId;

/// One recorded queue operation, in enqueue order.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOp {
    Acquire(Vec<MemId>),
    Release(Vec<MemId>),
    Marker(EventId),
    Dispatch {
        kernel: KernelId,
        args: Vec<KernelArg>,
        grid: DispatchGrid,
    },
    Read {
        source: MemId,
        event: EventId,
    },
    Finish,
}

/// Which enqueue call a one-shot injected failure should hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Acquire,
    Marker,
    Dispatch,
    Release,
    Read,
}

enum EventKind {
    Marker,
    Read { data: Vec<u8>, target: ReadTarget },
}

struct EventRecord {
    kind: EventKind,
    queued: Instant,
    completed: Option<Instant>,
    callback: Option<Box<dyn FnOnce() + Send>>,
    release_count: u32,
}

struct MemRecord {
    backing: Vec<u8>,
    #[allow(dead_code)]
    access: MemAccess,
}

struct State {
    platforms: Vec<PlatformInfo>,
    devices: HashMap<u64, DeviceId>,
    contexts: HashMap<u64, PlatformId>,
    released_contexts: u32,
    queues: HashMap<u64, Vec<QueueOp>>,
    programs: HashMap<u64, ()>,
    kernels: HashMap<u64, String>,
    mems: HashMap<u64, MemRecord>,
    released_mems: Vec<MemId>,
    events: HashMap<u64, EventRecord>,
    next_handle: u64,
    native_sync: bool,
    interop_query: bool,
    auto_complete_reads: bool,
    read_fill: Option<Vec<u8>>,
    invalid_textures: Vec<GraphicsResourceId>,
    fail_next: Option<FailPoint>,
    fail_program_build: bool,
    graphics_barriers: u32,
}

impl State {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// The mock driver. Construct with [`MockDriver::default`] for one platform
/// and one GPU device, or [`MockDriver::with_platforms`] to script platform
/// enumeration for selection tests.
pub struct MockDriver {
    state: Mutex<State>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::with_platforms(&["Mock OpenCompute"])
    }
}

impl MockDriver {
    /// A driver enumerating one named platform per entry, each with a single
    /// GPU-class device.
    #[must_use]
    pub fn with_platforms(names: &[&str]) -> Self {
        let mut next_handle = 0u64;
        let mut platforms = Vec::with_capacity(names.len());
        let mut devices = HashMap::new();
        for name in names {
            next_handle += 1;
            let platform = PlatformId(next_handle);
            next_handle += 1;
            devices.insert(platform.0, DeviceId(next_handle));
            platforms.push(PlatformInfo {
                id: platform,
                name: (*name).to_string(),
            });
        }
        Self {
            state: Mutex::new(State {
                platforms,
                devices,
                contexts: HashMap::new(),
                released_contexts: 0,
                queues: HashMap::new(),
                programs: HashMap::new(),
                kernels: HashMap::new(),
                mems: HashMap::new(),
                released_mems: Vec::new(),
                events: HashMap::new(),
                next_handle,
                native_sync: true,
                interop_query: true,
                auto_complete_reads: true,
                read_fill: None,
                invalid_textures: Vec::new(),
                fail_next: None,
                fail_program_build: false,
                graphics_barriers: 0,
            }),
        }
    }

    /// A driver with no platforms installed at all.
    #[must_use]
    pub fn without_platforms() -> Self {
        Self::with_platforms(&[])
    }

    /// Whether devices report native cross-API event support.
    pub fn set_native_sync(&self, yes: bool) {
        self.state.lock().native_sync = yes;
    }

    /// Whether the platform exposes the interop device query.
    pub fn set_interop_query(&self, yes: bool) {
        self.state.lock().interop_query = yes;
    }

    /// When false, read events stay incomplete until [`complete_event`]
    /// or a queue finish. Defaults to true.
    ///
    /// [`complete_event`]: MockDriver::complete_event
    pub fn set_auto_complete(&self, yes: bool) {
        self.state.lock().auto_complete_reads = yes;
    }

    /// Overrides the bytes deposited into read targets on completion.
    pub fn set_read_fill(&self, data: Vec<u8>) {
        self.state.lock().read_fill = Some(data);
    }

    /// Same as [`set_read_fill`](MockDriver::set_read_fill), taking the
    /// result words a reduction would have produced.
    pub fn set_read_fill_words(&self, words: &[u32]) {
        self.set_read_fill(bytemuck::cast_slice(words).to_vec());
    }

    /// Makes wrapping this texture fail with `InvalidGraphicsObject` until
    /// cleared, emulating a texture provider that is not ready yet.
    pub fn mark_texture_invalid(&self, id: GraphicsResourceId) {
        self.state.lock().invalid_textures.push(id);
    }

    pub fn clear_invalid_textures(&self) {
        self.state.lock().invalid_textures.clear();
    }

    /// Arms a one-shot failure for the next matching enqueue call.
    pub fn fail_next(&self, point: FailPoint) {
        self.state.lock().fail_next = Some(point);
    }

    /// Makes program builds fail, for inert-pipeline tests.
    pub fn fail_program_build(&self, yes: bool) {
        self.state.lock().fail_program_build = yes;
    }

    /// Stores backing bytes for a buffer, later surfaced by reads.
    pub fn write_mem(&self, mem: MemId, data: &[u8]) {
        if let Some(rec) = self.state.lock().mems.get_mut(&mem.0) {
            rec.backing = data.to_vec();
        }
    }

    /// Everything enqueued on a queue so far, in order.
    #[must_use]
    pub fn ops(&self, queue: QueueId) -> Vec<QueueOp> {
        self.state.lock().queues.get(&queue.0).cloned().unwrap_or_default()
    }

    /// Operations across all queues, in queue-creation order. Convenient
    /// when a test knows only one queue exists.
    #[must_use]
    pub fn all_ops(&self) -> Vec<QueueOp> {
        let state = self.state.lock();
        let mut ids: Vec<&u64> = state.queues.keys().collect();
        ids.sort_unstable();
        ids.into_iter()
            .flat_map(|id| state.queues[id].clone())
            .collect()
    }

    /// Number of full graphics barriers issued.
    #[must_use]
    pub fn graphics_barriers(&self) -> u32 {
        self.state.lock().graphics_barriers
    }

    /// How many times an event has been released. The contract is exactly 1.
    #[must_use]
    pub fn event_release_count(&self, event: EventId) -> u32 {
        self.state
            .lock()
            .events
            .get(&event.0)
            .map_or(0, |rec| rec.release_count)
    }

    /// Memory objects released so far, in release order.
    #[must_use]
    pub fn released_mems(&self) -> Vec<MemId> {
        self.state.lock().released_mems.clone()
    }

    /// Contexts released so far.
    #[must_use]
    pub fn released_contexts(&self) -> u32 {
        self.state.lock().released_contexts
    }

    /// Completes an event by hand, firing its callback on a new thread to
    /// stand in for the driver's completion thread. Returns the callback
    /// thread's handle, when there was a callback to run.
    pub fn complete_event(&self, event: EventId) -> Option<JoinHandle<()>> {
        let callback = {
            let mut state = self.state.lock();
            Self::complete_locked(&mut state, event)
        };
        callback.map(|cb| std::thread::spawn(cb))
    }

    fn complete_locked(state: &mut State, event: EventId) -> Option<Box<dyn FnOnce() + Send>> {
        let fill = state.read_fill.clone();
        let rec = state.events.get_mut(&event.0)?;
        if rec.completed.is_some() {
            return None;
        }
        rec.completed = Some(Instant::now());
        if let EventKind::Read { data, target } = &rec.kind {
            *target.lock() = fill.unwrap_or_else(|| data.clone());
        }
        rec.callback.take()
    }

    fn take_fail(state: &mut State, point: FailPoint) -> Result<(), DriverError> {
        if state.fail_next == Some(point) {
            state.fail_next = None;
            return Err(DriverError::Backend("injected enqueue failure"));
        }
        Ok(())
    }

    fn log(state: &mut State, queue: QueueId, op: QueueOp) -> Result<(), DriverError> {
        state
            .queues
            .get_mut(&queue.0)
            .ok_or(DriverError::Backend("unknown queue"))?
            .push(op);
        Ok(())
    }
}

impl ComputeDriver for MockDriver {
    fn enumerate_platforms(&self) -> Vec<PlatformInfo> {
        self.state.lock().platforms.clone()
    }

    fn create_context(&self, desc: &InteropDescriptor) -> Result<ContextId, DriverError> {
        let mut state = self.state.lock();
        if !state.platforms.iter().any(|p| p.id == desc.platform) {
            return Err(DriverError::Backend("unknown platform"));
        }
        let id = state.mint();
        state.contexts.insert(id, desc.platform);
        Ok(ContextId(id))
    }

    fn release_context(&self, context: ContextId) {
        let mut state = self.state.lock();
        if state.contexts.remove(&context.0).is_some() {
            state.released_contexts += 1;
        }
    }

    fn query_interop_device(
        &self,
        context: ContextId,
        _desc: &InteropDescriptor,
    ) -> Option<DeviceId> {
        let state = self.state.lock();
        if !state.interop_query {
            return None;
        }
        let platform = state.contexts.get(&context.0)?;
        state.devices.get(&platform.0).copied()
    }

    fn first_gpu_device(&self, platform: PlatformId) -> Result<DeviceId, DriverError> {
        self.state
            .lock()
            .devices
            .get(&platform.0)
            .copied()
            .ok_or(DriverError::Backend("no GPU device on platform"))
    }

    fn device_has_native_sync(&self, _device: DeviceId) -> bool {
        self.state.lock().native_sync
    }

    fn create_queue(
        &self,
        context: ContextId,
        _device: DeviceId,
        _profiling: bool,
    ) -> Result<QueueId, DriverError> {
        let mut state = self.state.lock();
        if !state.contexts.contains_key(&context.0) {
            return Err(DriverError::Backend("unknown context"));
        }
        let id = state.mint();
        state.queues.insert(id, Vec::new());
        Ok(QueueId(id))
    }

    fn release_queue(&self, queue: QueueId) {
        self.state.lock().queues.remove(&queue.0);
    }

    fn build_program(&self, context: ContextId, _source: &str) -> Result<ProgramId, DriverError> {
        let mut state = self.state.lock();
        if state.fail_program_build {
            return Err(DriverError::Backend("program build failed"));
        }
        if !state.contexts.contains_key(&context.0) {
            return Err(DriverError::Backend("unknown context"));
        }
        let id = state.mint();
        state.programs.insert(id, ());
        Ok(ProgramId(id))
    }

    fn release_program(&self, program: ProgramId) {
        self.state.lock().programs.remove(&program.0);
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId, DriverError> {
        let mut state = self.state.lock();
        if !state.programs.contains_key(&program.0) {
            return Err(DriverError::Backend("unknown program"));
        }
        let id = state.mint();
        state.kernels.insert(id, name.to_string());
        Ok(KernelId(id))
    }

    fn release_kernel(&self, kernel: KernelId) {
        self.state.lock().kernels.remove(&kernel.0);
    }

    fn wrap_texture(
        &self,
        context: ContextId,
        access: MemAccess,
        texture: GraphicsResourceId,
    ) -> Result<MemId, DriverError> {
        let mut state = self.state.lock();
        if !state.contexts.contains_key(&context.0) {
            return Err(DriverError::Backend("unknown context"));
        }
        if state.invalid_textures.contains(&texture) {
            return Err(DriverError::InvalidGraphicsObject);
        }
        let id = state.mint();
        state.mems.insert(
            id,
            MemRecord {
                backing: Vec::new(),
                access,
            },
        );
        Ok(MemId(id))
    }

    fn create_buffer(
        &self,
        context: ContextId,
        access: MemAccess,
        len: usize,
    ) -> Result<MemId, DriverError> {
        let mut state = self.state.lock();
        if !state.contexts.contains_key(&context.0) {
            return Err(DriverError::Backend("unknown context"));
        }
        let id = state.mint();
        state.mems.insert(
            id,
            MemRecord {
                backing: vec![0; len],
                access,
            },
        );
        Ok(MemId(id))
    }

    fn release_mem(&self, mem: MemId) {
        let mut state = self.state.lock();
        if state.mems.remove(&mem.0).is_some() {
            state.released_mems.push(mem);
        }
    }

    fn enqueue_acquire(&self, queue: QueueId, objects: &[MemId]) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        Self::take_fail(&mut state, FailPoint::Acquire)?;
        Self::log(&mut state, queue, QueueOp::Acquire(objects.to_vec()))
    }

    fn enqueue_release(&self, queue: QueueId, objects: &[MemId]) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        Self::take_fail(&mut state, FailPoint::Release)?;
        Self::log(&mut state, queue, QueueOp::Release(objects.to_vec()))
    }

    fn enqueue_marker(&self, queue: QueueId) -> Result<EventId, DriverError> {
        let mut state = self.state.lock();
        Self::take_fail(&mut state, FailPoint::Marker)?;
        let id = state.mint();
        let now = Instant::now();
        state.events.insert(
            id,
            EventRecord {
                kind: EventKind::Marker,
                queued: now,
                completed: Some(now),
                callback: None,
                release_count: 0,
            },
        );
        Self::log(&mut state, queue, QueueOp::Marker(EventId(id)))?;
        Ok(EventId(id))
    }

    fn enqueue_dispatch(
        &self,
        queue: QueueId,
        kernel: KernelId,
        args: &[KernelArg],
        grid: DispatchGrid,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        Self::take_fail(&mut state, FailPoint::Dispatch)?;
        if !state.kernels.contains_key(&kernel.0) {
            return Err(DriverError::Backend("unknown kernel"));
        }
        Self::log(
            &mut state,
            queue,
            QueueOp::Dispatch {
                kernel,
                args: args.to_vec(),
                grid,
            },
        )
    }

    fn enqueue_read(
        &self,
        queue: QueueId,
        source: MemId,
        target: &ReadTarget,
    ) -> Result<EventId, DriverError> {
        let mut state = self.state.lock();
        Self::take_fail(&mut state, FailPoint::Read)?;
        let data = state
            .mems
            .get(&source.0)
            .ok_or(DriverError::Backend("unknown memory object"))?
            .backing
            .clone();
        let id = state.mint();
        state.events.insert(
            id,
            EventRecord {
                kind: EventKind::Read {
                    data,
                    target: Arc::clone(target),
                },
                queued: Instant::now(),
                completed: None,
                callback: None,
                release_count: 0,
            },
        );
        Self::log(
            &mut state,
            queue,
            QueueOp::Read {
                source,
                event: EventId(id),
            },
        )?;
        if state.auto_complete_reads {
            // No callback can be registered yet; completion just lands the
            // bytes and timestamps.
            let _ = Self::complete_locked(&mut state, EventId(id));
        }
        Ok(EventId(id))
    }

    fn finish(&self, queue: QueueId) -> Result<(), DriverError> {
        let callbacks: Vec<Box<dyn FnOnce() + Send>> = {
            let mut state = self.state.lock();
            Self::log(&mut state, queue, QueueOp::Finish)?;
            let pending: Vec<EventId> = state
                .events
                .iter()
                .filter(|(_, rec)| rec.completed.is_none())
                .map(|(id, _)| EventId(*id))
                .collect();
            pending
                .into_iter()
                .filter_map(|ev| Self::complete_locked(&mut state, ev))
                .collect()
        };
        for cb in callbacks {
            std::thread::spawn(cb);
        }
        Ok(())
    }

    fn graphics_barrier(&self) {
        self.state.lock().graphics_barriers += 1;
    }

    fn set_event_callback(
        &self,
        event: EventId,
        callback: Box<dyn FnOnce() + Send>,
    ) -> Result<(), DriverError> {
        let fire_now = {
            let mut state = self.state.lock();
            let rec = state
                .events
                .get_mut(&event.0)
                .ok_or(DriverError::Backend("unknown event"))?;
            if rec.completed.is_some() {
                Some(callback)
            } else {
                rec.callback = Some(callback);
                None
            }
        };
        if let Some(cb) = fire_now {
            std::thread::spawn(cb);
        }
        Ok(())
    }

    fn release_event(&self, event: EventId) {
        if let Some(rec) = self.state.lock().events.get_mut(&event.0) {
            rec.release_count += 1;
        }
    }

    fn elapsed_ms(&self, start: EventId, end: EventId) -> Option<f64> {
        let state = self.state.lock();
        let start = state.events.get(&start.0)?;
        let end = state.events.get(&end.0)?;
        let end_at = end.completed?;
        Some(end_at.duration_since(start.queued).as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_distinct() {
        let driver = MockDriver::default();
        let platforms = driver.enumerate_platforms();
        assert_eq!(platforms.len(), 1);
        let desc = InteropDescriptor {
            platform: platforms[0].id,
            binding: crate::scene::NativeGraphicsBinding::Egl {
                context: 1,
                display: 2,
            },
        };
        let ctx = driver.create_context(&desc).unwrap();
        let dev = driver.first_gpu_device(platforms[0].id).unwrap();
        let queue = driver.create_queue(ctx, dev, false).unwrap();
        assert_ne!(ctx.0, queue.0);
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let driver = MockDriver::default();
        let desc = InteropDescriptor {
            platform: driver.enumerate_platforms()[0].id,
            binding: crate::scene::NativeGraphicsBinding::Egl {
                context: 1,
                display: 2,
            },
        };
        let ctx = driver.create_context(&desc).unwrap();
        let dev = driver.first_gpu_device(desc.platform).unwrap();
        let queue = driver.create_queue(ctx, dev, false).unwrap();
        driver.fail_next(FailPoint::Acquire);
        assert!(driver.enqueue_acquire(queue, &[]).is_err());
        assert!(driver.enqueue_acquire(queue, &[]).is_ok());
    }

    #[test]
    fn callback_on_already_completed_event_fires() {
        let driver = MockDriver::default();
        let desc = InteropDescriptor {
            platform: driver.enumerate_platforms()[0].id,
            binding: crate::scene::NativeGraphicsBinding::Egl {
                context: 1,
                display: 2,
            },
        };
        let ctx = driver.create_context(&desc).unwrap();
        let dev = driver.first_gpu_device(desc.platform).unwrap();
        let queue = driver.create_queue(ctx, dev, false).unwrap();
        let ev = driver.enqueue_marker(queue).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        driver
            .set_event_callback(ev, Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }
}
