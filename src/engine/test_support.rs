//! In-memory GL device, context provider, scripted renderer and recording paint surface used by
//! the unit tests.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::canvas::{FrameView, PaintSurface};
use crate::engine::config::PixelFormat;
use crate::engine::error::{RenderError, Result};
use crate::engine::rendering::{
    ContextProvider, FenceStatus, FramebufferBinding, FramebufferObjects, GlDevice, MappedBuffer,
    NO_FENCE,
};
use crate::engine::runtime::{FrameInfo, Renderer};
use crate::engine::target::PixelRect;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub(crate) struct FakeGpuState {
    next_name: u32,
    next_fence: u64,
    buffers: HashMap<u32, (usize, usize)>,
    pub buffers_created: usize,
    pub buffers_deleted: usize,
    framebuffers: HashSet<u32>,
    pub framebuffers_created: usize,
    pub framebuffers_deleted: usize,
    fences: HashMap<u64, bool>,
    pub fences_created: usize,
    pub fences_deleted: usize,
    pub auto_signal: bool,
    pub fail_buffer_after: Option<usize>,
    pub fail_framebuffers: bool,
    pub fail_fence_wait: bool,
    pub packs: usize,
    pub blits: usize,
    pub last_pack: Option<PixelRect>,
    pub bound_draw: Option<u32>,
    pub bound_read: Option<u32>,
}

impl Drop for FakeGpuState {
    fn drop(&mut self) {
        for (_, (ptr, len)) in self.buffers.drain() {
            unsafe { free_bytes(ptr, len) };
        }
    }
}

unsafe fn free_bytes(ptr: usize, len: usize) {
    let slice = std::ptr::slice_from_raw_parts_mut(ptr as *mut u8, len);
    drop(unsafe { Box::from_raw(slice) });
}

/// Shared fake GPU. Every device created from it sees the same objects, like a share group.
#[derive(Clone)]
pub(crate) struct FakeGpu {
    state: Arc<Mutex<FakeGpuState>>,
}

impl FakeGpu {
    pub fn new() -> Self {
        let mut state = FakeGpuState::default();
        state.next_name = 1;
        state.next_fence = 1;
        state.auto_signal = true;
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn device(&self) -> FakeDevice {
        FakeDevice {
            gpu: self.clone(),
            current: Cell::new(false),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeGpuState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    pub fn set_auto_signal(&self, auto_signal: bool) {
        self.state.lock().auto_signal = auto_signal;
    }

    /// Signals every outstanding fence.
    pub fn signal_all(&self) {
        for signaled in self.state.lock().fences.values_mut() {
            *signaled = true;
        }
    }
}

pub(crate) struct FakeDevice {
    gpu: FakeGpu,
    current: Cell<bool>,
}

impl FakeDevice {
    pub fn is_current(&self) -> bool {
        self.current.get()
    }

    pub fn gpu(&self) -> &FakeGpu {
        &self.gpu
    }
}

impl GlDevice for FakeDevice {
    fn make_current(&self) {
        self.current.set(true);
    }

    fn clear_current(&self) {
        self.current.set(false);
    }

    fn create_framebuffer(
        &self,
        width: u32,
        height: u32,
        samples: u32,
    ) -> Result<FramebufferObjects> {
        let mut state = self.gpu.state.lock();
        if state.fail_framebuffers {
            return Err(RenderError::OutOfMemory {
                bytes: width as usize * height as usize * 4,
                reason: "fake framebuffer allocation failure".to_string(),
            });
        }
        let framebuffer = state.next_name;
        state.next_name += 3;
        state.framebuffers.insert(framebuffer);
        state.framebuffers_created += 1;
        Ok(FramebufferObjects {
            framebuffer,
            color: framebuffer + 1,
            depth_stencil: framebuffer + 2,
            samples,
            width,
            height,
        })
    }

    fn delete_framebuffer(&self, objects: &FramebufferObjects) {
        let mut state = self.gpu.state.lock();
        if state.framebuffers.remove(&objects.framebuffer) {
            state.framebuffers_deleted += 1;
        }
    }

    fn bind_framebuffer(&self, binding: FramebufferBinding, objects: Option<&FramebufferObjects>) {
        let mut state = self.gpu.state.lock();
        let name = objects.map(|objects| objects.framebuffer);
        match binding {
            FramebufferBinding::Draw => state.bound_draw = name,
            FramebufferBinding::Read => state.bound_read = name,
            FramebufferBinding::Both => {
                state.bound_draw = name;
                state.bound_read = name;
            }
        }
    }

    fn blit_color(&self, _width: u32, _height: u32) {
        self.gpu.state.lock().blits += 1;
    }

    fn set_viewport(&self, _rect: PixelRect) {}

    fn create_mapped_buffer(&self, len: usize) -> Result<MappedBuffer> {
        let mut state = self.gpu.state.lock();
        if let Some(limit) = state.fail_buffer_after {
            if state.buffers_created >= limit {
                return Err(RenderError::OutOfMemory {
                    bytes: len,
                    reason: "fake buffer allocation failure".to_string(),
                });
            }
        }
        let name = state.next_name;
        state.next_name += 1;
        state.buffers_created += 1;
        let memory: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(memory) as *mut u8;
        state.buffers.insert(name, (raw as usize, len));
        let ptr = std::ptr::NonNull::new(raw).ok_or_else(|| RenderError::Gpu("null".into()))?;
        Ok(unsafe { MappedBuffer::new(name, ptr, len) })
    }

    fn delete_mapped_buffer(&self, buffer: MappedBuffer) {
        let mut state = self.gpu.state.lock();
        if let Some((ptr, len)) = state.buffers.remove(&buffer.name()) {
            state.buffers_deleted += 1;
            unsafe { free_bytes(ptr, len) };
        }
    }

    fn pack_pixels(&self, buffer: &MappedBuffer, rect: PixelRect, _format: PixelFormat) {
        let mut state = self.gpu.state.lock();
        state.packs += 1;
        state.last_pack = Some(rect);
        let fill = (state.packs % 251) as u8;
        if state.buffers.contains_key(&buffer.name()) {
            unsafe { std::ptr::write_bytes(buffer.as_ptr(), fill, buffer.len()) };
        }
    }

    fn insert_fence(&self) -> Result<u64> {
        let mut state = self.gpu.state.lock();
        let fence = state.next_fence;
        state.next_fence += 1;
        let signaled = state.auto_signal;
        state.fences.insert(fence, signaled);
        state.fences_created += 1;
        Ok(fence)
    }

    fn client_wait(&self, fence: u64, _timeout: Duration) -> FenceStatus {
        let state = self.gpu.state.lock();
        if state.fail_fence_wait || fence == NO_FENCE {
            return FenceStatus::Failed;
        }
        match state.fences.get(&fence) {
            Some(true) => FenceStatus::Signaled,
            Some(false) => FenceStatus::Pending,
            None => FenceStatus::Failed,
        }
    }

    fn delete_fence(&self, fence: u64) {
        let mut state = self.gpu.state.lock();
        if state.fences.remove(&fence).is_some() {
            state.fences_deleted += 1;
        }
    }
}

/// Context provider over one [`FakeGpu`].
pub(crate) struct FakeProvider {
    pub gpu: FakeGpu,
    pub fail_primary: bool,
    pub fail_shared: bool,
}

impl FakeProvider {
    pub fn new(gpu: FakeGpu) -> Self {
        Self {
            gpu,
            fail_primary: false,
            fail_shared: false,
        }
    }
}

impl ContextProvider for FakeProvider {
    type Device = FakeDevice;

    fn create_primary(&self) -> Result<FakeDevice> {
        if self.fail_primary {
            return Err(RenderError::ContextCreation(
                "fake primary context refused".to_string(),
            ));
        }
        Ok(self.gpu.device())
    }

    fn create_shared(&self) -> Result<FakeDevice> {
        if self.fail_shared {
            return Err(RenderError::ContextCreation(
                "fake shared context refused".to_string(),
            ));
        }
        Ok(self.gpu.device())
    }
}

/// Observable counters of a [`ScriptedRenderer`].
#[derive(Default)]
pub(crate) struct RendererLog {
    pub initialized: usize,
    pub uninitialized: usize,
    pub renders: Vec<u64>,
    pub resizes: Vec<(u32, u32)>,
}

/// Renderer whose behavior is scripted per render call (1-based).
pub(crate) struct ScriptedRenderer {
    pub log: Arc<Mutex<RendererLog>>,
    pub fail_on_call: Option<usize>,
    pub panic_on_call: Option<usize>,
    pub decline: bool,
    calls: usize,
}

impl ScriptedRenderer {
    pub fn new() -> (Self, Arc<Mutex<RendererLog>>) {
        let log = Arc::new(Mutex::new(RendererLog::default()));
        (
            Self {
                log: log.clone(),
                fail_on_call: None,
                panic_on_call: None,
                decline: false,
                calls: 0,
            },
            log,
        )
    }
}

impl Renderer<FakeDevice> for ScriptedRenderer {
    fn initialize(&mut self, _device: &FakeDevice) -> Result<()> {
        self.log.lock().initialized += 1;
        Ok(())
    }

    fn preview_render(&mut self) -> bool {
        !self.decline
    }

    fn render(&mut self, device: &FakeDevice, frame: &FrameInfo) -> Result<()> {
        assert!(device.is_current());
        self.calls += 1;
        if self.panic_on_call == Some(self.calls) {
            panic!("scripted panic on call {}", self.calls);
        }
        if self.fail_on_call == Some(self.calls) {
            return Err(RenderError::Renderer(format!(
                "scripted failure on call {}",
                self.calls
            )));
        }
        self.log.lock().renders.push(frame.seq);
        Ok(())
    }

    fn resize(&mut self, _device: &FakeDevice, size: dpi::PhysicalSize<u32>) -> Result<()> {
        self.log.lock().resizes.push((size.width, size.height));
        Ok(())
    }

    fn uninitialize(&mut self, _device: &FakeDevice) {
        self.log.lock().uninitialized += 1;
    }
}

/// Paint surface that records every batch it sees.
#[derive(Default)]
pub(crate) struct RecordingSurface {
    pub batches_open: usize,
    pub batches_closed: usize,
    pub frames: Vec<(u64, u32, u32, u8)>,
}

impl PaintSurface for RecordingSurface {
    fn begin_draw(&mut self) {
        assert_eq!(self.batches_open, self.batches_closed, "nested draw batch");
        self.batches_open += 1;
    }

    fn draw_frame(&mut self, frame: &FrameView<'_>) {
        assert_eq!(self.batches_open, self.batches_closed + 1, "draw outside batch");
        let first = frame.pixels.first().copied().unwrap_or(0);
        self.frames
            .push((frame.seq, frame.info.pixel_width(), frame.info.pixel_height(), first));
    }

    fn end_draw(&mut self) {
        self.batches_closed += 1;
    }
}
