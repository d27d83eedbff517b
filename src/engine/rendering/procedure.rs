//! ### English
//! Render procedure: owns the render thread's GL device, the off-screen frame buffer and the
//! pixel-buffer ring, and brackets every frame.
//!
//! ```text
//! Uninitialized --initialize--> Initialized --apply--> Sized --pre_render--> Rendering
//!                                                        ^                     |
//!                                                        +------ apply --------+
//! any --dispose--> Disposed
//! ```
//!
//! ### 中文
//! 渲染过程：持有渲染线程的 GL 设备、离屏 frame buffer 与像素缓冲环，并为每一帧加上前后括号。

use log::{debug, info};

use crate::engine::config::RenderConfig;
use crate::engine::error::{RenderError, Result};
use crate::engine::pipeline::RenderArgs;
use crate::engine::rendering::device::{ContextProvider, GlDevice};
use crate::engine::rendering::framebuffer::FrameBuffer;
use crate::engine::rendering::pixel_buffer::PixelBuffer;
use crate::engine::sync::CancelToken;
use crate::engine::target::RenderTargetInfo;

/// ### English
/// Lifecycle state of a [`RenderProcedure`].
///
/// ### 中文
/// [`RenderProcedure`] 的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureState {
    Uninitialized,
    /// Context bound, target at the 0×0 placeholder.
    Initialized,
    /// Target allocated at the applied size.
    Sized,
    Rendering,
    Disposed,
}

pub struct RenderProcedure<D: GlDevice> {
    state: ProcedureState,
    device: Option<D>,
    frame_buffer: FrameBuffer,
    pixels: PixelBuffer,
    frame_pending: bool,
    next_seq: u64,
}

impl<D: GlDevice> RenderProcedure<D> {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            state: ProcedureState::Uninitialized,
            device: None,
            frame_buffer: FrameBuffer::new(config.samples),
            pixels: PixelBuffer::new(
                config.effective_ring_depth(),
                config.pixel_format,
                config.spin_budget,
            )
            .with_slot_wait(config.slot_wait),
            frame_pending: false,
            next_seq: 1,
        }
    }

    pub fn state(&self) -> ProcedureState {
        self.state
    }

    pub fn target(&self) -> RenderTargetInfo {
        self.frame_buffer.target()
    }

    pub fn pixel_buffer(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// ### English
    /// Sequence number the next `post_render` will assign.
    ///
    /// ### 中文
    /// 下一次 `post_render` 将分配的帧序号。
    pub fn next_frame_seq(&self) -> u64 {
        self.next_seq
    }

    /// ### English
    /// The bound device, once initialized and until disposed.
    ///
    /// ### 中文
    /// 已绑定的设备；初始化之后、释放之前可用。
    pub fn device(&self) -> Result<&D> {
        self.device
            .as_ref()
            .ok_or_else(|| RenderError::InvalidState(format!("no GL device in {:?}", self.state)))
    }

    /// ### English
    /// Creates the primary context through `provider` and makes it current on the calling thread.
    ///
    /// ### 中文
    /// 通过 `provider` 创建主上下文，并使其在调用线程上成为 current。
    pub fn initialize<P>(&mut self, provider: &P) -> Result<()>
    where
        P: ContextProvider<Device = D>,
    {
        match self.state {
            ProcedureState::Uninitialized => {}
            ProcedureState::Disposed => {
                return Err(RenderError::InvalidState(
                    "render procedure is disposed".to_string(),
                ));
            }
            _ => return Err(RenderError::AlreadyInitialized),
        }

        let device = provider.create_primary()?;
        device.make_current();
        self.device = Some(device);
        self.state = ProcedureState::Initialized;
        info!("render procedure initialized");
        Ok(())
    }

    /// ### English
    /// Moves the frame buffer and the pixel ring to `target`.
    ///
    /// Returns `Ok(false)` when already sized for an equal target. New resources are allocated
    /// before the old ones are released, so on error the previous size stays fully usable.
    ///
    /// ### 中文
    /// 将 frame buffer 与像素环切换到 `target`。
    ///
    /// 若已按相等目标分配则返回 `Ok(false)`。新资源在旧资源释放之前分配，因此出错时旧尺寸仍完整可用。
    pub fn apply(&mut self, target: RenderTargetInfo) -> Result<bool> {
        if matches!(
            self.state,
            ProcedureState::Uninitialized | ProcedureState::Disposed
        ) {
            return Err(RenderError::InvalidState(format!(
                "cannot apply a target in {:?}",
                self.state
            )));
        }
        if target.is_empty() {
            return Err(RenderError::InvalidState(
                "cannot apply an empty target".to_string(),
            ));
        }
        if self.frame_pending {
            return Err(RenderError::InvalidState(
                "cannot resize between post_render and swap".to_string(),
            ));
        }
        if !self.frame_buffer.is_placeholder() && self.frame_buffer.target() == target {
            return Ok(false);
        }

        let Some(device) = self.device.as_ref() else {
            return Err(RenderError::InvalidState("no GL device".to_string()));
        };
        let set = self.frame_buffer.build(device, target)?;
        if let Err(error) = self.pixels.allocate(device, target) {
            set.discard(device);
            return Err(error);
        }
        self.frame_buffer.install(device, set);
        self.state = ProcedureState::Sized;
        debug!(
            "render target applied: {}x{} px",
            target.pixel_width(),
            target.pixel_height()
        );
        Ok(true)
    }

    /// ### English
    /// Binds the off-screen target for drawing.
    ///
    /// ### 中文
    /// 绑定离屏目标用于绘制。
    pub fn pre_render(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ProcedureState::Sized | ProcedureState::Rendering
        ) {
            return Err(RenderError::InvalidState(format!(
                "pre_render in {:?}",
                self.state
            )));
        }
        if self.frame_pending {
            return Err(RenderError::InvalidState(
                "pre_render called before swap".to_string(),
            ));
        }
        let device = self.device()?;
        self.frame_buffer.bind(device);
        self.state = ProcedureState::Rendering;
        Ok(())
    }

    /// ### English
    /// Waits, bounded by the configured slot wait, until the ring's write slot is free.
    ///
    /// `Ok(false)` means the downstream stages still hold every slot; the caller should skip the
    /// frame rather than render into a ring it cannot pack.
    ///
    /// ### 中文
    /// 在配置的槽位等待上限内等待环的写入槽位空闲。
    ///
    /// `Ok(false)` 表示下游阶段仍占用所有槽位；调用方应跳过本帧，而不是渲染到无法打包的环中。
    pub fn wait_writable(&self, cancel: &CancelToken) -> Result<bool> {
        self.pixels.wait_writable(cancel)
    }

    /// ### English
    /// Resolves the drawn frame (multisampled targets only) and packs it into the ring.
    ///
    /// Waits while the ring's write slot still carries an unconsumed frame; `cancel` aborts that
    /// wait and an expired slot wait fails with [`RenderError::Timeout`]. The frame buffer is
    /// unbound either way. Must be followed by exactly one [`Self::swap`] on success.
    ///
    /// ### 中文
    /// resolve 已绘制的帧（仅多重采样目标），并将其打包进环。
    ///
    /// 当环的写入槽位仍持有未消费帧时等待；`cancel` 可中止该等待，槽位等待超时则返回
    /// [`RenderError::Timeout`]。无论成功与否都会解绑 frame buffer。成功后必须恰好调用一次 [`Self::swap`]。
    pub fn post_render(&mut self, cancel: &CancelToken) -> Result<RenderArgs> {
        if self.state != ProcedureState::Rendering {
            return Err(RenderError::InvalidState(format!(
                "post_render in {:?}",
                self.state
            )));
        }
        if self.frame_pending {
            return Err(RenderError::InvalidState(
                "post_render called twice without swap".to_string(),
            ));
        }
        let Some(device) = self.device.as_ref() else {
            return Err(RenderError::InvalidState("no GL device".to_string()));
        };

        self.frame_buffer.resolve(device);
        let seq = self.next_seq;
        let packed = self.pixels.read_pixels(device, seq, cancel);
        self.frame_buffer.unbind(device);
        let frame = packed?;
        self.next_seq += 1;
        self.frame_pending = true;
        Ok(RenderArgs::new(frame, self.frame_buffer.target()))
    }

    /// ### English
    /// Advances the ring cursor past the frame produced by `post_render`.
    ///
    /// ### 中文
    /// 将环游标推进到 `post_render` 所产出帧之后。
    pub fn swap(&mut self) -> Result<()> {
        if !self.frame_pending {
            return Err(RenderError::InvalidState(
                "swap without a produced frame".to_string(),
            ));
        }
        self.pixels.swap();
        self.frame_pending = false;
        Ok(())
    }

    /// ### English
    /// Releases the ring and the frame buffer, lets `uninitialize` run against the still-current
    /// device, then unbinds and drops the context. Idempotent.
    ///
    /// ### 中文
    /// 释放环与 frame buffer，让 `uninitialize` 在设备仍为 current 时运行，然后解绑并丢弃上下文。幂等。
    pub fn dispose(&mut self, uninitialize: impl FnOnce(&D)) {
        if self.state == ProcedureState::Disposed {
            return;
        }
        if let Some(device) = self.device.take() {
            uninitialize(&device);
            self.pixels.release(&device);
            self.frame_buffer.release(&device);
            device.clear_current();
        }
        self.frame_pending = false;
        self.state = ProcedureState::Disposed;
        info!("render procedure disposed");
    }
}

impl<D: GlDevice> Drop for RenderProcedure<D> {
    fn drop(&mut self) {
        self.dispose(|_| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{FakeDevice, FakeGpu, FakeProvider};

    fn config() -> RenderConfig {
        RenderConfig::default()
    }

    fn initialized(gpu: &FakeGpu) -> RenderProcedure<FakeDevice> {
        let mut procedure = RenderProcedure::new(&config());
        procedure.initialize(&FakeProvider::new(gpu.clone())).unwrap();
        procedure
    }

    #[test]
    fn initialize_twice_is_refused() {
        let gpu = FakeGpu::new();
        let mut procedure = initialized(&gpu);
        assert_eq!(procedure.state(), ProcedureState::Initialized);
        assert!(procedure.target().is_empty());
        assert_eq!(
            procedure.initialize(&FakeProvider::new(gpu.clone())),
            Err(RenderError::AlreadyInitialized)
        );
    }

    #[test]
    fn context_failure_is_reported() {
        let gpu = FakeGpu::new();
        let mut provider = FakeProvider::new(gpu);
        provider.fail_primary = true;
        let mut procedure = RenderProcedure::<FakeDevice>::new(&config());
        assert!(matches!(
            procedure.initialize(&provider),
            Err(RenderError::ContextCreation(_))
        ));
        assert_eq!(procedure.state(), ProcedureState::Uninitialized);
    }

    #[test]
    fn frame_cycle_produces_sequenced_frames() {
        let gpu = FakeGpu::new();
        let mut procedure = initialized(&gpu);
        let cancel = CancelToken::new();
        assert!(procedure.apply(RenderTargetInfo::from_pixels(800, 600)).unwrap());
        assert!(!procedure.apply(RenderTargetInfo::from_pixels(800, 600)).unwrap());

        procedure.pre_render().unwrap();
        let first = procedure.post_render(&cancel).unwrap();
        assert!(matches!(
            procedure.post_render(&cancel),
            Err(RenderError::InvalidState(_))
        ));
        procedure.swap().unwrap();
        assert!(procedure.swap().is_err());

        procedure.pre_render().unwrap();
        let second = procedure.post_render(&cancel).unwrap();
        procedure.swap().unwrap();
        assert_eq!((first.seq(), second.seq()), (1, 2));
        assert_eq!(procedure.pixel_buffer().cursor(), 2);
        assert_eq!(procedure.state(), ProcedureState::Rendering);
    }

    #[test]
    fn failed_resize_keeps_previous_resources() {
        let gpu = FakeGpu::new();
        let mut procedure = initialized(&gpu);
        procedure.apply(RenderTargetInfo::from_pixels(800, 600)).unwrap();
        gpu.with_state(|state| state.fail_buffer_after = Some(state.buffers_created + 1));

        let error = procedure
            .apply(RenderTargetInfo::from_pixels(1920, 1080))
            .unwrap_err();
        assert!(matches!(error, RenderError::OutOfMemory { .. }));
        assert_eq!(procedure.target(), RenderTargetInfo::from_pixels(800, 600));
        assert_eq!(gpu.live_framebuffers(), 1);
        assert_eq!(gpu.live_buffers(), 3);

        procedure.pre_render().unwrap();
        let frame = procedure.post_render(&CancelToken::new()).unwrap();
        assert_eq!(frame.info().pixel_width(), 800);
    }

    #[test]
    fn failed_pack_still_unbinds_the_frame_buffer() {
        let gpu = FakeGpu::new();
        let mut procedure = RenderProcedure::new(&RenderConfig {
            ring_depth: 2,
            ..config()
        });
        procedure.initialize(&FakeProvider::new(gpu.clone())).unwrap();
        procedure.apply(RenderTargetInfo::from_pixels(64, 64)).unwrap();
        let cancel = CancelToken::new();

        let mut held = Vec::new();
        for _ in 0..2 {
            procedure.pre_render().unwrap();
            held.push(procedure.post_render(&cancel).unwrap());
            procedure.swap().unwrap();
        }

        cancel.cancel();
        assert_eq!(procedure.wait_writable(&cancel), Err(RenderError::Cancelled));
        procedure.pre_render().unwrap();
        assert!(gpu.with_state(|state| state.bound_draw.is_some()));
        assert_eq!(
            procedure.post_render(&cancel).unwrap_err(),
            RenderError::Cancelled
        );
        assert_eq!(
            gpu.with_state(|state| (state.bound_draw, state.bound_read)),
            (None, None)
        );
        assert_eq!(procedure.next_frame_seq(), 3);

        drop(held);
        let resumed = CancelToken::new();
        assert_eq!(procedure.wait_writable(&resumed), Ok(true));
        procedure.pre_render().unwrap();
        assert_eq!(procedure.post_render(&resumed).unwrap().seq(), 3);
    }

    #[test]
    fn empty_target_is_not_allocated() {
        let gpu = FakeGpu::new();
        let mut procedure = initialized(&gpu);
        assert!(procedure.apply(RenderTargetInfo::EMPTY).is_err());
        assert_eq!(gpu.with_state(|state| state.buffers_created), 0);
        assert!(procedure.pre_render().is_err());
    }

    #[test]
    fn dispose_releases_everything_once() {
        let gpu = FakeGpu::new();
        let mut procedure = initialized(&gpu);
        procedure.apply(RenderTargetInfo::from_pixels(64, 64)).unwrap();

        let mut calls = 0;
        procedure.dispose(|device| {
            assert!(device.is_current());
            calls += 1;
        });
        procedure.dispose(|_| calls += 1);
        assert_eq!(calls, 1);
        assert_eq!(procedure.state(), ProcedureState::Disposed);
        assert_eq!(gpu.live_buffers(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
        assert!(procedure.device().is_err());
    }
}
