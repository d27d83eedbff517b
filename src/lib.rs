//! ### English
//! `gl_host_surface`: renders with OpenGL on a dedicated thread and delivers finished frames to a
//! host UI surface through a fenced pixel-buffer ring and a parallel copy pipeline.
//!
//! The embedder starts a [`RenderHost`] with a [`ContextProvider`] and a [`Renderer`], drives it
//! with visibility, size and invalidation updates, and calls [`Presenter::commit`] from its UI
//! thread to paint the newest frame.
//!
//! The building blocks under the host are public as well: [`RenderProcedure`] with its
//! [`FrameBuffer`] and [`PixelBuffer`] ring, the [`RenderArgs`]/[`FrameArgs`] payloads, and the
//! frame synchronization primitives ([`FrameGate`], [`FrameSemaphore`], [`Completion`]).
//!
//! ### 中文
//! `gl_host_surface`：在独立线程上使用 OpenGL 渲染，并通过带 fence 的像素 buffer 环与并行拷贝
//! 管线将完成的帧交付给宿主 UI 表面。
//!
//! 嵌入方使用 [`ContextProvider`] 与 [`Renderer`] 启动 [`RenderHost`]，通过可见性、尺寸与失效
//! 更新驱动它，并在 UI 线程调用 [`Presenter::commit`] 绘制最新帧。
//!
//! 宿主之下的构件同样公开：[`RenderProcedure`] 及其 [`FrameBuffer`] 与 [`PixelBuffer`] 环、
//! [`RenderArgs`]/[`FrameArgs`] 载荷，以及帧同步原语（[`FrameGate`]、[`FrameSemaphore`]、
//! [`Completion`]）。
mod engine;

pub use engine::canvas::{DrawBatch, FrameView, PaintSurface};
pub use engine::config::{
    DECLINED_RENDER_SLEEP, DEFAULT_RING_DEPTH, FrameGating, InvalidationDriver, PixelFormat,
    RenderConfig, RenderTactic, SLOT_WAIT, TacticProfile,
};
pub use engine::error::{PipelineFault, PipelineStage, RenderError, RenderPhase, Result};
pub use engine::glfw::{EmbedderGlfwApi, GlfwWindowPtr, install_embedder_glfw_api};
pub use engine::pipeline::{FrameArgs, Presenter, RenderArgs};
pub use engine::rendering::{
    ContextProvider, FenceStatus, FrameBuffer, FrameBufferSet, FramebufferBinding,
    FramebufferObjects, GlDevice, GlVersion, GlfwContextProvider, GlfwSharedContext, MappedBuffer,
    NO_FENCE, PixelBuffer, PixelBufferSlot, ProcedureState, RenderProcedure, SlotFrame,
    with_context,
};
pub use engine::runtime::{
    FrameInfo, FrameStatsSnapshot, RenderErrorEvent, RenderEvents, RenderHost, Renderer,
};
pub use engine::sync::{
    CancelToken, Completion, FrameGate, FramePermit, FrameSemaphore, GateWake,
};
pub use engine::target::{PixelRect, RenderTargetInfo};
