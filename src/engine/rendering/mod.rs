//! ### English
//! Rendering module entry point.
//!
//! - `device`: the GL seam (`GlDevice`/`ContextProvider`) every other layer programs against.
//! - `framebuffer` / `pixel_buffer`: the off-screen targets and the fenced readback ring.
//! - `procedure`: per-frame lifecycle tying both together on the render thread.
//! - `shared_context` / `glow_device`: the GLFW + glow backend.
//!
//! ### 中文
//! 渲染模块入口。
//!
//! - `device`：其余各层所依赖的 GL 接缝（`GlDevice`/`ContextProvider`）。
//! - `framebuffer` / `pixel_buffer`：离屏目标与带 fence 的回读环。
//! - `procedure`：在渲染线程上串联二者的逐帧生命周期。
//! - `shared_context` / `glow_device`：GLFW + glow 后端。

mod device;
mod framebuffer;
mod glow_device;
mod pixel_buffer;
mod procedure;
mod shared_context;

pub use device::{
    ContextProvider, FenceStatus, FramebufferBinding, FramebufferObjects, GlDevice, MappedBuffer,
    NO_FENCE, with_context,
};
pub use framebuffer::{FrameBuffer, FrameBufferSet};
pub use glow_device::GlfwContextProvider;
pub use pixel_buffer::{PixelBuffer, PixelBufferSlot, SlotFrame};
pub use procedure::{ProcedureState, RenderProcedure};
pub use shared_context::{GlVersion, GlfwSharedContext};
