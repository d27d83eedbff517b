//! ### English
//! Application renderer contract.
//!
//! ### 中文
//! 应用渲染器契约。

use dpi::PhysicalSize;

use crate::engine::error::Result;
use crate::engine::rendering::GlDevice;
use crate::engine::target::RenderTargetInfo;

/// ### English
/// Per-frame information handed to the renderer and to the before/after-render events.
///
/// ### 中文
/// 传给渲染器以及 before/after-render 事件的逐帧信息。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub target: RenderTargetInfo,
    /// ### English
    /// Sequence number of the frame being drawn (starts at 1).
    ///
    /// ### 中文
    /// 正在绘制的帧序号（从 1 开始）。
    pub seq: u64,
    /// ### English
    /// `true` on the first frame after the target was (re)allocated.
    ///
    /// ### 中文
    /// 目标（重新）分配后的第一帧为 `true`。
    pub size_changed: bool,
}

/// ### English
/// Application code that draws into the off-screen target.
///
/// Every method runs on the render thread with `device`'s context current. `render` must not
/// block indefinitely; the off-screen framebuffer is already bound when it is called.
///
/// ### 中文
/// 向离屏目标绘制的应用代码。
///
/// 所有方法都在渲染线程上运行，且 `device` 的上下文为 current。`render` 不得无限期阻塞；
/// 调用时离屏 framebuffer 已绑定。
pub trait Renderer<D: GlDevice>: Send {
    fn initialize(&mut self, device: &D) -> Result<()>;

    /// ### English
    /// Returns `false` to skip this tick (nothing changed). Defaults to always rendering.
    ///
    /// ### 中文
    /// 返回 `false` 表示跳过本次 tick（无变化）。默认总是渲染。
    fn preview_render(&mut self) -> bool {
        true
    }

    fn render(&mut self, device: &D, frame: &FrameInfo) -> Result<()>;

    fn resize(&mut self, device: &D, size: PhysicalSize<u32>) -> Result<()>;

    fn uninitialize(&mut self, device: &D);
}
