//! ### English
//! Move-only payloads passed between pipeline stages.
//!
//! `RenderArgs` (render thread → readback) and `FrameArgs` (readback → copy) carry a claim on a
//! produced pixel-buffer frame; `CanvasArgs` (copy → commit) names the canvas slot holding the
//! copied pixels. Dropping any payload returns its backpressure permit.
//!
//! ### 中文
//! 在管线各阶段之间传递的仅可移动载荷。
//!
//! `RenderArgs`（渲染线程 → 回读）与 `FrameArgs`（回读 → 拷贝）持有对已生产像素缓冲帧的认领；
//! `CanvasArgs`（拷贝 → 提交）指向保存已拷贝像素的画布槽位。drop 任意载荷都会归还其背压许可。

use std::sync::Arc;

use crate::engine::canvas::RenderCanvas;
use crate::engine::rendering::SlotFrame;
use crate::engine::sync::FramePermit;
use crate::engine::target::RenderTargetInfo;

/// ### English
/// Frame produced by `RenderProcedure::post_render`.
///
/// ### 中文
/// 由 `RenderProcedure::post_render` 生产的帧。
#[derive(Debug)]
pub struct RenderArgs {
    frame: SlotFrame,
    info: RenderTargetInfo,
    permit: Option<FramePermit>,
}

impl RenderArgs {
    pub fn new(frame: SlotFrame, info: RenderTargetInfo) -> Self {
        Self {
            frame,
            info,
            permit: None,
        }
    }

    /// ### English
    /// Attaches the in-flight permit that returns once this frame is committed or dropped.
    ///
    /// ### 中文
    /// 附加在途许可；该帧被提交或丢弃后许可归还。
    pub fn with_permit(mut self, permit: Option<FramePermit>) -> Self {
        self.permit = permit;
        self
    }

    pub fn seq(&self) -> u64 {
        self.frame.seq()
    }

    pub fn info(&self) -> RenderTargetInfo {
        self.info
    }

    pub fn frame(&self) -> &SlotFrame {
        &self.frame
    }

    pub(crate) fn into_frame_args(self) -> FrameArgs {
        FrameArgs {
            frame: self.frame,
            info: self.info,
            permit: self.permit,
        }
    }
}

/// ### English
/// Fence-checked frame, ready for the host-side copy.
///
/// ### 中文
/// 已通过 fence 检查、可进行主机侧拷贝的帧。
#[derive(Debug)]
pub struct FrameArgs {
    frame: SlotFrame,
    info: RenderTargetInfo,
    permit: Option<FramePermit>,
}

impl FrameArgs {
    pub fn seq(&self) -> u64 {
        self.frame.seq()
    }

    pub fn info(&self) -> RenderTargetInfo {
        self.info
    }

    pub fn frame(&self) -> &SlotFrame {
        &self.frame
    }

    /// ### English
    /// Turns this frame into a canvas payload once its pixels live in `canvas` slot `slot`.
    /// The pixel-buffer claim is released here.
    ///
    /// ### 中文
    /// 当像素已位于 `canvas` 的 `slot` 槽位后，将该帧转换为画布载荷。像素缓冲认领在此释放。
    pub(crate) fn into_canvas_args(self, canvas: Arc<RenderCanvas>, slot: usize) -> CanvasArgs {
        CanvasArgs {
            canvas,
            slot,
            seq: self.frame.seq(),
            _permit: self.permit,
        }
    }
}

/// ### English
/// Copied frame waiting for the UI thread's commit.
///
/// ### 中文
/// 已拷贝、等待 UI 线程提交的帧。
#[derive(Debug)]
pub struct CanvasArgs {
    canvas: Arc<RenderCanvas>,
    slot: usize,
    seq: u64,
    _permit: Option<FramePermit>,
}

impl CanvasArgs {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn canvas(&self) -> &Arc<RenderCanvas> {
        &self.canvas
    }
}
