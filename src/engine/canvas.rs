//! ### English
//! Render canvas: multi-buffered host memory that receives copied frames, plus the UI-side paint
//! seam the commit stage draws into.
//!
//! ### 中文
//! 渲染画布：接收已拷贝帧的多缓冲主机内存，以及提交阶段绘制所用的 UI 侧绘制接缝。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::engine::config::PixelFormat;
use crate::engine::pipeline::FrameArgs;
use crate::engine::target::RenderTargetInfo;

/// ### English
/// Borrowed view of one copied frame, handed to [`PaintSurface::draw_frame`].
///
/// Rows are stored bottom-up (GL readback order) when `bottom_up` is set; the surface flips
/// while drawing.
///
/// ### 中文
/// 单个已拷贝帧的借用视图，传给 [`PaintSurface::draw_frame`]。
///
/// `bottom_up` 为真时行按自下而上（GL 回读顺序）存储；由绘制表面在绘制时翻转。
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub pixels: &'a [u8],
    pub info: RenderTargetInfo,
    pub seq: u64,
    pub stride: usize,
    pub format: PixelFormat,
    pub bottom_up: bool,
}

impl FrameView<'_> {
    /// ### English
    /// Returns row `y` counted from the top of the image.
    ///
    /// ### 中文
    /// 返回从图像顶部开始计数的第 `y` 行。
    pub fn row_from_top(&self, y: usize) -> Option<&[u8]> {
        let height = self.info.pixel_height() as usize;
        if y >= height {
            return None;
        }
        let row = if self.bottom_up { height - 1 - y } else { y };
        let start = row * self.stride;
        self.pixels.get(start..start + self.stride)
    }
}

/// ### English
/// The UI toolkit's paint batch. Implemented by the host; called on the UI thread only.
///
/// ### 中文
/// UI 工具包的绘制批次。由宿主实现；只在 UI 线程调用。
pub trait PaintSurface {
    fn begin_draw(&mut self);
    fn draw_frame(&mut self, frame: &FrameView<'_>);
    fn end_draw(&mut self);
}

/// ### English
/// Scoped draw batch: `begin_draw` on creation, `end_draw` on drop (also during unwinding).
///
/// ### 中文
/// 作用域绘制批次：创建时 `begin_draw`，drop 时 `end_draw`（unwind 时同样执行）。
pub struct DrawBatch<'a> {
    surface: &'a mut dyn PaintSurface,
}

impl<'a> DrawBatch<'a> {
    pub fn begin(surface: &'a mut dyn PaintSurface) -> Self {
        surface.begin_draw();
        Self { surface }
    }

    pub fn draw(&mut self, frame: &FrameView<'_>) {
        self.surface.draw_frame(frame);
    }
}

impl Drop for DrawBatch<'_> {
    fn drop(&mut self) {
        self.surface.end_draw();
    }
}

#[derive(Default)]
struct CanvasSlot {
    pixels: Vec<u8>,
    info: RenderTargetInfo,
    seq: u64,
}

/// ### English
/// Fixed set of host-side frame slots shared by the copy workers and the UI thread.
///
/// Every slot has its own lock, held only for the copy into it or the draw out of it.
///
/// ### 中文
/// 由拷贝工作线程与 UI 线程共享的固定数量主机侧帧槽位。
///
/// 每个槽位有独立的锁，只在拷入或绘出期间持有。
pub struct RenderCanvas {
    slots: Vec<Mutex<CanvasSlot>>,
    cursor: AtomicUsize,
    format: PixelFormat,
}

impl RenderCanvas {
    /// ### English
    /// Creates a canvas with `slot_count` slots (at least 2).
    ///
    /// ### 中文
    /// 创建拥有 `slot_count` 个槽位（至少 2 个）的画布。
    pub fn new(slot_count: usize, format: PixelFormat) -> Arc<Self> {
        let slots = (0..slot_count.max(2))
            .map(|_| Mutex::new(CanvasSlot::default()))
            .collect();
        Arc::new(Self {
            slots,
            cursor: AtomicUsize::new(0),
            format,
        })
    }

    /// ### English
    /// Copies `frame` out of its pixel-buffer slot into the next canvas slot.
    ///
    /// Returns the canvas slot index, or `None` when the frame had already been consumed (the
    /// canvas slot is left untouched in that case).
    ///
    /// ### 中文
    /// 将 `frame` 从其像素缓冲槽位拷贝到下一个画布槽位。
    ///
    /// 返回画布槽位下标；若该帧已被消费则返回 `None`（此时画布槽位不变）。
    pub fn copy_frame(&self, frame: &FrameArgs) -> Option<usize> {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel) % self.slots.len();
        let info = frame.info();
        let mut slot = self.slots[index].lock();
        let size = info.buffer_size();
        if slot.pixels.len() != size {
            if !frame.frame().is_live() {
                return None;
            }
            slot.pixels.resize(size, 0);
            slot.seq = 0;
        }
        if !frame.frame().copy_to(&mut slot.pixels) {
            return None;
        }
        slot.info = info;
        slot.seq = frame.seq();
        Some(index)
    }

    /// ### English
    /// Draws slot `index` into `batch` if it still holds frame `seq`.
    ///
    /// Returns `false` when a newer copy already reused the slot.
    ///
    /// ### 中文
    /// 若槽位 `index` 仍保存帧 `seq`，则将其绘制到 `batch`。
    ///
    /// 若该槽位已被更新的拷贝复用则返回 `false`。
    pub fn draw(&self, index: usize, seq: u64, batch: &mut DrawBatch<'_>) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };
        let slot = slot.lock();
        if slot.seq != seq || slot.pixels.is_empty() {
            return false;
        }
        batch.draw(&FrameView {
            pixels: &slot.pixels,
            info: slot.info,
            seq: slot.seq,
            stride: slot.info.stride(),
            format: self.format,
            bottom_up: true,
        });
        true
    }
}

impl std::fmt::Debug for RenderCanvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCanvas")
            .field("slots", &self.slots.len())
            .field("format", &self.format)
            .finish()
    }
}
