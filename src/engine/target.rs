//! ### English
//! Render target description: logical size plus per-axis DPI scale.
//!
//! A new value is created on every size-change notification and replaces the previous one.
//!
//! ### 中文
//! 渲染目标描述：逻辑尺寸 + 每轴 DPI 缩放。
//!
//! 每次尺寸变化通知都会创建新值并替换旧值（不做原地修改）。

use dpi::{LogicalUnit, PhysicalSize};

/// ### English
/// Bytes per pixel for the 8-bit RGBA/BGRA formats used by the transfer ring.
///
/// ### 中文
/// 传输环使用的 8 位 RGBA/BGRA 格式每像素字节数。
pub const BYTES_PER_PIXEL: usize = 4;

/// ### English
/// Rectangle in device pixels (origin is the framebuffer's lower-left corner).
///
/// ### 中文
/// 设备像素矩形（原点为 framebuffer 左下角）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// ### English
/// Immutable render target description.
///
/// Equality compares all four fields, so a DPI change at constant logical size still counts as a
/// size change.
///
/// ### 中文
/// 不可变的渲染目标描述。
///
/// 相等性比较全部四个字段，因此逻辑尺寸不变但 DPI 改变时也视为尺寸变化。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderTargetInfo {
    width: f64,
    height: f64,
    dpi_scale_x: f64,
    dpi_scale_y: f64,
}

impl RenderTargetInfo {
    /// ### English
    /// Placeholder target used before the host reports a size.
    ///
    /// ### 中文
    /// 宿主上报尺寸之前使用的占位目标。
    pub const EMPTY: RenderTargetInfo = RenderTargetInfo {
        width: 0.0,
        height: 0.0,
        dpi_scale_x: 1.0,
        dpi_scale_y: 1.0,
    };

    /// ### English
    /// Creates a target description. Invalid scale factors (zero, negative, NaN) become `1.0`.
    ///
    /// ### 中文
    /// 创建目标描述。无效缩放系数（0、负数、NaN）会被替换为 `1.0`。
    pub fn new(width: f64, height: f64, dpi_scale_x: f64, dpi_scale_y: f64) -> Self {
        Self {
            width: if width.is_finite() { width.max(0.0) } else { 0.0 },
            height: if height.is_finite() { height.max(0.0) } else { 0.0 },
            dpi_scale_x: sanitize_scale(dpi_scale_x),
            dpi_scale_y: sanitize_scale(dpi_scale_y),
        }
    }

    /// ### English
    /// Convenience constructor for a target whose logical size equals its pixel size.
    ///
    /// ### 中文
    /// 逻辑尺寸等于像素尺寸时的便捷构造函数。
    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self::new(width as f64, height as f64, 1.0, 1.0)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn dpi_scale_x(&self) -> f64 {
        self.dpi_scale_x
    }

    pub fn dpi_scale_y(&self) -> f64 {
        self.dpi_scale_y
    }

    /// ### English
    /// Width in device pixels.
    ///
    /// ### 中文
    /// 设备像素宽度。
    pub fn pixel_width(&self) -> u32 {
        LogicalUnit::new(self.width)
            .to_physical::<u32>(self.dpi_scale_x)
            .0
    }

    /// ### English
    /// Height in device pixels.
    ///
    /// ### 中文
    /// 设备像素高度。
    pub fn pixel_height(&self) -> u32 {
        LogicalUnit::new(self.height)
            .to_physical::<u32>(self.dpi_scale_y)
            .0
    }

    pub fn pixel_size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.pixel_width(), self.pixel_height())
    }

    /// ### English
    /// Byte size of one frame (`pixel_width * pixel_height * 4`).
    ///
    /// ### 中文
    /// 单帧字节数（`pixel_width * pixel_height * 4`）。
    pub fn buffer_size(&self) -> usize {
        self.pixel_width() as usize * self.pixel_height() as usize * BYTES_PER_PIXEL
    }

    /// ### English
    /// Row stride in bytes (rows are tightly packed).
    ///
    /// ### 中文
    /// 行跨度（字节），行之间紧密排列。
    pub fn stride(&self) -> usize {
        self.pixel_width() as usize * BYTES_PER_PIXEL
    }

    pub fn device_rect(&self) -> PixelRect {
        PixelRect {
            x: 0,
            y: 0,
            width: self.pixel_width(),
            height: self.pixel_height(),
        }
    }

    /// ### English
    /// Returns `true` when either pixel dimension is zero (e.g. the host window is minimized).
    ///
    /// ### 中文
    /// 任一像素维度为 0 时返回 `true`（例如宿主窗口被最小化）。
    pub fn is_empty(&self) -> bool {
        self.pixel_width() == 0 || self.pixel_height() == 0
    }
}

fn sanitize_scale(scale: f64) -> f64 {
    if dpi::validate_scale_factor(scale) {
        scale
    } else {
        1.0
    }
}
