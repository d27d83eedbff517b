//! ### English
//! Off-screen render target: color + depth/stencil attachments, optionally multisampled, with an
//! explicit resolve into a single-sample framebuffer before readback.
//!
//! ### 中文
//! 离屏渲染目标：颜色 + 深度/模板附件，可选多重采样；回读前显式 resolve 到单采样 framebuffer。

use log::debug;

use crate::engine::error::Result;
use crate::engine::rendering::device::{FramebufferBinding, FramebufferObjects, GlDevice};
use crate::engine::target::RenderTargetInfo;

/// ### English
/// GL objects allocated for one target size but not yet installed.
///
/// Returned by [`FrameBuffer::build`] so a resize can allocate everything it needs before any
/// previous resource is released.
///
/// ### 中文
/// 已为某个目标尺寸分配、但尚未安装的 GL 对象。
///
/// 由 [`FrameBuffer::build`] 返回，使 resize 能在释放任何旧资源之前分配好所需的一切。
#[derive(Debug)]
#[must_use = "a built frame buffer set must be installed or discarded"]
pub struct FrameBufferSet {
    target: RenderTargetInfo,
    draw: FramebufferObjects,
    resolve: Option<FramebufferObjects>,
}

impl FrameBufferSet {
    pub fn target(&self) -> RenderTargetInfo {
        self.target
    }

    /// ### English
    /// Deletes the objects of a set that will not be installed.
    ///
    /// ### 中文
    /// 删除不会被安装的对象集合。
    pub fn discard<D: GlDevice + ?Sized>(self, device: &D) {
        delete_objects(device, &self.draw, self.resolve.as_ref());
    }
}

fn delete_objects<D: GlDevice + ?Sized>(
    device: &D,
    draw: &FramebufferObjects,
    resolve: Option<&FramebufferObjects>,
) {
    if let Some(resolve) = resolve {
        device.delete_framebuffer(resolve);
    }
    device.delete_framebuffer(draw);
}

/// ### English
/// Owner of the render thread's off-screen framebuffer.
///
/// Starts at the 0×0 placeholder with no GL objects; [`Self::install`] moves it to a real size.
///
/// ### 中文
/// 渲染线程离屏 framebuffer 的持有者。
///
/// 初始处于 0×0 占位状态且没有 GL 对象；[`Self::install`] 将其切换到真实尺寸。
#[derive(Debug)]
pub struct FrameBuffer {
    samples: u32,
    target: RenderTargetInfo,
    draw: Option<FramebufferObjects>,
    resolve: Option<FramebufferObjects>,
}

impl FrameBuffer {
    /// ### English
    /// Creates the placeholder target. `samples <= 1` disables multisampling.
    ///
    /// ### 中文
    /// 创建占位目标。`samples <= 1` 表示关闭多重采样。
    pub fn new(samples: u32) -> Self {
        Self {
            samples: if samples > 1 { samples } else { 0 },
            target: RenderTargetInfo::EMPTY,
            draw: None,
            resolve: None,
        }
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn is_multisampled(&self) -> bool {
        self.samples > 1
    }

    pub fn target(&self) -> RenderTargetInfo {
        self.target
    }

    pub fn is_placeholder(&self) -> bool {
        self.draw.is_none()
    }

    /// ### English
    /// Allocates the draw framebuffer (and the resolve framebuffer when multisampled) for
    /// `target` without touching the installed ones.
    ///
    /// ### 中文
    /// 为 `target` 分配绘制 framebuffer（多重采样时还有 resolve framebuffer），不触碰已安装的对象。
    pub fn build<D: GlDevice + ?Sized>(
        &self,
        device: &D,
        target: RenderTargetInfo,
    ) -> Result<FrameBufferSet> {
        let (width, height) = (target.pixel_width(), target.pixel_height());
        let draw = device.create_framebuffer(width, height, self.samples)?;
        let resolve = if self.is_multisampled() {
            match device.create_framebuffer(width, height, 0) {
                Ok(resolve) => Some(resolve),
                Err(error) => {
                    device.delete_framebuffer(&draw);
                    return Err(error);
                }
            }
        } else {
            None
        };
        Ok(FrameBufferSet {
            target,
            draw,
            resolve,
        })
    }

    /// ### English
    /// Installs `set`, then releases the previously installed objects.
    ///
    /// ### 中文
    /// 安装 `set`，然后释放之前安装的对象。
    pub fn install<D: GlDevice + ?Sized>(&mut self, device: &D, set: FrameBufferSet) {
        self.release(device);
        debug!(
            "frame buffer installed at {}x{} (samples: {})",
            set.draw.width, set.draw.height, self.samples
        );
        self.target = set.target;
        self.draw = Some(set.draw);
        self.resolve = set.resolve;
    }

    /// ### English
    /// Binds the draw framebuffer and sets the viewport to the full target.
    ///
    /// ### 中文
    /// 绑定绘制 framebuffer，并将视口设置为整个目标。
    pub fn bind<D: GlDevice + ?Sized>(&self, device: &D) {
        device.bind_framebuffer(FramebufferBinding::Both, self.draw.as_ref());
        device.set_viewport(self.target.device_rect());
    }

    /// ### English
    /// Prepares the read binding for readback. With multisampling the draw framebuffer is first
    /// blitted into the single-sample resolve framebuffer, which then becomes the read source.
    ///
    /// ### 中文
    /// 为回读准备读绑定。多重采样时先将绘制 framebuffer blit 到单采样 resolve framebuffer，
    /// 再以后者作为读取源。
    pub fn resolve<D: GlDevice + ?Sized>(&self, device: &D) {
        match (&self.draw, &self.resolve) {
            (Some(draw), Some(resolve)) => {
                device.bind_framebuffer(FramebufferBinding::Read, Some(draw));
                device.bind_framebuffer(FramebufferBinding::Draw, Some(resolve));
                device.blit_color(draw.width, draw.height);
                device.bind_framebuffer(FramebufferBinding::Read, Some(resolve));
            }
            (draw, None) => device.bind_framebuffer(FramebufferBinding::Read, draw.as_ref()),
            (None, Some(_)) => {}
        }
    }

    pub fn unbind<D: GlDevice + ?Sized>(&self, device: &D) {
        device.bind_framebuffer(FramebufferBinding::Both, None);
    }

    /// ### English
    /// Deletes the installed objects and returns to the placeholder. Idempotent.
    ///
    /// ### 中文
    /// 删除已安装的对象并回到占位状态。幂等。
    pub fn release<D: GlDevice + ?Sized>(&mut self, device: &D) {
        if let Some(draw) = self.draw.take() {
            delete_objects(device, &draw, self.resolve.take().as_ref());
        }
        self.target = RenderTargetInfo::EMPTY;
    }
}
