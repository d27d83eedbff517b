//! ### English
//! `GlDevice` implementation on top of a [`GlfwSharedContext`] (glow), plus the GLFW-backed
//! [`ContextProvider`] used by embedders.
//!
//! ### 中文
//! 基于 [`GlfwSharedContext`]（glow）的 `GlDevice` 实现，以及嵌入方使用的 GLFW
//! [`ContextProvider`]。

use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::time::Duration;

use glow::HasContext as _;

use crate::engine::config::PixelFormat;
use crate::engine::error::{RenderError, Result};
use crate::engine::glfw::GlfwWindowPtr;
use crate::engine::target::PixelRect;

use super::device::{
    ContextProvider, FenceStatus, FramebufferBinding, FramebufferObjects, GlDevice, MappedBuffer,
    NO_FENCE,
};
use super::shared_context::GlfwSharedContext;

const PERSISTENT_READ_FLAGS: u32 =
    glow::MAP_READ_BIT | glow::MAP_PERSISTENT_BIT | glow::MAP_COHERENT_BIT;

fn framebuffer_name(name: u32) -> Option<glow::NativeFramebuffer> {
    NonZeroU32::new(name).map(glow::NativeFramebuffer)
}

fn renderbuffer_name(name: u32) -> Option<glow::NativeRenderbuffer> {
    NonZeroU32::new(name).map(glow::NativeRenderbuffer)
}

fn buffer_name(name: u32) -> Option<glow::NativeBuffer> {
    NonZeroU32::new(name).map(glow::NativeBuffer)
}

/// ### English
/// Reinterprets a `u64` fence handle as the `GLsync` it was created from.
///
/// ### 中文
/// 将 `u64` fence 句柄还原为创建它的 `GLsync`。
#[inline]
fn native_fence(fence: u64) -> glow::NativeFence {
    glow::NativeFence(fence as usize as *mut _)
}

fn gl_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl GlfwSharedContext {
    /// ### English
    /// Creates and attaches the renderbuffers of `objects`, filling in names as they are created
    /// so a failure can release the partial set.
    ///
    /// ### 中文
    /// 创建并挂接 `objects` 的 renderbuffer，边创建边写入对象名，以便失败时释放已创建的部分。
    fn build_framebuffer(&self, objects: &mut FramebufferObjects) -> Result<()> {
        let gl = &self.gl;
        let (width, height) = (gl_size(objects.width), gl_size(objects.height));
        let samples = objects.samples;

        unsafe {
            let framebuffer = gl.create_framebuffer().map_err(RenderError::Gpu)?;
            objects.framebuffer = framebuffer.0.get();
            let color = gl.create_renderbuffer().map_err(RenderError::Gpu)?;
            objects.color = color.0.get();
            let depth_stencil = gl.create_renderbuffer().map_err(RenderError::Gpu)?;
            objects.depth_stencil = depth_stencil.0.get();

            let storages = [(color, glow::RGBA8), (depth_stencil, glow::DEPTH24_STENCIL8)];
            for (renderbuffer, format) in storages {
                gl.bind_renderbuffer(glow::RENDERBUFFER, Some(renderbuffer));
                if samples > 1 {
                    gl.renderbuffer_storage_multisample(
                        glow::RENDERBUFFER,
                        gl_size(samples),
                        format,
                        width,
                        height,
                    );
                } else {
                    gl.renderbuffer_storage(glow::RENDERBUFFER, format, width, height);
                }
            }
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);

            if gl.get_error() == glow::OUT_OF_MEMORY {
                let texels = objects.width as usize * objects.height as usize;
                return Err(RenderError::OutOfMemory {
                    bytes: texels * 8 * samples.max(1) as usize,
                    reason: format!(
                        "renderbuffer storage for {}x{} ({samples} samples)",
                        objects.width, objects.height
                    ),
                });
            }

            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::RENDERBUFFER,
                Some(color),
            );
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_STENCIL_ATTACHMENT,
                glow::RENDERBUFFER,
                Some(depth_stencil),
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);

            if status != glow::FRAMEBUFFER_COMPLETE {
                return Err(RenderError::Gpu(format!(
                    "framebuffer incomplete (status 0x{status:04X})"
                )));
            }
        }
        Ok(())
    }
}

impl GlDevice for GlfwSharedContext {
    fn make_current(&self) {
        self.bind();
    }

    fn clear_current(&self) {
        self.unbind();
    }

    fn create_framebuffer(
        &self,
        width: u32,
        height: u32,
        samples: u32,
    ) -> Result<FramebufferObjects> {
        let mut objects = FramebufferObjects {
            framebuffer: 0,
            color: 0,
            depth_stencil: 0,
            samples,
            width,
            height,
        };
        if let Err(error) = self.build_framebuffer(&mut objects) {
            self.delete_framebuffer(&objects);
            return Err(error);
        }
        Ok(objects)
    }

    fn delete_framebuffer(&self, objects: &FramebufferObjects) {
        let gl = &self.gl;
        unsafe {
            for name in [objects.color, objects.depth_stencil] {
                if let Some(renderbuffer) = renderbuffer_name(name) {
                    gl.delete_renderbuffer(renderbuffer);
                }
            }
            if let Some(framebuffer) = framebuffer_name(objects.framebuffer) {
                gl.delete_framebuffer(framebuffer);
            }
        }
    }

    fn bind_framebuffer(&self, binding: FramebufferBinding, objects: Option<&FramebufferObjects>) {
        let target = match binding {
            FramebufferBinding::Draw => glow::DRAW_FRAMEBUFFER,
            FramebufferBinding::Read => glow::READ_FRAMEBUFFER,
            FramebufferBinding::Both => glow::FRAMEBUFFER,
        };
        let framebuffer = objects.and_then(|objects| framebuffer_name(objects.framebuffer));
        unsafe { self.gl.bind_framebuffer(target, framebuffer) };
    }

    fn blit_color(&self, width: u32, height: u32) {
        let (width, height) = (gl_size(width), gl_size(height));
        unsafe {
            self.gl.blit_framebuffer(
                0,
                0,
                width,
                height,
                0,
                0,
                width,
                height,
                glow::COLOR_BUFFER_BIT,
                glow::NEAREST,
            );
        }
    }

    fn set_viewport(&self, rect: PixelRect) {
        unsafe {
            self.gl
                .viewport(rect.x, rect.y, gl_size(rect.width), gl_size(rect.height));
        }
    }

    fn create_mapped_buffer(&self, len: usize) -> Result<MappedBuffer> {
        let size = i32::try_from(len).map_err(|_| RenderError::OutOfMemory {
            bytes: len,
            reason: "pixel buffer larger than GLsizei".to_string(),
        })?;
        let gl = &self.gl;

        unsafe {
            let buffer = gl.create_buffer().map_err(RenderError::Gpu)?;
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer));
            gl.buffer_storage(glow::PIXEL_PACK_BUFFER, size, None, PERSISTENT_READ_FLAGS);
            let ptr = gl.map_buffer_range(glow::PIXEL_PACK_BUFFER, 0, size, PERSISTENT_READ_FLAGS);
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);

            match NonNull::new(ptr) {
                Some(ptr) => Ok(MappedBuffer::new(buffer.0.get(), ptr, len)),
                None => {
                    let code = gl.get_error();
                    gl.delete_buffer(buffer);
                    Err(RenderError::OutOfMemory {
                        bytes: len,
                        reason: format!("persistent mapping failed (GL error 0x{code:04X})"),
                    })
                }
            }
        }
    }

    fn delete_mapped_buffer(&self, buffer: MappedBuffer) {
        let Some(name) = buffer_name(buffer.name()) else {
            return;
        };
        let gl = &self.gl;
        unsafe {
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(name));
            gl.unmap_buffer(glow::PIXEL_PACK_BUFFER);
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            gl.delete_buffer(name);
        }
    }

    fn pack_pixels(&self, buffer: &MappedBuffer, rect: PixelRect, format: PixelFormat) {
        let gl_format = match format {
            PixelFormat::Bgra8 => glow::BGRA,
            PixelFormat::Rgba8 => glow::RGBA,
        };
        let gl = &self.gl;
        unsafe {
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, buffer_name(buffer.name()));
            gl.read_pixels(
                rect.x,
                rect.y,
                gl_size(rect.width),
                gl_size(rect.height),
                gl_format,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::BufferOffset(0),
            );
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
    }

    fn insert_fence(&self) -> Result<u64> {
        let gl = &self.gl;
        let fence = unsafe { gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(RenderError::Gpu)?;
        /*
        ### English
        Flush so a waiter on the other context can observe the fence.

        ### 中文
        flush 以便另一上下文上的等待方能观察到该 fence。
        */
        unsafe { gl.flush() };
        Ok(fence.0 as usize as u64)
    }

    fn client_wait(&self, fence: u64, timeout: Duration) -> FenceStatus {
        if fence == NO_FENCE {
            return FenceStatus::Failed;
        }
        let nanos = i32::try_from(timeout.as_nanos()).unwrap_or(i32::MAX);
        let status = unsafe { self.gl.client_wait_sync(native_fence(fence), 0, nanos) };
        match status {
            glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => FenceStatus::Signaled,
            glow::TIMEOUT_EXPIRED => FenceStatus::Pending,
            _ => FenceStatus::Failed,
        }
    }

    fn delete_fence(&self, fence: u64) {
        if fence != NO_FENCE {
            unsafe { self.gl.delete_sync(native_fence(fence)) };
        }
    }
}

/// ### English
/// [`ContextProvider`] creating offscreen GLFW contexts in the host window's share group.
///
/// Both the primary and the shared context are offscreen windows sharing with `host_window`, so
/// they share objects with each other as well.
///
/// ### 中文
/// 在宿主 window 的 share group 中创建离屏 GLFW 上下文的 [`ContextProvider`]。
///
/// 主上下文与共享上下文都是与 `host_window` 共享的离屏 window，因此二者之间也共享对象。
#[derive(Debug)]
pub struct GlfwContextProvider {
    host_window: usize,
}

impl GlfwContextProvider {
    /// ### English
    /// Wraps the embedder's GLFW window.
    ///
    /// #### Parameters
    /// - `host_window`: Host `GLFWwindow*`.
    ///
    /// # Safety
    /// `host_window` must be a live GLFW window that outlives every context this provider creates,
    /// and the embedder GLFW table must be installed before the render host starts.
    ///
    /// ### 中文
    /// 包装嵌入方的 GLFW window。
    ///
    /// #### 参数
    /// - `host_window`：宿主 `GLFWwindow*`。
    ///
    /// # Safety
    /// `host_window` 必须是存活的 GLFW window，且生命周期长于本 provider 创建的所有上下文；
    /// 渲染宿主启动前必须已安装嵌入方 GLFW 函数表。
    pub unsafe fn new(host_window: GlfwWindowPtr) -> Self {
        Self {
            host_window: host_window as usize,
        }
    }

    pub fn host_window(&self) -> GlfwWindowPtr {
        self.host_window as GlfwWindowPtr
    }
}

impl ContextProvider for GlfwContextProvider {
    type Device = GlfwSharedContext;

    fn create_primary(&self) -> Result<GlfwSharedContext> {
        GlfwSharedContext::new(self.host_window())
    }

    fn create_shared(&self) -> Result<GlfwSharedContext> {
        GlfwSharedContext::new(self.host_window())
    }
}
