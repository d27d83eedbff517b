//! ### English
//! GPU device seam.
//!
//! The render procedure, the pixel-buffer ring and the readback stage only talk to the GPU
//! through [`GlDevice`]. The shipped implementation is [`super::GlfwSharedContext`] (glow on a
//! GLFW offscreen context); tests use an in-memory device.
//!
//! ### 中文
//! GPU 设备接缝。
//!
//! 渲染过程、像素缓冲环与回读阶段只通过 [`GlDevice`] 访问 GPU。随附实现为
//! [`super::GlfwSharedContext`]（基于 GLFW 离屏上下文的 glow）；测试使用内存设备。

use std::ptr::NonNull;
use std::time::Duration;

use crate::engine::config::PixelFormat;
use crate::engine::error::Result;
use crate::engine::target::PixelRect;

/// ### English
/// Fence value meaning "no fence".
///
/// ### 中文
/// 表示“无 fence”的值。
pub const NO_FENCE: u64 = 0;

/// ### English
/// Result of a non-blocking fence poll.
///
/// ### 中文
/// 非阻塞 fence 轮询的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Pending,
    Failed,
}

/// ### English
/// Which framebuffer binding point an operation targets.
///
/// ### 中文
/// 操作针对的 framebuffer 绑定点。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferBinding {
    Draw,
    Read,
    Both,
}

/// ### English
/// GL object names of one off-screen framebuffer (color + depth/stencil renderbuffers).
///
/// ### 中文
/// 一个离屏 framebuffer 的 GL 对象名（颜色 + 深度/模板 renderbuffer）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferObjects {
    pub framebuffer: u32,
    pub color: u32,
    pub depth_stencil: u32,
    pub samples: u32,
    pub width: u32,
    pub height: u32,
}

/// ### English
/// A pixel-pack buffer together with its persistent host mapping.
///
/// The mapping stays valid until the buffer is handed back to
/// [`GlDevice::delete_mapped_buffer`].
///
/// ### 中文
/// 像素打包 buffer 及其持久化主机映射。
///
/// 在 buffer 交还给 [`GlDevice::delete_mapped_buffer`] 之前，映射一直有效。
#[derive(Debug)]
pub struct MappedBuffer {
    name: u32,
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain host memory; access is serialized by the owning slot's lock.
unsafe impl Send for MappedBuffer {}
unsafe impl Sync for MappedBuffer {}

impl MappedBuffer {
    /// ### English
    /// Wraps a mapped buffer.
    ///
    /// # Safety
    /// `ptr` must point to `len` readable bytes that stay mapped until the buffer is deleted.
    ///
    /// ### 中文
    /// 包装一个已映射的 buffer。
    ///
    /// # Safety
    /// `ptr` 必须指向 `len` 个可读字节，并在 buffer 删除前保持映射。
    pub unsafe fn new(name: u32, ptr: NonNull<u8>, len: usize) -> Self {
        Self { name, ptr, len }
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// ### English
    /// Host view of the mapped bytes.
    ///
    /// # Safety
    /// The GPU must have finished writing (fence signaled) and no writer may run concurrently.
    ///
    /// ### 中文
    /// 映射字节的主机视图。
    ///
    /// # Safety
    /// GPU 必须已完成写入（fence 已 signal），且不得有并发写入方。
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// ### English
/// GL operations needed by the frame pipeline. One instance belongs to one context and is only
/// used on the thread where that context is current.
///
/// ### 中文
/// 帧管线所需的 GL 操作。一个实例对应一个上下文，且只在该上下文 current 的线程上使用。
pub trait GlDevice {
    fn make_current(&self);
    fn clear_current(&self);

    /// ### English
    /// Allocates a framebuffer with color + depth/stencil renderbuffers. `samples > 1` creates
    /// multisampled storage.
    ///
    /// ### 中文
    /// 分配带颜色 + 深度/模板 renderbuffer 的 framebuffer。`samples > 1` 时创建多重采样存储。
    fn create_framebuffer(&self, width: u32, height: u32, samples: u32)
    -> Result<FramebufferObjects>;
    fn delete_framebuffer(&self, objects: &FramebufferObjects);
    /// ### English
    /// Binds `objects` (or the default framebuffer for `None`).
    ///
    /// ### 中文
    /// 绑定 `objects`（`None` 时绑定默认 framebuffer）。
    fn bind_framebuffer(&self, binding: FramebufferBinding, objects: Option<&FramebufferObjects>);
    /// ### English
    /// Copies the color attachment of the bound read framebuffer into the bound draw framebuffer.
    ///
    /// ### 中文
    /// 将当前读 framebuffer 的颜色附件复制到当前绘制 framebuffer。
    fn blit_color(&self, width: u32, height: u32);
    fn set_viewport(&self, rect: PixelRect);

    /// ### English
    /// Creates a persistently mapped, host-readable pixel-pack buffer of `len` bytes.
    ///
    /// ### 中文
    /// 创建 `len` 字节、持久映射且主机可读的像素打包 buffer。
    fn create_mapped_buffer(&self, len: usize) -> Result<MappedBuffer>;
    /// ### English
    /// Unmaps, then deletes the buffer.
    ///
    /// ### 中文
    /// 先取消映射，再删除 buffer。
    fn delete_mapped_buffer(&self, buffer: MappedBuffer);
    /// ### English
    /// Queues a transfer of `rect` from the bound read framebuffer into `buffer`.
    ///
    /// ### 中文
    /// 将当前读 framebuffer 中的 `rect` 区域排队传输到 `buffer`。
    fn pack_pixels(&self, buffer: &MappedBuffer, rect: PixelRect, format: PixelFormat);

    /// ### English
    /// Inserts a fence after all queued commands and flushes so other contexts can wait on it.
    /// Never returns [`NO_FENCE`] on success.
    ///
    /// ### 中文
    /// 在所有已排队命令之后插入 fence 并 flush，使其它上下文可以等待它。
    /// 成功时不会返回 [`NO_FENCE`]。
    fn insert_fence(&self) -> Result<u64>;
    fn client_wait(&self, fence: u64, timeout: Duration) -> FenceStatus;
    fn delete_fence(&self, fence: u64);
}

/// ### English
/// Supplies GL contexts bound to the host's native window share group.
///
/// `create_primary` runs on the render thread, `create_shared` on the readback thread. Both
/// contexts must share objects (buffers and fences) with each other.
///
/// ### 中文
/// 提供与宿主原生窗口处于同一 share group 的 GL 上下文。
///
/// `create_primary` 在渲染线程调用，`create_shared` 在回读线程调用。两个上下文必须互相共享
/// 对象（buffer 与 fence）。
pub trait ContextProvider: Send + Sync + 'static {
    type Device: GlDevice;

    fn create_primary(&self) -> Result<Self::Device>;
    fn create_shared(&self) -> Result<Self::Device>;
}

/// ### English
/// Unbinds the device's context when dropped.
///
/// ### 中文
/// drop 时解绑设备的上下文。
struct CurrentGuard<'a, D: GlDevice + ?Sized> {
    device: &'a D,
}

impl<D: GlDevice + ?Sized> Drop for CurrentGuard<'_, D> {
    fn drop(&mut self) {
        self.device.clear_current();
    }
}

/// ### English
/// Binds `device`'s context, runs `f`, then unbinds (also when `f` unwinds).
///
/// ### 中文
/// 绑定 `device` 的上下文，执行 `f`，然后解绑（`f` 发生 unwind 时同样解绑）。
pub fn with_context<D: GlDevice + ?Sized, R>(device: &D, f: impl FnOnce(&D) -> R) -> R {
    device.make_current();
    let guard = CurrentGuard { device };
    f(guard.device)
}
