//! ### English
//! One slot of the pixel-buffer ring: a persistently mapped pixel-pack buffer, its fence and its
//! pending-frame marker.
//!
//! ### 中文
//! 像素缓冲环中的一个槽位：持久映射的像素打包 buffer、它的 fence 以及待消费帧标记。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::engine::config::PixelFormat;
use crate::engine::error::{RenderError, Result};
use crate::engine::rendering::device::{GlDevice, MappedBuffer, NO_FENCE};
use crate::engine::sync::FrameGate;
use crate::engine::target::PixelRect;

/// ### English
/// Pending marker value meaning "no unconsumed frame".
///
/// ### 中文
/// 表示“没有未消费帧”的待消费标记值。
pub(crate) const NO_PENDING_FRAME: u64 = 0;

/// ### English
/// One GPU transfer buffer of the ring.
///
/// - `mapping` is the read/write lock: writers (pack + fence insertion, release) take it
///   exclusively, host-side copies and fence polls take it shared.
/// - `pending` holds the sequence number of the frame the slot currently carries, or
///   [`NO_PENDING_FRAME`]. It is the `hasBuffer` flag, keyed by frame so a stale claim can never
///   clear a newer frame.
/// - `fence` holds a `GLsync` cast to `u64` (or [`NO_FENCE`]).
/// - `freed` is shared by the whole ring and released whenever a pending marker is cleared.
///
/// ### 中文
/// 环中的一个 GPU 传输 buffer。
///
/// - `mapping` 即读写锁：写入方（打包 + 插入 fence、释放）独占持有，主机侧拷贝与 fence 轮询共享持有。
/// - `pending` 保存槽位当前承载帧的序号，或 [`NO_PENDING_FRAME`]。它就是 `hasBuffer` 标记，并以帧为键，
///   确保过期的认领永远不会清除更新的帧。
/// - `fence` 保存转为 `u64` 的 `GLsync`（或 [`NO_FENCE`]）。
/// - `freed` 由整个环共享，每当待消费标记被清除时释放。
pub struct PixelBufferSlot {
    index: usize,
    byte_size: usize,
    pub(super) mapping: RwLock<Option<MappedBuffer>>,
    pub(super) pending: AtomicU64,
    pub(super) fence: AtomicU64,
    freed: Arc<FrameGate>,
}

impl PixelBufferSlot {
    pub(super) fn new(index: usize, buffer: MappedBuffer, freed: Arc<FrameGate>) -> Self {
        Self {
            index,
            byte_size: buffer.len(),
            mapping: RwLock::new(Some(buffer)),
            pending: AtomicU64::new(NO_PENDING_FRAME),
            fence: AtomicU64::new(NO_FENCE),
            freed,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// ### English
    /// Returns whether the slot holds a produced frame that has not been consumed yet.
    ///
    /// ### 中文
    /// 返回槽位是否持有尚未被消费的已生产帧。
    #[inline]
    pub fn has_buffer(&self) -> bool {
        self.pending.load(Ordering::Acquire) != NO_PENDING_FRAME
    }

    pub fn pending_frame(&self) -> Option<u64> {
        match self.pending.load(Ordering::Acquire) {
            NO_PENDING_FRAME => None,
            seq => Some(seq),
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.read().is_some()
    }

    /// ### English
    /// Detaches the fence from the slot; the caller becomes responsible for deleting it.
    ///
    /// ### 中文
    /// 将 fence 从槽位上摘下；调用方负责删除它。
    #[inline]
    pub(super) fn take_fence(&self) -> u64 {
        self.fence.swap(NO_FENCE, Ordering::AcqRel)
    }

    /// ### English
    /// Issues the framebuffer → buffer transfer for frame `seq` and fences it.
    ///
    /// The caller has already waited for `has_buffer() == false`. A stale fence left by a skipped
    /// frame is deleted here, on the context-owning thread.
    ///
    /// ### 中文
    /// 为帧 `seq` 发起 framebuffer → buffer 传输并插入 fence。
    ///
    /// 调用方已等待 `has_buffer() == false`。被跳过的帧遗留的 fence 在此处（持有上下文的线程上）删除。
    pub(super) fn write<D: GlDevice + ?Sized>(
        &self,
        device: &D,
        seq: u64,
        rect: PixelRect,
        format: PixelFormat,
    ) -> Result<()> {
        debug_assert_ne!(seq, NO_PENDING_FRAME);
        let mapping = self.mapping.write();
        let Some(buffer) = mapping.as_ref() else {
            return Err(RenderError::InvalidState(format!(
                "pixel buffer slot {} is released",
                self.index
            )));
        };

        let stale = self.take_fence();
        if stale != NO_FENCE {
            device.delete_fence(stale);
        }

        device.pack_pixels(buffer, rect, format);
        let fence = device.insert_fence()?;
        self.fence.store(fence, Ordering::Release);
        self.pending.store(seq, Ordering::Release);
        Ok(())
    }

    /// ### English
    /// Copies frame `seq` into `destination`.
    ///
    /// This is the consuming read: the pending marker for `seq` is cleared exactly once, whether
    /// or not bytes were copied (the slot may already be unmapped). A second call for the same
    /// frame observes no data and returns `false`.
    ///
    /// ### 中文
    /// 将帧 `seq` 拷贝到 `destination`。
    ///
    /// 这是消费式读取：无论是否真正拷贝了字节（槽位可能已被取消映射），`seq` 的待消费标记都只会被清除一次。
    /// 对同一帧的第二次调用看不到数据并返回 `false`。
    pub fn copy_to(&self, seq: u64, destination: &mut [u8]) -> bool {
        let mapping = self.mapping.read();
        if self
            .pending
            .compare_exchange(seq, NO_PENDING_FRAME, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.freed.release();

        let Some(buffer) = mapping.as_ref() else {
            return false;
        };
        let len = buffer.len().min(destination.len());
        // The fence for `seq` was observed signaled before a claim reached the copy stage, and the
        // writer needs the exclusive lock we are holding shared.
        let source = unsafe { buffer.as_slice() };
        destination[..len].copy_from_slice(&source[..len]);
        true
    }

    /// ### English
    /// Drops an unconsumed claim on frame `seq` so the ring can reuse the slot.
    ///
    /// ### 中文
    /// 放弃对帧 `seq` 的未消费认领，使环可以复用该槽位。
    pub(crate) fn abandon(&self, seq: u64) -> bool {
        let cleared = self
            .pending
            .compare_exchange(seq, NO_PENDING_FRAME, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cleared {
            self.freed.release();
        }
        cleared
    }
}

impl std::fmt::Debug for PixelBufferSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBufferSlot")
            .field("index", &self.index)
            .field("byte_size", &self.byte_size)
            .field("pending", &self.pending_frame())
            .finish()
    }
}

/// ### English
/// Claim on one produced frame of one slot.
///
/// Moves through the pipeline inside the payloads. Dropping an unconsumed claim releases the
/// slot (the fence, if any, is deleted later by the next writer or by `release`).
///
/// ### 中文
/// 对某槽位上某一已生产帧的认领。
///
/// 随载荷在管线中移动。drop 未消费的认领会释放该槽位（若有 fence，稍后由下一次写入或 `release` 删除）。
#[derive(Debug)]
pub struct SlotFrame {
    slot: Arc<PixelBufferSlot>,
    seq: u64,
}

impl SlotFrame {
    pub(crate) fn new(slot: Arc<PixelBufferSlot>, seq: u64) -> Self {
        Self { slot, seq }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn slot(&self) -> &Arc<PixelBufferSlot> {
        &self.slot
    }

    /// ### English
    /// Returns whether this claim still names the slot's pending frame.
    ///
    /// ### 中文
    /// 返回该认领是否仍对应槽位当前的待消费帧。
    pub fn is_live(&self) -> bool {
        self.slot.pending.load(Ordering::Acquire) == self.seq
    }

    /// ### English
    /// Consuming copy of this frame (see [`PixelBufferSlot::copy_to`]).
    ///
    /// ### 中文
    /// 对该帧的消费式拷贝（见 [`PixelBufferSlot::copy_to`]）。
    pub fn copy_to(&self, destination: &mut [u8]) -> bool {
        self.slot.copy_to(self.seq, destination)
    }
}

impl Drop for SlotFrame {
    fn drop(&mut self) {
        self.slot.abandon(self.seq);
    }
}
