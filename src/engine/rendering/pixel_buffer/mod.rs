//! ### English
//! Multi-slot pixel buffer: a ring of persistently mapped pixel-pack buffers, each tracked by a
//! GPU fence.
//!
//! Slot protocol:
//! - The render thread (primary context) waits, bounded, until the cursor slot carries no
//!   unconsumed frame, packs the resolved framebuffer into it, inserts a fence and marks the slot pending with the
//!   frame's sequence number.
//! - The readback thread (shared context) polls that fence without blocking and forwards the
//!   frame only once it is signaled.
//! - A copy worker copies the mapped bytes out and clears the pending marker, exactly once per
//!   frame.
//!
//! ### 中文
//! 多槽像素缓冲：由持久映射的像素打包 buffer 组成的环，每个槽位由一个 GPU fence 跟踪。
//!
//! 槽位协议：
//! - 渲染线程（主上下文）有界地等待游标槽位不再持有未消费帧，然后将已 resolve 的 framebuffer 打包进去，
//!   插入 fence，并以帧序号标记该槽位为待消费。
//! - 回读线程（共享上下文）非阻塞地轮询该 fence，仅在 signal 后才转发该帧。
//! - 拷贝工作线程将映射字节拷出并清除待消费标记，每帧恰好一次。

mod slot;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::engine::config::{DEFAULT_RING_DEPTH, PixelFormat, SLOT_WAIT};
use crate::engine::error::{RenderError, Result};
use crate::engine::pipeline::{FrameArgs, RenderArgs};
use crate::engine::rendering::device::{FenceStatus, GlDevice, MappedBuffer, NO_FENCE};
use crate::engine::sync::{Backoff, CancelToken, DEFAULT_SPIN_LIMIT, FrameGate};
use crate::engine::target::RenderTargetInfo;

pub use slot::{PixelBufferSlot, SlotFrame};

/// Longest single park while waiting for a slot, so cancellation is noticed.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// ### English
/// Ring of `depth` pixel-buffer slots, owned by the render thread.
///
/// ### 中文
/// 由渲染线程持有的、包含 `depth` 个槽位的像素缓冲环。
pub struct PixelBuffer {
    depth: usize,
    format: PixelFormat,
    spin_budget: u32,
    slot_wait: Duration,
    freed: Arc<FrameGate>,
    slots: Vec<Arc<PixelBufferSlot>>,
    cursor: usize,
    target: Option<RenderTargetInfo>,
}

impl PixelBuffer {
    /// ### English
    /// Creates an unallocated ring.
    ///
    /// #### Parameters
    /// - `depth`: Number of slots (at least 1; the runtime passes at least 2).
    /// - `format`: Byte order of packed pixels.
    /// - `spin_budget`: Busy-spin iterations before the slot wait parks.
    ///
    /// ### 中文
    /// 创建一个尚未分配的环。
    ///
    /// #### 参数
    /// - `depth`：槽位数（至少 1；运行时至少传入 2）。
    /// - `format`：打包像素的字节顺序。
    /// - `spin_budget`：槽位等待转为 park 之前的忙等自旋次数。
    pub fn new(depth: usize, format: PixelFormat, spin_budget: u32) -> Self {
        Self {
            depth: depth.max(1),
            format,
            spin_budget,
            slot_wait: SLOT_WAIT,
            freed: Arc::new(FrameGate::new()),
            slots: Vec::new(),
            cursor: 0,
            target: None,
        }
    }

    /// ### English
    /// Sets the bound of one slot wait (default [`SLOT_WAIT`]).
    ///
    /// ### 中文
    /// 设置单次槽位等待的上限（默认 [`SLOT_WAIT`]）。
    pub fn with_slot_wait(mut self, slot_wait: Duration) -> Self {
        self.slot_wait = slot_wait;
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn target(&self) -> Option<RenderTargetInfo> {
        self.target
    }

    pub fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Arc<PixelBufferSlot>] {
        &self.slots
    }

    /// ### English
    /// Allocates the ring for `target`.
    ///
    /// A no-op when already allocated for an equal target. Otherwise every slot buffer is created
    /// first; a failure part-way deletes the buffers created so far and leaves the current ring
    /// untouched. Only after all buffers exist is the previous ring released and the cursor reset
    /// to slot 0.
    ///
    /// ### 中文
    /// 为 `target` 分配环。
    ///
    /// 若已按相等的目标分配则什么也不做。否则先创建全部槽位 buffer；中途失败时删除已创建的 buffer，
    /// 并保持当前环不变。只有在所有 buffer 都创建成功之后，才释放旧环并将游标重置到槽位 0。
    pub fn allocate<D: GlDevice + ?Sized>(
        &mut self,
        device: &D,
        target: RenderTargetInfo,
    ) -> Result<()> {
        if self.is_allocated() && self.target == Some(target) {
            return Ok(());
        }
        if target.is_empty() {
            return Err(RenderError::InvalidState(
                "cannot allocate a pixel buffer for an empty target".to_string(),
            ));
        }

        let byte_size = target.buffer_size();
        let mut created: Vec<MappedBuffer> = Vec::with_capacity(self.depth);
        for _ in 0..self.depth {
            match device.create_mapped_buffer(byte_size) {
                Ok(buffer) => created.push(buffer),
                Err(error) => {
                    for buffer in created {
                        device.delete_mapped_buffer(buffer);
                    }
                    return Err(error);
                }
            }
        }

        self.release(device);
        self.slots = created
            .into_iter()
            .enumerate()
            .map(|(index, buffer)| {
                Arc::new(PixelBufferSlot::new(index, buffer, self.freed.clone()))
            })
            .collect();
        self.cursor = 0;
        self.target = Some(target);

        debug!(
            "pixel buffer allocated: {} slots of {} bytes ({}x{})",
            self.depth,
            byte_size,
            target.pixel_width(),
            target.pixel_height()
        );
        Ok(())
    }

    /// ### English
    /// Releases every slot. Idempotent.
    ///
    /// All slot write locks are taken before anything is deleted, so no copy can be reading a
    /// slot that is being destroyed. Fences are deleted, then buffers unmapped and deleted.
    ///
    /// ### 中文
    /// 释放所有槽位。幂等。
    ///
    /// 删除任何资源之前先拿到所有槽位的写锁，因此不会有拷贝正在读取被销毁的槽位。
    /// 先删除 fence，再取消映射并删除 buffer。
    pub fn release<D: GlDevice + ?Sized>(&mut self, device: &D) {
        if self.slots.is_empty() {
            self.target = None;
            return;
        }

        let slots = std::mem::take(&mut self.slots);
        let mut guards: Vec<_> = slots.iter().map(|slot| slot.mapping.write()).collect();
        for (slot, mapping) in slots.iter().zip(guards.iter_mut()) {
            let fence = slot.take_fence();
            if fence != NO_FENCE {
                device.delete_fence(fence);
            }
            if let Some(buffer) = mapping.take() {
                device.delete_mapped_buffer(buffer);
            }
            slot.pending.store(slot::NO_PENDING_FRAME, Ordering::Release);
        }
        drop(guards);

        debug!("pixel buffer released ({} slots)", slots.len());
        self.cursor = 0;
        self.target = None;
    }

    /// ### English
    /// Waits until the cursor slot can take a new frame.
    ///
    /// Spins for the spin budget, then parks on the ring's "slot freed" gate, which copies and
    /// dropped claims release. Returns `Ok(false)` when the slot is still occupied after the slot
    /// wait, and `Ok(true)` right away for an unallocated ring.
    ///
    /// ### 中文
    /// 等待游标槽位可以接收新帧。
    ///
    /// 先在自旋预算内自旋，然后 park 在环的“槽位已释放”门上，拷贝与被 drop 的认领会释放该门。
    /// 若超过槽位等待上限后槽位仍被占用，返回 `Ok(false)`；环尚未分配时立即返回 `Ok(true)`。
    pub fn wait_writable(&self, cancel: &CancelToken) -> Result<bool> {
        let Some(slot) = self.slots.get(self.cursor) else {
            return Ok(true);
        };
        let mut backoff = Backoff::with_spin_limit(self.spin_budget);
        if backoff.spin_until(|| !slot.has_buffer()) {
            return Ok(true);
        }
        trace!(
            "pixel buffer slot {} was contended past the spin budget",
            slot.index()
        );

        let deadline = Instant::now() + self.slot_wait;
        loop {
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            if !slot.has_buffer() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.freed.wait_timeout((deadline - now).min(CANCEL_POLL));
        }
    }

    /// ### English
    /// Packs the bound read framebuffer into the cursor slot as frame `seq`.
    ///
    /// Waits for the cursor slot with [`Self::wait_writable`]. Returns [`RenderError::Cancelled`]
    /// when `cancel` fires during that wait and [`RenderError::Timeout`] when the slot stays
    /// occupied.
    ///
    /// #### Parameters
    /// - `device`: The render thread's device; its context must be current.
    /// - `seq`: Non-zero, per-ring unique frame sequence number.
    /// - `cancel`: Shutdown token checked while waiting.
    ///
    /// ### 中文
    /// 将当前读 framebuffer 作为帧 `seq` 打包进游标槽位。
    ///
    /// 通过 [`Self::wait_writable`] 等待游标槽位。等待期间若 `cancel` 触发，返回
    /// [`RenderError::Cancelled`]；槽位一直被占用时返回 [`RenderError::Timeout`]。
    ///
    /// #### 参数
    /// - `device`：渲染线程的设备；其上下文必须为 current。
    /// - `seq`：非零且在本环内唯一的帧序号。
    /// - `cancel`：等待期间检查的关闭令牌。
    pub fn read_pixels<D: GlDevice + ?Sized>(
        &mut self,
        device: &D,
        seq: u64,
        cancel: &CancelToken,
    ) -> Result<SlotFrame> {
        let Some(target) = self.target else {
            return Err(RenderError::InvalidState(
                "pixel buffer is not allocated".to_string(),
            ));
        };
        if !self.wait_writable(cancel)? {
            return Err(RenderError::Timeout(self.slot_wait.as_millis() as u64));
        }
        let slot = self.slots[self.cursor].clone();
        slot.write(device, seq, target.device_rect(), self.format)?;
        trace!("frame {} packed into slot {}", seq, slot.index());
        Ok(SlotFrame::new(slot, seq))
    }

    /// ### English
    /// Advances the round-robin cursor.
    ///
    /// ### 中文
    /// 推进轮转游标。
    pub fn swap(&mut self) {
        if !self.slots.is_empty() {
            self.cursor = (self.cursor + 1) % self.slots.len();
        }
    }

    /// ### English
    /// [`Self::read_pixels`] followed by [`Self::swap`].
    ///
    /// ### 中文
    /// 先 [`Self::read_pixels`] 后 [`Self::swap`]。
    pub fn read_pixels_and_swap<D: GlDevice + ?Sized>(
        &mut self,
        device: &D,
        seq: u64,
        cancel: &CancelToken,
    ) -> Result<SlotFrame> {
        let frame = self.read_pixels(device, seq, cancel)?;
        self.swap();
        Ok(frame)
    }

    /// ### English
    /// Readback-stage check of a produced frame; runs where `device`'s (shared) context is
    /// current.
    ///
    /// Returns `Ok(None)` when the frame was already consumed or released, or when its fence is
    /// not signaled within `timeout`. Dropping the `RenderArgs` in that case frees the slot; the
    /// fence is deleted later by the next writer. On a signaled fence the fence is deleted and
    /// the frame moves on as [`FrameArgs`], still pending until a copy consumes it.
    ///
    /// ### 中文
    /// 回读阶段对已生产帧的检查；在 `device`（共享）上下文为 current 的线程上运行。
    ///
    /// 若该帧已被消费或释放，或其 fence 在 `timeout` 内未 signal，则返回 `Ok(None)`。
    /// 此时 drop `RenderArgs` 会释放槽位；fence 稍后由下一次写入删除。fence 已 signal 时删除 fence，
    /// 帧以 [`FrameArgs`] 形式继续传递，并保持待消费状态直到被拷贝消费。
    pub fn read_frames<D: GlDevice + ?Sized>(
        device: &D,
        args: RenderArgs,
        timeout: Duration,
    ) -> Result<Option<FrameArgs>> {
        let slot = args.frame().slot().clone();
        let mapping = slot.mapping.read();
        if mapping.is_none() || !args.frame().is_live() {
            trace!("frame {} is no longer pending; skipping", args.seq());
            return Ok(None);
        }

        let fence = slot.fence.load(Ordering::Acquire);
        if fence != NO_FENCE {
            match device.client_wait(fence, timeout) {
                FenceStatus::Signaled => {
                    if slot
                        .fence
                        .compare_exchange(fence, NO_FENCE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        device.delete_fence(fence);
                    }
                }
                FenceStatus::Pending => {
                    trace!("frame {} fence not signaled; skipping", args.seq());
                    return Ok(None);
                }
                FenceStatus::Failed => {
                    return Err(RenderError::Gpu(format!(
                        "waiting on the fence of frame {} failed",
                        args.seq()
                    )));
                }
            }
        }
        drop(mapping);

        Ok(Some(args.into_frame_args()))
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("depth", &self.depth)
            .field("cursor", &self.cursor)
            .field("target", &self.target)
            .finish()
    }
}

impl Default for PixelBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RING_DEPTH, PixelFormat::default(), DEFAULT_SPIN_LIMIT)
    }
}
