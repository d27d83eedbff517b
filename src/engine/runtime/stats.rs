//! ### English
//! Lock-free frame counters shared by the render thread, the pipeline stages and the UI thread.
//!
//! ### 中文
//! 由渲染线程、管线各阶段与 UI 线程共享的无锁帧计数器。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// ### English
/// Live counters. Writers use relaxed increments; readers take a [`FrameStatsSnapshot`].
///
/// ### 中文
/// 实时计数器。写入方使用 relaxed 自增；读取方获取 [`FrameStatsSnapshot`]。
#[derive(Debug, Default)]
pub struct FrameStats {
    rendered: AtomicU64,
    skipped: AtomicU64,
    copied: AtomicU64,
    committed: AtomicU64,
    dropped: AtomicU64,
    ring_full: AtomicU64,
    last_frame_nanos: AtomicU64,
}

/// ### English
/// Point-in-time copy of [`FrameStats`].
///
/// - `rendered`: frames drawn and packed by the render thread.
/// - `skipped`: frames the readback or copy stage passed over (fence not ready, already consumed).
/// - `copied`: frames copied into the canvas.
/// - `committed`: frames drawn into the UI paint surface.
/// - `dropped`: copied frames superseded by a newer one before commit.
/// - `ring_full`: ticks that ended because every pixel-buffer slot was still held downstream.
///
/// ### 中文
/// [`FrameStats`] 的某一时刻副本。
///
/// - `rendered`：渲染线程绘制并打包的帧数。
/// - `skipped`：回读或拷贝阶段跳过的帧数（fence 未就绪、已被消费）。
/// - `copied`：拷贝进画布的帧数。
/// - `committed`：绘制进 UI 绘制表面的帧数。
/// - `dropped`：提交前被更新帧取代的已拷贝帧数。
/// - `ring_full`：因所有像素缓冲槽位仍被下游占用而结束的 tick 数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStatsSnapshot {
    pub rendered: u64,
    pub skipped: u64,
    pub copied: u64,
    pub committed: u64,
    pub dropped: u64,
    pub ring_full: u64,
    pub last_frame_time: Duration,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_rendered(&self, frame_time: Duration) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(frame_time.as_nanos()).unwrap_or(u64::MAX);
        self.last_frame_nanos.store(nanos, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_copied(&self) {
        self.copied.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_ring_full(&self) {
        self.ring_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FrameStatsSnapshot {
        FrameStatsSnapshot {
            rendered: self.rendered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            copied: self.copied.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ring_full: self.ring_full.load(Ordering::Relaxed),
            last_frame_time: Duration::from_nanos(self.last_frame_nanos.load(Ordering::Relaxed)),
        }
    }
}
