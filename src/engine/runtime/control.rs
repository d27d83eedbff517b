//! ### English
//! State shared between the host handle (any thread) and the render thread.
//!
//! Setters store the new value in an atomic (or, for the target, a small lock; the latest size
//! wins) and release the matching gate. The render thread polls the cached values once per tick.
//!
//! ### 中文
//! 宿主句柄（任意线程）与渲染线程之间共享的状态。
//!
//! setter 把新值写入原子变量（目标尺寸则写入一个小锁中，以最新尺寸为准），并释放对应的门。
//! 渲染线程每个 tick 轮询一次这些缓存值。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::config::{FrameGating, RenderConfig, TacticProfile};
use crate::engine::sync::{CancelToken, FrameGate, FrameSemaphore};
use crate::engine::target::RenderTargetInfo;

pub(crate) struct RenderControl {
    pub(crate) cancel: CancelToken,
    visible: AtomicBool,
    continuous: AtomicBool,
    render_once: AtomicBool,
    max_fps_bits: AtomicU64,
    target: Mutex<RenderTargetInfo>,
    pub(crate) visibility_gate: FrameGate,
    pub(crate) continuous_gate: FrameGate,
    pub(crate) size_gate: FrameGate,
    /// ### English
    /// Interruptible sleep used for declined renders, failed reallocations and the frame-rate cap.
    ///
    /// ### 中文
    /// 可被打断的休眠：用于被拒绝的渲染、失败的重新分配以及帧率上限。
    wake: FrameGate,
    pub(crate) semaphore: Option<Arc<FrameSemaphore>>,
}

impl RenderControl {
    pub(crate) fn new(config: &RenderConfig, profile: &TacticProfile) -> Self {
        let semaphore = match profile.gating {
            FrameGating::Ungated => None,
            FrameGating::CommitGated { permits } => Some(FrameSemaphore::new(permits)),
        };
        Self {
            cancel: CancelToken::new(),
            visible: AtomicBool::new(config.initially_visible),
            continuous: AtomicBool::new(config.initially_continuous),
            render_once: AtomicBool::new(false),
            max_fps_bits: AtomicU64::new(config.max_fps.to_bits()),
            target: Mutex::new(RenderTargetInfo::EMPTY),
            visibility_gate: FrameGate::new(),
            continuous_gate: FrameGate::new(),
            size_gate: FrameGate::new(),
            wake: FrameGate::new(),
            semaphore,
        }
    }

    #[inline]
    pub(crate) fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_continuous(&self) -> bool {
        self.continuous.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn render_requested(&self) -> bool {
        self.render_once.load(Ordering::Acquire)
    }

    pub(crate) fn clear_render_request(&self) {
        self.render_once.store(false, Ordering::Release);
    }

    pub(crate) fn max_fps(&self) -> f64 {
        f64::from_bits(self.max_fps_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn target(&self) -> RenderTargetInfo {
        *self.target.lock()
    }

    pub(crate) fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
        if visible {
            self.visibility_gate.release();
        }
        self.wake.release();
    }

    pub(crate) fn set_continuous(&self, continuous: bool) {
        self.continuous.store(continuous, Ordering::Release);
        if continuous {
            self.continuous_gate.release();
        }
    }

    pub(crate) fn request_render(&self) {
        self.render_once.store(true, Ordering::Release);
        self.continuous_gate.release();
        self.wake.release();
    }

    pub(crate) fn resize(&self, target: RenderTargetInfo) {
        *self.target.lock() = target;
        if !target.is_empty() {
            self.size_gate.release();
        }
        self.wake.release();
    }

    pub(crate) fn set_frame_rate_limit(&self, max_fps: f64) {
        self.max_fps_bits.store(max_fps.to_bits(), Ordering::Relaxed);
        self.wake.release();
    }

    /// ### English
    /// Sleeps for `duration` unless a setter or shutdown wakes the render thread first.
    ///
    /// ### 中文
    /// 休眠 `duration`，除非 setter 或关闭流程提前唤醒渲染线程。
    pub(crate) fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            self.wake.wait_timeout(duration);
        }
    }

    /// ### English
    /// Cancels, then force-releases every gate and the semaphore so no wait can outlive shutdown.
    ///
    /// ### 中文
    /// 先取消，再强制释放所有门与信号量，使任何等待都不会拖过关闭流程。
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
        self.visibility_gate.force_release();
        self.continuous_gate.force_release();
        self.size_gate.force_release();
        self.wake.force_release();
        if let Some(semaphore) = &self.semaphore {
            semaphore.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::RenderTactic;
    use crate::engine::sync::GateWake;

    fn control(tactic: RenderTactic) -> RenderControl {
        let config = RenderConfig {
            tactic,
            ..RenderConfig::default()
        };
        RenderControl::new(&config, &tactic.profile_for(8))
    }

    #[test]
    fn empty_resize_does_not_release_size_gate() {
        let control = control(RenderTactic::Balance);
        control.resize(RenderTargetInfo::EMPTY);
        assert_eq!(
            control.size_gate.wait_timeout(Duration::from_millis(5)),
            GateWake::TimedOut
        );
        control.resize(RenderTargetInfo::from_pixels(800, 600));
        assert_eq!(
            control.size_gate.wait_timeout(Duration::from_millis(5)),
            GateWake::Released
        );
        assert_eq!(control.target().pixel_width(), 800);
    }

    #[test]
    fn gating_follows_the_tactic() {
        assert!(control(RenderTactic::ThroughputPriority).semaphore.is_none());
        let latency = control(RenderTactic::LatencyPriority);
        assert_eq!(latency.semaphore.as_ref().map(|s| s.capacity()), Some(1));
    }

    #[test]
    fn shutdown_opens_every_wait() {
        let control = control(RenderTactic::LatencyPriority);
        let _held = control.semaphore.as_ref().and_then(|s| s.try_acquire());
        control.shutdown();
        assert!(control.cancel.is_cancelled());
        assert_eq!(control.visibility_gate.wait(), GateWake::Forced);
        assert_eq!(control.continuous_gate.wait(), GateWake::Forced);
        assert_eq!(control.size_gate.wait(), GateWake::Forced);
        assert!(control.semaphore.as_ref().and_then(|s| s.acquire()).is_none());
        control.sleep(Duration::from_secs(60));
    }

    #[test]
    fn frame_rate_limit_round_trips_through_bits() {
        let control = control(RenderTactic::Balance);
        assert_eq!(control.max_fps(), 0.0);
        control.set_frame_rate_limit(59.94);
        assert_eq!(control.max_fps(), 59.94);
    }
}
