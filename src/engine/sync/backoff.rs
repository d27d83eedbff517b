//! ### English
//! Bounded busy-spin for the pixel-buffer slot wait.
//!
//! The expected wait is one host-side memcpy, so the render thread spins for a configurable
//! budget first. Once the budget is spent the caller stops burning CPU and parks instead.
//!
//! ### 中文
//! 像素缓冲槽位等待所用的有界忙等自旋。
//!
//! 预期等待时长仅为一次主机侧 memcpy，因此渲染线程先在可配置的预算内自旋。预算耗尽后调用方不再
//! 占用 CPU，而是转为 park 等待。

/// ### English
/// Default spin budget before the caller parks.
///
/// ### 中文
/// 调用方转为 park 之前的默认自旋预算。
pub(crate) const DEFAULT_SPIN_LIMIT: u32 = 64;

/// ### English
/// Spin state with a hard iteration budget.
///
/// ### 中文
/// 带硬性迭代预算的自旋状态。
pub(crate) struct Backoff {
    spins: u32,
    spin_limit: u32,
}

impl Backoff {
    /// ### English
    /// Creates a backoff that spins at most `spin_limit` times.
    ///
    /// ### 中文
    /// 创建一个最多自旋 `spin_limit` 次的退避状态。
    #[inline]
    pub(crate) fn with_spin_limit(spin_limit: u32) -> Self {
        Self {
            spins: 0,
            spin_limit,
        }
    }

    /// ### English
    /// Returns whether the spin budget is exhausted.
    ///
    /// ### 中文
    /// 返回自旋预算是否已耗尽。
    #[inline]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.spins >= self.spin_limit
    }

    /// ### English
    /// Spins until `ready()` returns `true` or the budget runs out.
    ///
    /// Returns the last observed value of `ready()`; `false` means the caller has to block.
    ///
    /// ### 中文
    /// 自旋直到 `ready()` 返回 `true` 或预算耗尽。
    ///
    /// 返回最后一次观察到的 `ready()`；`false` 表示调用方需要转为阻塞等待。
    pub(crate) fn spin_until(&mut self, mut ready: impl FnMut() -> bool) -> bool {
        while !self.is_exhausted() {
            if ready() {
                return true;
            }
            std::hint::spin_loop();
            self.spins += 1;
        }
        ready()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn gives_up_after_budget() {
        let polls = AtomicU32::new(0);
        let mut backoff = Backoff::with_spin_limit(8);
        assert!(!backoff.spin_until(|| {
            polls.fetch_add(1, Ordering::Relaxed);
            false
        }));
        assert!(backoff.is_exhausted());
        assert_eq!(polls.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn zero_budget_polls_once() {
        let mut backoff = Backoff::with_spin_limit(0);
        assert!(backoff.spin_until(|| true));
        assert!(!Backoff::with_spin_limit(0).spin_until(|| false));
    }

    #[test]
    fn observes_condition_from_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = flag.clone();
        thread::spawn(move || setter.store(true, Ordering::Release))
            .join()
            .unwrap();

        let mut backoff = Backoff::with_spin_limit(DEFAULT_SPIN_LIMIT);
        assert!(backoff.spin_until(|| flag.load(Ordering::Acquire)));
        assert!(!backoff.is_exhausted());
    }
}
