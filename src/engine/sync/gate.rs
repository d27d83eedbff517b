//! ### English
//! Single-slot wait/signal gate used for the visibility, continuous-render and size-ready waits.
//!
//! ### 中文
//! 单槽等待/唤醒门：用于可见性、连续渲染与尺寸就绪三种等待。

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// ### English
/// Why a gate wait returned.
///
/// ### 中文
/// 门等待返回的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWake {
    /// A producer released the gate; the release was consumed by this wait.
    Released,
    /// The gate was force-released (shutdown); every wait returns immediately from now on.
    Forced,
    /// A bounded wait expired.
    TimedOut,
}

#[derive(Default)]
struct GateState {
    released: bool,
    forced: bool,
}

/// ### English
/// One-shot gate: `release()` lets exactly one pending or future `wait()` through, multiple
/// releases before a wait collapse into one. `force_release()` opens the gate for good.
///
/// ### 中文
/// 一次性门：`release()` 只放行一次当前或未来的 `wait()`，多次 release 在等待前会合并为一次。
/// `force_release()` 会让门永久打开。
#[derive(Default)]
pub struct FrameGate {
    state: Mutex<GateState>,
    signal: Condvar,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Releases one waiter (or the next wait if nobody is waiting yet).
    ///
    /// ### 中文
    /// 放行一个等待方（若当前无人等待，则放行下一次等待）。
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        drop(state);
        self.signal.notify_one();
    }

    /// ### English
    /// Permanently opens the gate so shutdown can never block on it.
    ///
    /// ### 中文
    /// 永久打开该门，确保关闭流程不会阻塞在它上面。
    pub fn force_release(&self) {
        let mut state = self.state.lock();
        state.forced = true;
        drop(state);
        self.signal.notify_all();
    }

    pub fn is_forced(&self) -> bool {
        self.state.lock().forced
    }

    /// ### English
    /// Blocks until the gate is released or force-released.
    ///
    /// ### 中文
    /// 阻塞直到门被释放或被强制释放。
    pub fn wait(&self) -> GateWake {
        let mut state = self.state.lock();
        loop {
            if state.forced {
                return GateWake::Forced;
            }
            if state.released {
                state.released = false;
                return GateWake::Released;
            }
            self.signal.wait(&mut state);
        }
    }

    /// ### English
    /// Like [`Self::wait`] but gives up once `timeout` has elapsed, however many wakeups happen
    /// in between.
    ///
    /// ### 中文
    /// 与 [`Self::wait`] 相同，但在 `timeout` 耗尽后放弃等待，与期间发生多少次唤醒无关。
    pub fn wait_timeout(&self, timeout: Duration) -> GateWake {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.forced {
                return GateWake::Forced;
            }
            if state.released {
                state.released = false;
                return GateWake::Released;
            }
            if self.signal.wait_until(&mut state, deadline).timed_out() {
                if state.forced {
                    return GateWake::Forced;
                }
                if state.released {
                    state.released = false;
                    return GateWake::Released;
                }
                return GateWake::TimedOut;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn release_before_wait_is_consumed_once() {
        let gate = FrameGate::new();
        gate.release();
        gate.release();
        assert_eq!(gate.wait(), GateWake::Released);
        assert_eq!(
            gate.wait_timeout(Duration::from_millis(10)),
            GateWake::TimedOut
        );
    }

    #[test]
    fn release_wakes_blocked_waiter() {
        let gate = Arc::new(FrameGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        thread::sleep(Duration::from_millis(20));
        gate.release();
        assert_eq!(waiter.join().unwrap(), GateWake::Released);
    }

    #[test]
    fn force_release_is_sticky() {
        let gate = Arc::new(FrameGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        thread::sleep(Duration::from_millis(20));
        gate.force_release();
        assert_eq!(waiter.join().unwrap(), GateWake::Forced);
        assert_eq!(gate.wait(), GateWake::Forced);
        assert!(gate.is_forced());
    }

    #[test]
    fn bounded_wait_keeps_its_deadline_across_wakeups() {
        let gate = Arc::new(FrameGate::new());
        let stop = Arc::new(AtomicBool::new(false));
        let notifier = {
            let gate = gate.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    gate.signal.notify_all();
                    thread::sleep(Duration::from_millis(10));
                }
            })
        };

        let started = Instant::now();
        let wake = gate.wait_timeout(Duration::from_millis(100));
        let elapsed = started.elapsed();
        stop.store(true, Ordering::Release);
        notifier.join().unwrap();

        assert_eq!(wake, GateWake::TimedOut);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(600), "waited {elapsed:?}");
    }
}
