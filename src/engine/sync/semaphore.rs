//! ### English
//! Bounded, cancellable semaphore capping the number of frames in flight.
//!
//! Permits are RAII guards carried inside pipeline payloads; the permit returns when the payload
//! is dropped, which happens after commit, on a skipped frame, or when a stage faults.
//!
//! ### 中文
//! 限制在途帧数量的有界、可取消信号量。
//!
//! 许可是随管线载荷一起移动的 RAII 守卫；载荷被 drop 时许可归还，这发生在提交之后、帧被跳过时，
//! 或阶段故障时。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct SemaphoreState {
    available: usize,
    cancelled: bool,
}

/// ### English
/// Counting semaphore with a fixed permit count.
///
/// ### 中文
/// 固定许可数的计数信号量。
pub struct FrameSemaphore {
    state: Mutex<SemaphoreState>,
    signal: Condvar,
    capacity: usize,
}

impl FrameSemaphore {
    /// ### English
    /// Creates a semaphore with `permits` permits (at least one).
    ///
    /// ### 中文
    /// 创建拥有 `permits` 个许可（至少 1 个）的信号量。
    pub fn new(permits: usize) -> Arc<Self> {
        let capacity = permits.max(1);
        Arc::new(Self {
            state: Mutex::new(SemaphoreState {
                available: capacity,
                cancelled: false,
            }),
            signal: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// ### English
    /// Blocks until a permit is free. Returns `None` once the semaphore is cancelled.
    ///
    /// ### 中文
    /// 阻塞直到有空闲许可。信号量被取消后返回 `None`。
    pub fn acquire(self: &Arc<Self>) -> Option<FramePermit> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if state.available > 0 {
                state.available -= 1;
                return Some(FramePermit {
                    semaphore: self.clone(),
                });
            }
            self.signal.wait(&mut state);
        }
    }

    /// ### English
    /// Bounded variant of [`Self::acquire`]; `None` on timeout or cancellation.
    ///
    /// ### 中文
    /// [`Self::acquire`] 的限时版本；超时或取消时返回 `None`。
    pub fn acquire_timeout(self: &Arc<Self>, timeout: Duration) -> Option<FramePermit> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if state.available > 0 {
                state.available -= 1;
                return Some(FramePermit {
                    semaphore: self.clone(),
                });
            }
            if self.signal.wait_for(&mut state, timeout).timed_out() {
                return None;
            }
        }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<FramePermit> {
        let mut state = self.state.lock();
        if state.cancelled || state.available == 0 {
            return None;
        }
        state.available -= 1;
        Some(FramePermit {
            semaphore: self.clone(),
        })
    }

    /// ### English
    /// Wakes every waiter and makes all future acquires fail.
    ///
    /// ### 中文
    /// 唤醒所有等待方，并使之后的所有 acquire 失败。
    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.signal.notify_all();
    }

    fn release_one(&self) {
        let mut state = self.state.lock();
        if state.available < self.capacity {
            state.available += 1;
        }
        drop(state);
        self.signal.notify_one();
    }
}

/// ### English
/// One acquired permit; returned to its semaphore on drop.
///
/// ### 中文
/// 一个已获取的许可；drop 时归还给所属信号量。
pub struct FramePermit {
    semaphore: Arc<FrameSemaphore>,
}

impl std::fmt::Debug for FramePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePermit")
            .field("capacity", &self.semaphore.capacity)
            .finish()
    }
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        self.semaphore.release_one();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn permits_return_on_drop() {
        let semaphore = FrameSemaphore::new(2);
        let first = semaphore.try_acquire().unwrap();
        let second = semaphore.try_acquire().unwrap();
        assert!(semaphore.try_acquire().is_none());
        drop(first);
        assert_eq!(semaphore.available(), 1);
        drop(second);
        assert_eq!(semaphore.available(), 2);
    }

    #[test]
    fn blocked_acquire_resumes_when_permit_returns() {
        let semaphore = FrameSemaphore::new(1);
        let held = semaphore.acquire().unwrap();
        let waiter = {
            let semaphore = semaphore.clone();
            thread::spawn(move || semaphore.acquire().is_some())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn cancel_unblocks_waiters() {
        let semaphore = FrameSemaphore::new(1);
        let _held = semaphore.acquire().unwrap();
        let waiter = {
            let semaphore = semaphore.clone();
            thread::spawn(move || semaphore.acquire().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        semaphore.cancel();
        assert!(waiter.join().unwrap());
        assert!(
            semaphore
                .acquire_timeout(Duration::from_millis(5))
                .is_none()
        );
    }
}
