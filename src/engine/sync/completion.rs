use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// ### English
/// Write-once result cell with blocking waiters.
///
/// Used for the render thread's init handshake and for every pipeline stage's completion. The
/// first `complete` wins; later calls are ignored and return `false`.
///
/// ### 中文
/// 只写一次的结果单元，支持阻塞等待。
///
/// 用于渲染线程的初始化握手以及每个管线阶段的完成状态。第一次 `complete` 生效；
/// 之后的调用被忽略并返回 `false`。
pub struct Completion<T> {
    value: Mutex<Option<T>>,
    signal: Condvar,
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(None),
            signal: Condvar::new(),
        })
    }

    /// ### English
    /// Stores the result if none is stored yet and wakes all waiters.
    ///
    /// ### 中文
    /// 若尚未写入结果则写入，并唤醒所有等待方。
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        drop(slot);
        self.signal.notify_all();
        true
    }

    pub fn is_completed(&self) -> bool {
        self.value.lock().is_some()
    }

    /// ### English
    /// Returns the stored result without blocking.
    ///
    /// ### 中文
    /// 非阻塞地返回已存储的结果。
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// ### English
    /// Blocks until a result is stored.
    ///
    /// ### 中文
    /// 阻塞直到结果被写入。
    pub fn wait(&self) -> T {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.signal.wait(&mut slot);
        }
    }

    /// ### English
    /// Blocks for at most `timeout`.
    ///
    /// ### 中文
    /// 最多阻塞 `timeout`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if self.signal.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
    }
}
