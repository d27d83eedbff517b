use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// ### English
/// Cooperative shutdown token. Cheap to clone; all clones observe the same flag.
///
/// The driver loop checks it at loop-top and after every gate wait.
///
/// ### 中文
/// 协作式关闭令牌。clone 成本低，所有副本观察同一个标记。
///
/// 驱动循环在每次循环开头以及每次门等待返回后检查它。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Requests cancellation. Idempotent.
    ///
    /// ### 中文
    /// 请求取消（幂等）。
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
