//! ### English
//! Frame synchronization primitives shared by the render thread, the pipeline workers and the UI
//! thread.
//!
//! - `FrameGate`: single-slot wait/signal gate (one-shot consume, sticky force-release).
//! - `FrameSemaphore`: bounded permits capping in-flight frames (cancellable).
//! - `Completion`: write-once result cell with blocking waiters.
//! - `CancelToken`: cooperative shutdown flag.
//! - `Backoff`: bounded busy-spin used before a hot-path wait parks.
//!
//! ### 中文
//! 渲染线程、管线工作线程与 UI 线程共用的帧同步原语。
//!
//! - `FrameGate`：单槽等待/唤醒门（一次性消费，强制释放后保持打开）。
//! - `FrameSemaphore`：限制在途帧数量的有界许可（可取消）。
//! - `Completion`：只写一次的结果单元，支持阻塞等待。
//! - `CancelToken`：协作式关闭标记。
//! - `Backoff`：热路径等待转为 park 之前使用的有界忙等自旋。
mod backoff;
mod cancel;
mod completion;
mod gate;
mod semaphore;

pub(crate) use backoff::{Backoff, DEFAULT_SPIN_LIMIT};
pub use cancel::CancelToken;
pub use completion::Completion;
pub use gate::{FrameGate, GateWake};
pub use semaphore::{FramePermit, FrameSemaphore};
