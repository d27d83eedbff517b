//! ### English
//! Render runtime orchestration (public API): the host handle, the renderer contract, events and
//! frame statistics. The render thread itself is private.
//!
//! ### 中文
//! 渲染运行时编排（对外公开 API）：宿主句柄、渲染器契约、事件与帧统计。渲染线程本身为私有实现。

mod control;
mod events;
mod host;
mod render_thread;
mod renderer;
mod stats;

pub use events::{RenderErrorEvent, RenderEvents};
pub use host::RenderHost;
pub use renderer::{FrameInfo, Renderer};
pub use stats::{FrameStats, FrameStatsSnapshot};
