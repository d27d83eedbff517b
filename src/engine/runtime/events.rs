//! ### English
//! Outward events raised by the render thread and the pipeline.
//!
//! Callbacks run on the thread that raises them (render thread, copy workers) and must not block.
//!
//! ### 中文
//! 由渲染线程与管线向外发出的事件。
//!
//! 回调在发出事件的线程（渲染线程、拷贝工作线程）上运行，不得阻塞。

use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, warn};

use crate::engine::error::{RenderError, RenderPhase};

use super::renderer::FrameInfo;

/// ### English
/// Payload of the render-error event.
///
/// ### 中文
/// render-error 事件的载荷。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderErrorEvent {
    pub phase: RenderPhase,
    pub error: RenderError,
}

type ErrorCallback = Box<dyn Fn(&RenderErrorEvent) + Send + Sync>;
type FrameCallback = Box<dyn Fn(&FrameInfo) + Send + Sync>;
type ReadyCallback = Box<dyn Fn() + Send + Sync>;

/// ### English
/// Event sinks installed by the host. Every sink is optional.
///
/// `on_frame_ready` is the invalidation request of internally driven tactics; it is coalesced so
/// it fires at most once between two commits.
///
/// ### 中文
/// 宿主安装的事件接收器，均为可选。
///
/// `on_frame_ready` 是内部驱动型 tactic 的失效重绘请求；它会被合并，两次提交之间最多触发一次。
#[derive(Default)]
pub struct RenderEvents {
    on_render_error: Option<ErrorCallback>,
    on_before_render: Option<FrameCallback>,
    on_after_render: Option<FrameCallback>,
    on_frame_ready: Option<ReadyCallback>,
    ready_pending: AtomicBool,
}

impl RenderEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_render_error(
        mut self,
        callback: impl Fn(&RenderErrorEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_render_error = Some(Box::new(callback));
        self
    }

    pub fn on_before_render(mut self, callback: impl Fn(&FrameInfo) + Send + Sync + 'static) -> Self {
        self.on_before_render = Some(Box::new(callback));
        self
    }

    pub fn on_after_render(mut self, callback: impl Fn(&FrameInfo) + Send + Sync + 'static) -> Self {
        self.on_after_render = Some(Box::new(callback));
        self
    }

    pub fn on_frame_ready(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_frame_ready = Some(Box::new(callback));
        self
    }

    /// ### English
    /// Logs and forwards an error. Initialization errors are logged at `error`, the rest at `warn`.
    ///
    /// ### 中文
    /// 记录并转发错误。初始化错误以 `error` 级别记录，其余以 `warn` 级别记录。
    pub(crate) fn render_error(&self, phase: RenderPhase, error: RenderError) {
        match phase {
            RenderPhase::Initialize => error!("render error during {phase}: {error}"),
            RenderPhase::Render | RenderPhase::Internal => {
                warn!("render error during {phase}: {error}")
            }
        }
        if let Some(callback) = &self.on_render_error {
            callback(&RenderErrorEvent { phase, error });
        }
    }

    pub(crate) fn before_render(&self, frame: &FrameInfo) {
        if let Some(callback) = &self.on_before_render {
            callback(frame);
        }
    }

    pub(crate) fn after_render(&self, frame: &FrameInfo) {
        if let Some(callback) = &self.on_after_render {
            callback(frame);
        }
    }

    /// ### English
    /// Requests one UI invalidation unless a request is already outstanding.
    ///
    /// ### 中文
    /// 请求一次 UI 失效重绘；若已有未处理的请求则忽略。
    pub(crate) fn frame_ready(&self) {
        if self.ready_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(callback) = &self.on_frame_ready {
            callback();
        }
    }

    /// ### English
    /// Re-arms `frame_ready`; called by the commit on the UI thread.
    ///
    /// ### 中文
    /// 重新启用 `frame_ready`；由 UI 线程上的提交调用。
    pub(crate) fn frame_consumed(&self) {
        self.ready_pending.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for RenderEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEvents")
            .field("on_render_error", &self.on_render_error.is_some())
            .field("on_before_render", &self.on_before_render.is_some())
            .field("on_after_render", &self.on_after_render.is_some())
            .field("on_frame_ready", &self.on_frame_ready.is_some())
            .finish()
    }
}
