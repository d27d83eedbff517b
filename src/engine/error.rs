//! ### English
//! Error taxonomy for the render host: fatal initialization errors, per-tick recoverable errors
//! and pipeline stage faults.
//!
//! ### 中文
//! 渲染宿主的错误分类：致命的初始化错误、可恢复的单帧错误，以及管线阶段故障。

use std::fmt;

use thiserror::Error;

/// ### English
/// Result alias used across the crate.
///
/// ### 中文
/// crate 内统一使用的 Result 别名。
pub type Result<T> = std::result::Result<T, RenderError>;

/// ### English
/// Errors raised by the render procedure, the pixel transfer ring and the pipeline.
///
/// Every variant is `Clone` so one fault can be observed by all completion waiters.
///
/// ### 中文
/// 渲染过程、像素传输环与管线产生的错误。
///
/// 所有变体均可 `Clone`，以便同一故障能被所有 completion 等待方观察到。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Generic initialization failure (context, capability probe, startup allocation).
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// `initialize` was called on an already initialized procedure.
    #[error("render procedure is already initialized")]
    AlreadyInitialized,

    /// Operation not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The host could not provide a GL context.
    #[error("GL context creation failed: {0}")]
    ContextCreation(String),

    /// A GPU allocation (framebuffer or pixel buffer) failed.
    #[error("GPU allocation of {bytes} bytes failed: {reason}")]
    OutOfMemory { bytes: usize, reason: String },

    /// Any other GL level failure (fence wait failed, incomplete framebuffer, ...).
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Error surfaced by application renderer code.
    #[error("renderer failed: {0}")]
    Renderer(String),

    /// Renderer code panicked; the payload message is kept.
    #[error("renderer panicked: {0}")]
    Panicked(String),

    /// The pipeline no longer accepts frames.
    #[error("pipeline is closed")]
    PipelineClosed,

    /// The shutdown token was observed while waiting.
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// A bounded wait expired.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),
}

impl RenderError {
    /// ### English
    /// Converts a caught panic payload into `RenderError::Panicked`.
    ///
    /// ### 中文
    /// 将捕获到的 panic 载荷转换为 `RenderError::Panicked`。
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        RenderError::Panicked(message)
    }
}

/// ### English
/// Phase tag attached to render-error events.
///
/// ### 中文
/// 附加在 render-error 事件上的阶段标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPhase {
    /// Context creation, startup allocation, or reallocation on resize.
    Initialize,
    /// Renderer callbacks and the draw/readback of one frame.
    Render,
    /// Pipeline plumbing (posting, readback stage, copy stage).
    Internal,
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderPhase::Initialize => "initialize",
            RenderPhase::Render => "render",
            RenderPhase::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// ### English
/// Pipeline stage identifiers (used in fault reports and thread names).
///
/// ### 中文
/// 管线阶段标识（用于故障报告与线程命名）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Readback,
    Copy,
    Commit,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Readback => "readback",
            PipelineStage::Copy => "copy",
            PipelineStage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// ### English
/// A stage fault: which stage failed first and the original error.
///
/// Downstream stages re-raise the same value instead of completing.
///
/// ### 中文
/// 阶段故障：最先失败的阶段以及原始错误。
///
/// 下游阶段会原样传递该值，而不是正常完成。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pipeline stage `{stage}` faulted: {error}")]
pub struct PipelineFault {
    pub stage: PipelineStage,
    pub error: RenderError,
}
