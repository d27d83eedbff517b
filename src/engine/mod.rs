//! ### English
//! Engine internals: configuration, the GL seam and its GLFW/glow backend, the render thread,
//! the readback/copy pipeline and the UI-side presenter.
//!
//! ### 中文
//! 引擎内部模块：配置、GL 接缝及其 GLFW/glow 后端、渲染线程、回读/拷贝管线以及 UI 侧 presenter。
pub mod canvas;
pub mod config;
pub mod error;
pub mod glfw;
pub mod pipeline;
pub mod rendering;
pub mod runtime;
pub mod sync;
pub mod target;

#[cfg(test)]
pub(crate) mod test_support;
