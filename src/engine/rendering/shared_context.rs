//! ### English
//! Offscreen GLFW context sharing objects with the host window, with its glow function table and
//! the capability probe the pixel ring depends on.
//!
//! ### 中文
//! 与宿主 window 共享对象的离屏 GLFW 上下文，附带其 glow 函数表以及像素环所依赖的能力探测。

use std::cell::Cell;
use std::ffi::CString;

use glow::HasContext as _;
use log::{debug, info};

use crate::engine::error::{RenderError, Result};
use crate::engine::glfw::{GlfwApi, GlfwWindowPtr};

/// ### English
/// Parsed `GL_VERSION`.
///
/// ### 中文
/// 解析后的 `GL_VERSION`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlVersion {
    pub major: u32,
    pub minor: u32,
    pub es: bool,
}

impl GlVersion {
    /// ### English
    /// Parses forms like `"4.6.0 NVIDIA 550.54"` or `"OpenGL ES 3.2 Mesa"`.
    ///
    /// ### 中文
    /// 解析 `"4.6.0 NVIDIA 550.54"` 或 `"OpenGL ES 3.2 Mesa"` 之类的字符串。
    pub fn parse(version: &str) -> Self {
        let es = version.starts_with("OpenGL ES");
        let number = version
            .split_whitespace()
            .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
            .unwrap_or("");
        let mut parts = number.split('.').map(|part| part.parse::<u32>().unwrap_or(0));
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            es,
        }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// ### English
    /// Whether fences (`glFenceSync`) are core for this version.
    ///
    /// ### 中文
    /// 该版本是否将 fence（`glFenceSync`）作为核心特性。
    pub fn has_core_sync(&self) -> bool {
        if self.es {
            self.at_least(3, 0)
        } else {
            self.at_least(3, 2)
        }
    }

    /// ### English
    /// Whether immutable buffer storage (persistent mapping) is core for this version.
    ///
    /// ### 中文
    /// 该版本是否将不可变 buffer 存储（持久映射）作为核心特性。
    pub fn has_core_buffer_storage(&self) -> bool {
        !self.es && self.at_least(4, 4)
    }
}

thread_local! {
    /// ### English
    /// Per-thread "current GLFW window" cache to avoid redundant `makeCurrent` calls.
    ///
    /// ### 中文
    /// 每线程缓存“当前 GLFW window”，避免重复 `makeCurrent` 调用。
    static CURRENT_GLFW_WINDOW: Cell<GlfwWindowPtr> = const { Cell::new(std::ptr::null_mut()) };
}

/// ### English
/// One offscreen GLFW window/context, used only on the thread that created it.
///
/// ### 中文
/// 一个离屏 GLFW window/上下文，只在创建它的线程上使用。
pub struct GlfwSharedContext {
    glfw: GlfwApi,
    window: GlfwWindowPtr,
    pub(super) gl: glow::Context,
    version: GlVersion,
}

impl GlfwSharedContext {
    /// ### English
    /// Creates an offscreen context sharing objects with `host_window` and probes it.
    ///
    /// Fails with [`RenderError::Initialization`] when the context cannot provide fences and
    /// persistently mapped pixel-pack buffers. The context is left unbound on return.
    ///
    /// ### 中文
    /// 创建与 `host_window` 共享对象的离屏上下文并进行探测。
    ///
    /// 若该上下文无法提供 fence 与持久映射的像素打包 buffer，则返回 [`RenderError::Initialization`]。
    /// 返回时上下文处于未绑定状态。
    pub fn new(host_window: GlfwWindowPtr) -> Result<Self> {
        let glfw = GlfwApi::installed()?;
        let window = unsafe { glfw.create_offscreen_window(host_window)? };

        let mut context = Self::load(glfw, window);
        context.bind();
        let probed = context.probe();
        context.unbind();
        context.version = probed?;
        info!(
            "shared GL context created: {}{}.{}",
            if context.version.es { "ES " } else { "" },
            context.version.major,
            context.version.minor
        );
        Ok(context)
    }

    fn load(glfw: GlfwApi, window: GlfwWindowPtr) -> Self {
        unsafe { glfw.make_current(window) };
        CURRENT_GLFW_WINDOW.with(|current| current.set(window));
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                CString::new(name).map_or(std::ptr::null(), |name| glfw.proc_address(&name))
            })
        };
        Self {
            glfw,
            window,
            gl,
            version: GlVersion {
                major: 0,
                minor: 0,
                es: false,
            },
        }
    }

    fn probe(&self) -> Result<GlVersion> {
        let version = GlVersion::parse(&unsafe { self.gl.get_parameter_string(glow::VERSION) });
        let extensions = self.gl.supported_extensions();
        debug!("GL version {version:?}, {} extension(s)", extensions.len());

        if !version.has_core_sync() && !extensions.contains("GL_ARB_sync") {
            return Err(RenderError::Initialization(format!(
                "GL {}.{} has no fence sync support",
                version.major, version.minor
            )));
        }
        let buffer_storage = version.has_core_buffer_storage()
            || extensions.contains("GL_ARB_buffer_storage")
            || extensions.contains("GL_EXT_buffer_storage");
        if !buffer_storage {
            return Err(RenderError::Initialization(format!(
                "GL {}.{} cannot persistently map pixel-pack buffers (no buffer storage)",
                version.major, version.minor
            )));
        }
        Ok(version)
    }

    pub fn version(&self) -> GlVersion {
        self.version
    }

    /// ### English
    /// Makes this context current on the calling thread (skipped when it already is).
    ///
    /// ### 中文
    /// 使该上下文在调用线程上成为 current（已是 current 时跳过）。
    pub(super) fn bind(&self) {
        CURRENT_GLFW_WINDOW.with(|current| {
            if current.get() != self.window {
                unsafe { self.glfw.make_current(self.window) };
                current.set(self.window);
            }
        });
    }

    pub(super) fn unbind(&self) {
        CURRENT_GLFW_WINDOW.with(|current| {
            if current.get() == self.window {
                unsafe { self.glfw.make_current(std::ptr::null_mut()) };
                current.set(std::ptr::null_mut());
            }
        });
    }
}

impl Drop for GlfwSharedContext {
    fn drop(&mut self) {
        self.unbind();
        unsafe { self.glfw.destroy(self.window) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_and_es_versions_parse() {
        let desktop = GlVersion::parse("4.6.0 NVIDIA 550.54.14");
        assert_eq!(
            desktop,
            GlVersion {
                major: 4,
                minor: 6,
                es: false
            }
        );
        assert!(desktop.has_core_sync());
        assert!(desktop.has_core_buffer_storage());

        let es = GlVersion::parse("OpenGL ES 3.2 Mesa 24.0.5");
        assert_eq!((es.major, es.minor, es.es), (3, 2, true));
        assert!(es.has_core_sync());
        assert!(!es.has_core_buffer_storage());

        let old = GlVersion::parse("3.3 (Core Profile) Mesa");
        assert!(old.has_core_sync());
        assert!(!old.has_core_buffer_storage());
    }

    #[test]
    fn garbage_version_parses_as_zero() {
        let version = GlVersion::parse("unknown renderer");
        assert_eq!((version.major, version.minor), (0, 0));
        assert!(!version.has_core_sync());
    }
}
