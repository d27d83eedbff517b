//! ### English
//! Minimal GLFW symbol table supplied by the embedder.
//!
//! The host UI already links GLFW and owns the window whose context is shared; it hands this
//! crate the handful of entry points needed to create offscreen shared contexts, so no dynamic
//! library lookup happens here.
//!
//! ### 中文
//! 由宿主提供的最小 GLFW 符号表。
//!
//! 宿主 UI 已链接 GLFW 并持有被共享上下文的 window；它把创建离屏共享上下文所需的少量入口交给本
//! crate，因此这里不做任何动态库查找。

use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::OnceLock;

use crate::engine::error::{RenderError, Result};

/// ### English
/// Opaque GLFW window type (`GLFWwindow`).
///
/// ### 中文
/// 不透明 GLFW window 类型（`GLFWwindow`）。
#[repr(C)]
pub struct GlfwWindow {
    _private: [u8; 0],
}

#[repr(C)]
struct GlfwMonitor {
    _private: [u8; 0],
}

/// ### English
/// Raw window pointer type used by this crate.
///
/// ### 中文
/// 本 crate 使用的 window 裸指针类型。
pub type GlfwWindowPtr = *mut GlfwWindow;

type GetProcAddressFn = unsafe extern "C" fn(*const c_char) -> *const c_void;
type MakeContextCurrentFn = unsafe extern "C" fn(GlfwWindowPtr);
type DefaultWindowHintsFn = unsafe extern "C" fn();
type WindowHintFn = unsafe extern "C" fn(c_int, c_int);
type GetWindowAttribFn = unsafe extern "C" fn(GlfwWindowPtr, c_int) -> c_int;
type CreateWindowFn = unsafe extern "C" fn(
    c_int,
    c_int,
    *const c_char,
    *mut GlfwMonitor,
    GlfwWindowPtr,
) -> GlfwWindowPtr;
type DestroyWindowFn = unsafe extern "C" fn(GlfwWindowPtr);

/// ### English
/// Function pointer table for the GLFW symbols the embedder provides.
///
/// All fields are raw addresses (`usize`) and must be non-zero when installing.
///
/// ### 中文
/// 宿主提供的 GLFW 符号函数指针表。
///
/// 所有字段都是原始地址（`usize`），安装时必须全部为非 0。
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedderGlfwApi {
    pub glfw_get_proc_address: usize,
    pub glfw_make_context_current: usize,
    pub glfw_default_window_hints: usize,
    pub glfw_window_hint: usize,
    pub glfw_get_window_attrib: usize,
    pub glfw_create_window: usize,
    pub glfw_destroy_window: usize,
}

impl EmbedderGlfwApi {
    fn missing_entry(&self) -> Option<&'static str> {
        [
            (self.glfw_get_proc_address, "glfwGetProcAddress"),
            (self.glfw_make_context_current, "glfwMakeContextCurrent"),
            (self.glfw_default_window_hints, "glfwDefaultWindowHints"),
            (self.glfw_window_hint, "glfwWindowHint"),
            (self.glfw_get_window_attrib, "glfwGetWindowAttrib"),
            (self.glfw_create_window, "glfwCreateWindow"),
            (self.glfw_destroy_window, "glfwDestroyWindow"),
        ]
        .into_iter()
        .find_map(|(address, name)| (address == 0).then_some(name))
    }
}

static EMBEDDER_GLFW_API: OnceLock<GlfwApi> = OnceLock::new();

/// ### English
/// Installs the embedder's GLFW function table for this process. Must run before the first
/// [`crate::GlfwContextProvider`] creates a context; a second installation is refused.
///
/// #### Parameters
/// - `api`: Embedder function pointer table for the required GLFW symbols.
///
/// ### 中文
/// 为当前进程安装宿主的 GLFW 函数表。必须在第一个 [`crate::GlfwContextProvider`] 创建上下文之前
/// 调用；重复安装会被拒绝。
///
/// #### 参数
/// - `api`：宿主提供的 GLFW 必需符号函数指针表。
pub fn install_embedder_glfw_api(api: EmbedderGlfwApi) -> Result<()> {
    if let Some(name) = api.missing_entry() {
        return Err(RenderError::Initialization(format!(
            "embedder GLFW table has no `{name}`"
        )));
    }

    // SAFETY: every address is non-zero and, per the installation contract, points at the GLFW
    // function of the matching signature.
    let table = unsafe {
        GlfwApi {
            get_proc_address: std::mem::transmute::<usize, GetProcAddressFn>(
                api.glfw_get_proc_address,
            ),
            make_context_current: std::mem::transmute::<usize, MakeContextCurrentFn>(
                api.glfw_make_context_current,
            ),
            default_window_hints: std::mem::transmute::<usize, DefaultWindowHintsFn>(
                api.glfw_default_window_hints,
            ),
            window_hint: std::mem::transmute::<usize, WindowHintFn>(api.glfw_window_hint),
            get_window_attrib: std::mem::transmute::<usize, GetWindowAttribFn>(
                api.glfw_get_window_attrib,
            ),
            create_window: std::mem::transmute::<usize, CreateWindowFn>(api.glfw_create_window),
            destroy_window: std::mem::transmute::<usize, DestroyWindowFn>(api.glfw_destroy_window),
        }
    };

    EMBEDDER_GLFW_API.set(table).map_err(|_| {
        RenderError::Initialization("embedder GLFW table is already installed".to_string())
    })
}

/// ### English
/// Installed GLFW entry points (context control, proc loading, offscreen windows).
///
/// ### 中文
/// 已安装的 GLFW 入口（上下文控制、函数指针加载、离屏 window）。
#[derive(Clone, Copy)]
pub(crate) struct GlfwApi {
    get_proc_address: GetProcAddressFn,
    make_context_current: MakeContextCurrentFn,
    default_window_hints: DefaultWindowHintsFn,
    window_hint: WindowHintFn,
    get_window_attrib: GetWindowAttribFn,
    create_window: CreateWindowFn,
    destroy_window: DestroyWindowFn,
}

impl GlfwApi {
    /// ### English
    /// Returns the installed table, or an initialization error if the embedder never installed one.
    ///
    /// ### 中文
    /// 返回已安装的函数表；若宿主从未安装则返回初始化错误。
    pub(crate) fn installed() -> Result<Self> {
        EMBEDDER_GLFW_API.get().copied().ok_or_else(|| {
            RenderError::Initialization(
                "embedder GLFW table is not installed; call install_embedder_glfw_api first"
                    .to_string(),
            )
        })
    }

    #[inline]
    pub(crate) unsafe fn make_current(&self, window: GlfwWindowPtr) {
        unsafe { (self.make_context_current)(window) };
    }

    #[inline]
    pub(crate) unsafe fn proc_address(&self, name: &CStr) -> *const c_void {
        unsafe { (self.get_proc_address)(name.as_ptr()) }
    }

    #[inline]
    pub(crate) unsafe fn destroy(&self, window: GlfwWindowPtr) {
        unsafe { (self.destroy_window)(window) };
    }

    /// ### English
    /// Creates an invisible 1x1 window whose context shares objects with `share` and copies its
    /// API, version, profile and creation flags.
    ///
    /// # Safety
    /// `share` must be a live GLFW window; GLFW's window-creation thread rules apply.
    ///
    /// ### 中文
    /// 创建一个不可见的 1x1 window，其上下文与 `share` 共享对象，并沿用其 API、版本、profile 与
    /// 创建标志。
    ///
    /// # Safety
    /// `share` 必须是存活的 GLFW window；需遵守 GLFW 的窗口创建线程规则。
    pub(crate) unsafe fn create_offscreen_window(
        &self,
        share: GlfwWindowPtr,
    ) -> Result<GlfwWindowPtr> {
        const GLFW_FALSE: c_int = 0;
        const GLFW_FOCUSED: c_int = 0x0002_0001;
        const GLFW_RESIZABLE: c_int = 0x0002_0003;
        const GLFW_VISIBLE: c_int = 0x0002_0004;

        /// Context hints copied verbatim from the shared window (`0` means "leave default").
        const COPIED_HINTS: [c_int; 7] = [
            0x0002_2001, // GLFW_CLIENT_API
            0x0002_2002, // GLFW_CONTEXT_VERSION_MAJOR
            0x0002_2003, // GLFW_CONTEXT_VERSION_MINOR
            0x0002_2006, // GLFW_OPENGL_FORWARD_COMPAT
            0x0002_2007, // GLFW_OPENGL_DEBUG_CONTEXT
            0x0002_2008, // GLFW_OPENGL_PROFILE
            0x0002_200B, // GLFW_CONTEXT_CREATION_API
        ];

        if share.is_null() {
            return Err(RenderError::ContextCreation(
                "host GLFW window is null".to_string(),
            ));
        }

        let copied = COPIED_HINTS.map(|hint| (hint, unsafe { (self.get_window_attrib)(share, hint) }));

        unsafe {
            (self.default_window_hints)();
            (self.window_hint)(GLFW_VISIBLE, GLFW_FALSE);
            (self.window_hint)(GLFW_FOCUSED, GLFW_FALSE);
            (self.window_hint)(GLFW_RESIZABLE, GLFW_FALSE);
            for (hint, value) in copied {
                if value != 0 {
                    (self.window_hint)(hint, value);
                }
            }
        }

        let title = c"gl-host-surface-offscreen";
        let window = unsafe {
            (self.create_window)(1, 1, title.as_ptr(), std::ptr::null_mut(), share)
        };
        unsafe { (self.default_window_hints)() };

        if window.is_null() {
            return Err(RenderError::ContextCreation(
                "glfwCreateWindow returned null for the shared offscreen window".to_string(),
            ));
        }
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    use super::*;

    static HINTS_SET: AtomicUsize = AtomicUsize::new(0);
    static LAST_MAJOR: AtomicI32 = AtomicI32::new(0);
    static CREATED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn get_proc_address(_name: *const c_char) -> *const c_void {
        std::ptr::null()
    }
    unsafe extern "C" fn make_context_current(_window: GlfwWindowPtr) {}
    unsafe extern "C" fn default_window_hints() {}
    unsafe extern "C" fn window_hint(hint: c_int, value: c_int) {
        HINTS_SET.fetch_add(1, Ordering::SeqCst);
        if hint == 0x0002_2002 {
            LAST_MAJOR.store(value, Ordering::SeqCst);
        }
    }
    unsafe extern "C" fn get_window_attrib(_window: GlfwWindowPtr, attrib: c_int) -> c_int {
        match attrib {
            0x0002_2002 => 4,
            0x0002_2003 => 5,
            _ => 0,
        }
    }
    unsafe extern "C" fn create_window(
        _width: c_int,
        _height: c_int,
        _title: *const c_char,
        _monitor: *mut GlfwMonitor,
        share: GlfwWindowPtr,
    ) -> GlfwWindowPtr {
        CREATED.fetch_add(1, Ordering::SeqCst);
        share.wrapping_byte_add(64)
    }
    unsafe extern "C" fn destroy_window(_window: GlfwWindowPtr) {}

    fn table() -> EmbedderGlfwApi {
        EmbedderGlfwApi {
            glfw_get_proc_address: get_proc_address as usize,
            glfw_make_context_current: make_context_current as usize,
            glfw_default_window_hints: default_window_hints as usize,
            glfw_window_hint: window_hint as usize,
            glfw_get_window_attrib: get_window_attrib as usize,
            glfw_create_window: create_window as usize,
            glfw_destroy_window: destroy_window as usize,
        }
    }

    #[test]
    fn incomplete_table_is_refused() {
        let mut api = table();
        api.glfw_window_hint = 0;
        let error = install_embedder_glfw_api(api).unwrap_err();
        assert!(error.to_string().contains("glfwWindowHint"));
    }

    #[test]
    fn installed_table_creates_offscreen_windows_with_copied_hints() {
        install_embedder_glfw_api(table()).unwrap();
        assert!(install_embedder_glfw_api(table()).is_err());

        let glfw = GlfwApi::installed().unwrap();
        let host = 0x1000usize as GlfwWindowPtr;
        let window = unsafe { glfw.create_offscreen_window(host) }.unwrap();
        assert_ne!(window, host);
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_MAJOR.load(Ordering::SeqCst), 4);
        // Three visibility hints plus the two non-zero copied ones.
        assert_eq!(HINTS_SET.load(Ordering::SeqCst), 5);

        assert!(unsafe { glfw.create_offscreen_window(std::ptr::null_mut()) }.is_err());
    }
}
