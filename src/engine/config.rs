//! ### English
//! Construction-time configuration and render tactics.
//!
//! Runtime-tunable values (visibility, continuous rendering, frame-rate cap, size) are changed
//! through explicit setters on the host handle; everything here is fixed once the render thread
//! starts.
//!
//! ### 中文
//! 构造期配置与渲染策略（render tactic）。
//!
//! 运行期可调的值（可见性、连续渲染、帧率上限、尺寸）通过宿主句柄上的显式 setter 修改；
//! 此处的配置在渲染线程启动后即固定。

use std::time::Duration;

/// ### English
/// Default pixel-buffer ring depth.
///
/// ### 中文
/// 像素缓冲环的默认深度。
pub const DEFAULT_RING_DEPTH: usize = 3;

/// ### English
/// Sleep applied when the renderer declines a tick and the size did not change.
///
/// ### 中文
/// 渲染器拒绝本帧且尺寸未变化时的休眠时长。
pub const DECLINED_RENDER_SLEEP: Duration = Duration::from_millis(30);

/// ### English
/// Longest time the render thread parks on a full pixel-buffer ring before returning to its gates.
///
/// ### 中文
/// 渲染线程在像素缓冲环已满时 park 的最长时间，超时后回到各个门。
pub const SLOT_WAIT: Duration = Duration::from_millis(30);

/// Upper bound for copy-stage parallelism.
const MAX_COPY_PARALLELISM: usize = 3;

/// ### English
/// Named bundle of concurrency/backpressure settings.
///
/// ### 中文
/// 并发/背压设置的命名组合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderTactic {
    /// One frame in flight; the render thread waits until the previous frame is committed; the
    /// UI paint cadence drives presentation.
    LatencyPriority,
    /// Parallel copies, no semaphore; the pipeline requests repaints itself.
    ThroughputPriority,
    /// Parallel copies, in-flight frames capped by commit completion; the pipeline requests
    /// repaints itself.
    #[default]
    Balance,
}

/// ### English
/// How the render thread is gated between frames.
///
/// ### 中文
/// 渲染线程在帧与帧之间的门控方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameGating {
    /// Only the capacity-1 head channel throttles the render thread.
    Ungated,
    /// A semaphore with the given number of permits; a permit returns when its frame is
    /// committed or dropped.
    CommitGated { permits: usize },
}

/// ### English
/// Who triggers UI invalidation when a frame is ready to commit.
///
/// ### 中文
/// 帧可提交时由谁触发 UI 失效重绘。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationDriver {
    /// The UI paints at its own cadence and commits whatever is queued.
    Ui,
    /// The pipeline fires the `frame-ready` event (coalesced until the next commit).
    Internal,
}

/// ### English
/// Concrete settings derived from a tactic for a given machine.
///
/// ### 中文
/// 针对具体机器由 tactic 推导出的实际设置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TacticProfile {
    pub parallelism: usize,
    pub gating: FrameGating,
    pub invalidation: InvalidationDriver,
}

impl RenderTactic {
    /// ### English
    /// Resolves the tactic for a machine with `logical_cores` cores.
    ///
    /// ### 中文
    /// 针对拥有 `logical_cores` 个逻辑核的机器解析该 tactic。
    pub fn profile_for(self, logical_cores: usize) -> TacticProfile {
        let parallel = (logical_cores / 2).clamp(1, MAX_COPY_PARALLELISM);
        match self {
            RenderTactic::LatencyPriority => TacticProfile {
                parallelism: 1,
                gating: FrameGating::CommitGated { permits: 1 },
                invalidation: InvalidationDriver::Ui,
            },
            RenderTactic::ThroughputPriority => TacticProfile {
                parallelism: parallel,
                gating: FrameGating::Ungated,
                invalidation: InvalidationDriver::Internal,
            },
            RenderTactic::Balance => TacticProfile {
                parallelism: parallel,
                gating: FrameGating::CommitGated { permits: parallel },
                invalidation: InvalidationDriver::Internal,
            },
        }
    }

    /// ### English
    /// Resolves the tactic for the current machine (`num_cpus::get()`).
    ///
    /// ### 中文
    /// 针对当前机器（`num_cpus::get()`）解析该 tactic。
    pub fn profile(self) -> TacticProfile {
        self.profile_for(num_cpus::get())
    }
}

/// ### English
/// Byte order of pixels packed into the transfer ring.
///
/// ### 中文
/// 打包进传输环的像素字节顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// Toolkit bitmap order (premultiplied BGRA surfaces).
    #[default]
    Bgra8,
    Rgba8,
}

/// ### English
/// Construction-time configuration for [`crate::RenderHost`].
///
/// ### 中文
/// [`crate::RenderHost`] 的构造期配置。
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub tactic: RenderTactic,
    /// ### English
    /// Number of slots in the pixel-buffer ring (clamped to at least 2).
    ///
    /// ### 中文
    /// 像素缓冲环的槽位数（至少为 2）。
    pub ring_depth: usize,
    /// ### English
    /// Multisample count; `0` or `1` disables multisampling.
    ///
    /// ### 中文
    /// 多重采样数；`0` 或 `1` 表示关闭多重采样。
    pub samples: u32,
    /// ### English
    /// Frame-rate cap; `<= 0` means unlimited.
    ///
    /// ### 中文
    /// 帧率上限；`<= 0` 表示不限制。
    pub max_fps: f64,
    pub pixel_format: PixelFormat,
    /// ### English
    /// Timeout passed to the readback stage's fence poll. Zero makes it a pure poll.
    ///
    /// ### 中文
    /// 回读阶段轮询 fence 时使用的超时；为 0 时即纯轮询。
    pub fence_timeout: Duration,
    /// ### English
    /// Busy-spin iterations before the slot wait parks.
    ///
    /// ### 中文
    /// 槽位等待转为 park 之前的忙等自旋次数。
    pub spin_budget: u32,
    /// ### English
    /// Bound on one slot wait. When it expires the render thread skips the tick and re-checks
    /// visibility, continuous rendering and size.
    ///
    /// ### 中文
    /// 单次槽位等待的上限。超时后渲染线程跳过本帧，并重新检查可见性、连续渲染与尺寸。
    pub slot_wait: Duration,
    pub declined_render_sleep: Duration,
    /// ### English
    /// Maximum time `RenderHost::start` waits for the render thread to create its context.
    ///
    /// ### 中文
    /// `RenderHost::start` 等待渲染线程创建上下文的最长时间。
    pub init_timeout: Duration,
    pub initially_visible: bool,
    pub initially_continuous: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tactic: RenderTactic::default(),
            ring_depth: DEFAULT_RING_DEPTH,
            samples: 0,
            max_fps: 0.0,
            pixel_format: PixelFormat::default(),
            fence_timeout: Duration::from_millis(1),
            spin_budget: 64,
            slot_wait: SLOT_WAIT,
            declined_render_sleep: DECLINED_RENDER_SLEEP,
            init_timeout: Duration::from_secs(30),
            initially_visible: true,
            initially_continuous: true,
        }
    }
}

impl RenderConfig {
    /// ### English
    /// Effective ring depth (at least two slots so reads and writes can alternate).
    ///
    /// ### 中文
    /// 实际的环深度（至少两个槽位，使读写可以交替）。
    pub fn effective_ring_depth(&self) -> usize {
        self.ring_depth.max(2)
    }

    /// ### English
    /// Returns `true` when `samples` requests a multisampled target.
    ///
    /// ### 中文
    /// 当 `samples` 请求多重采样目标时返回 `true`。
    pub fn multisampled(&self) -> bool {
        self.samples > 1
    }
}

/// ### English
/// Converts a frame-rate cap into a frame budget (`None` = unlimited).
///
/// ### 中文
/// 将帧率上限转换为单帧时间预算（`None` 表示不限制）。
pub(crate) fn frame_budget(max_fps: f64) -> Option<Duration> {
    if max_fps.is_finite() && max_fps > 0.0 {
        Some(Duration::from_secs_f64(1.0 / max_fps))
    } else {
        None
    }
}
