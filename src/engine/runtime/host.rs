//! ### English
//! Host handle that spawns and owns the render thread.
//!
//! ### 中文
//! 创建并持有渲染线程的宿主句柄。

use std::sync::Arc;
use std::thread;

use log::{error, info, warn};

use crate::engine::config::{RenderConfig, TacticProfile};
use crate::engine::error::{RenderError, Result};
use crate::engine::pipeline::Presenter;
use crate::engine::rendering::ContextProvider;
use crate::engine::sync::Completion;
use crate::engine::target::RenderTargetInfo;

use super::control::RenderControl;
use super::events::RenderEvents;
use super::render_thread::{self, RenderThreadInit};
use super::renderer::Renderer;
use super::stats::{FrameStats, FrameStatsSnapshot};

/// ### English
/// Owner of one render thread and its frame pipeline.
///
/// Setters may be called from any thread; they update cached values the render thread polls
/// once per tick and wake it if it is parked.
///
/// ### 中文
/// 持有一个渲染线程及其帧管线。
///
/// setter 可在任意线程调用；它们更新渲染线程每个 tick 轮询一次的缓存值，并在其休眠时将其唤醒。
pub struct RenderHost {
    /// ### English
    /// State shared with the render thread (flags, gates, target, semaphore).
    ///
    /// ### 中文
    /// 与渲染线程共享的状态（标记、门、目标、信号量）。
    control: Arc<RenderControl>,
    presenter: Presenter,
    stats: Arc<FrameStats>,
    profile: TacticProfile,
    /// ### English
    /// Join handle for the render thread (`None` after shutdown).
    ///
    /// ### 中文
    /// 渲染线程的 join handle（关闭后为 `None`）。
    thread: Option<thread::JoinHandle<()>>,
}

impl RenderHost {
    /// ### English
    /// Spawns the render thread and blocks until it has created its context, initialized the
    /// renderer and started the pipeline (or until `config.init_timeout` expires).
    ///
    /// Rendering starts once a non-empty target is set with [`Self::resize`].
    ///
    /// #### Parameters
    /// - `provider`: GL context source for the render and readback threads.
    /// - `renderer`: Application renderer, moved onto the render thread.
    /// - `config`: Tactic, ring depth, multisampling, frame-rate cap and timeouts.
    /// - `events`: Outward event sinks.
    ///
    /// ### 中文
    /// 启动渲染线程并阻塞，直到其创建好上下文、初始化渲染器并启动管线（或 `config.init_timeout`
    /// 超时）。
    ///
    /// 通过 [`Self::resize`] 设置非空目标后才开始渲染。
    ///
    /// #### 参数
    /// - `provider`：渲染线程与回读线程的 GL 上下文来源。
    /// - `renderer`：应用渲染器，会被移动到渲染线程。
    /// - `config`：tactic、环深度、多重采样、帧率上限与各类超时。
    /// - `events`：对外事件接收器。
    pub fn start<P, R>(
        provider: Arc<P>,
        renderer: R,
        config: RenderConfig,
        events: RenderEvents,
    ) -> Result<Self>
    where
        P: ContextProvider,
        R: Renderer<P::Device> + 'static,
    {
        let profile = config.tactic.profile();
        let control = Arc::new(RenderControl::new(&config, &profile));
        let stats = Arc::new(FrameStats::new());
        let presenter = Presenter::new();
        let init = Completion::<Result<()>>::new();
        let init_timeout = config.init_timeout;

        let thread_init = RenderThreadInit {
            provider,
            renderer,
            config,
            profile,
            control: control.clone(),
            events: Arc::new(events),
            stats: stats.clone(),
            presenter: presenter.clone(),
            init: init.clone(),
        };
        let thread = thread::Builder::new()
            .name("gl-render".to_string())
            .spawn(move || render_thread::run_render_thread(thread_init))
            .map_err(|error| {
                RenderError::Initialization(format!("failed to spawn the render thread: {error}"))
            })?;

        match init.wait_timeout(init_timeout) {
            Some(Ok(())) => {
                info!("render host started: {:?}", profile);
                Ok(Self {
                    control,
                    presenter,
                    stats,
                    profile,
                    thread: Some(thread),
                })
            }
            Some(Err(error)) => {
                control.shutdown();
                if thread.join().is_err() {
                    error!("render thread panicked during initialization");
                }
                Err(error)
            }
            None => {
                // The thread may still be inside context creation; it exits on its own once it
                // observes the cancelled token.
                control.shutdown();
                warn!("render thread did not initialize within {init_timeout:?}");
                let millis = u64::try_from(init_timeout.as_millis()).unwrap_or(u64::MAX);
                Err(RenderError::Timeout(millis))
            }
        }
    }

    /// ### English
    /// Shows or hides the render target. A hidden target parks the render thread.
    ///
    /// ### 中文
    /// 显示或隐藏渲染目标。隐藏时渲染线程会休眠。
    pub fn set_visible(&self, visible: bool) {
        self.control.set_visible(visible);
    }

    /// ### English
    /// Enables or disables continuous rendering. When disabled, frames are only produced by
    /// [`Self::request_render`].
    ///
    /// ### 中文
    /// 开启或关闭连续渲染。关闭时只有 [`Self::request_render`] 才会产生帧。
    pub fn set_continuous(&self, continuous: bool) {
        self.control.set_continuous(continuous);
    }

    /// ### English
    /// Requests one frame; multiple requests before the frame renders coalesce into one.
    ///
    /// ### 中文
    /// 请求渲染一帧；在该帧渲染之前的多次请求合并为一次。
    pub fn request_render(&self) {
        self.control.request_render();
    }

    /// ### English
    /// Sets the render target. Only the latest size is applied; an empty size parks the render
    /// thread without touching its allocation.
    ///
    /// ### 中文
    /// 设置渲染目标。只应用最新尺寸；空尺寸会让渲染线程休眠，且不改动其现有分配。
    pub fn resize(&self, target: RenderTargetInfo) {
        self.control.resize(target);
    }

    /// ### English
    /// Sets the frame-rate cap (`<= 0` means unlimited).
    ///
    /// ### 中文
    /// 设置帧率上限（`<= 0` 表示不限制）。
    pub fn set_frame_rate_limit(&self, max_fps: f64) {
        self.control.set_frame_rate_limit(max_fps);
    }

    /// ### English
    /// Returns the UI-thread commit handle.
    ///
    /// ### 中文
    /// 返回 UI 线程的提交句柄。
    pub fn presenter(&self) -> Presenter {
        self.presenter.clone()
    }

    pub fn stats(&self) -> FrameStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn profile(&self) -> TacticProfile {
        self.profile
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// ### English
    /// Stops the render thread: the pipeline drains before GPU resources are released. Idempotent.
    ///
    /// ### 中文
    /// 停止渲染线程：先排空管线，再释放 GPU 资源。幂等。
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.control.shutdown();
            if thread.join().is_err() {
                error!("render thread panicked");
            }
            info!("render host shut down");
        }
    }
}

impl Drop for RenderHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RenderHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHost")
            .field("profile", &self.profile)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::*;
    use crate::engine::canvas::{FrameView, PaintSurface};
    use crate::engine::config::RenderTactic;
    use crate::engine::error::RenderPhase;
    use crate::engine::runtime::RenderErrorEvent;
    use crate::engine::test_support::{
        FakeGpu, FakeProvider, RecordingSurface, ScriptedRenderer, init_logging,
    };

    const WAIT: Duration = Duration::from_secs(10);

    fn config(tactic: RenderTactic) -> RenderConfig {
        RenderConfig {
            tactic,
            ..RenderConfig::default()
        }
    }

    fn error_sink() -> (RenderEvents, Arc<Mutex<Vec<RenderErrorEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let events = {
            let seen = seen.clone();
            RenderEvents::new().on_render_error(move |event| seen.lock().push(event.clone()))
        };
        (events, seen)
    }

    /// Commits on the calling thread, like a UI paint loop, until `done` holds.
    fn pump_until(
        presenter: &Presenter,
        surface: &mut dyn PaintSurface,
        mut done: impl FnMut() -> bool,
    ) {
        let deadline = Instant::now() + WAIT;
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            presenter.commit(surface);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn pump_for(presenter: &Presenter, surface: &mut dyn PaintSurface, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            presenter.commit(surface);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn frames_reach_the_surface_and_shutdown_releases_everything() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, log) = ScriptedRenderer::new();
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu.clone())),
            renderer,
            config(RenderTactic::Balance),
            RenderEvents::new(),
        )
        .unwrap();
        host.resize(RenderTargetInfo::from_pixels(64, 32));

        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();
        pump_until(&presenter, &mut surface, || presenter.last_committed() >= 3);

        host.shutdown();
        host.shutdown();
        assert!(!host.is_running());
        assert!(!presenter.is_attached());
        assert_eq!(surface.batches_open, surface.batches_closed);
        assert!(surface.frames.iter().all(|frame| (frame.1, frame.2) == (64, 32)));

        let log = log.lock();
        assert_eq!(log.initialized, 1);
        assert_eq!(log.uninitialized, 1);
        assert_eq!(log.resizes, vec![(64, 32)]);
        assert_eq!(gpu.live_buffers(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
        assert_eq!(gpu.live_fences(), 0);
    }

    #[test]
    fn minimized_target_parks_without_reallocating() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, log) = ScriptedRenderer::new();
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu.clone())),
            renderer,
            config(RenderTactic::ThroughputPriority),
            RenderEvents::new(),
        )
        .unwrap();
        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();
        let full = RenderTargetInfo::from_pixels(800, 600);

        host.resize(full);
        pump_until(&presenter, &mut surface, || host.stats().rendered >= 3);
        let buffers = gpu.with_state(|state| state.buffers_created);
        let framebuffers = gpu.with_state(|state| state.framebuffers_created);

        host.resize(RenderTargetInfo::from_pixels(0, 0));
        pump_for(&presenter, &mut surface, Duration::from_millis(50));
        let parked_at = host.stats().rendered;
        pump_for(&presenter, &mut surface, Duration::from_millis(50));
        assert_eq!(host.stats().rendered, parked_at);
        assert_eq!(gpu.with_state(|state| state.buffers_created), buffers);
        assert_eq!(gpu.with_state(|state| state.framebuffers_created), framebuffers);

        host.resize(full);
        pump_until(&presenter, &mut surface, || host.stats().rendered > parked_at + 2);
        assert_eq!(gpu.with_state(|state| state.buffers_created), buffers);
        host.shutdown();
        assert_eq!(log.lock().resizes, vec![(800, 600)]);
    }

    #[test]
    fn stalled_ui_lets_a_hidden_host_park() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, _log) = ScriptedRenderer::new();
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu.clone())),
            renderer,
            config(RenderTactic::ThroughputPriority),
            RenderEvents::new(),
        )
        .unwrap();
        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();
        host.resize(RenderTargetInfo::from_pixels(64, 64));

        // Nothing commits, so every ring slot ends up held downstream.
        let deadline = Instant::now() + WAIT;
        while host.stats().ring_full < 3 {
            assert!(Instant::now() < deadline, "ring never filled");
            thread::sleep(Duration::from_millis(5));
        }

        host.set_visible(false);
        thread::sleep(Duration::from_millis(150));
        let hidden_at = host.stats().rendered;
        let packs = gpu.with_state(|state| state.packs);

        pump_for(&presenter, &mut surface, Duration::from_millis(200));
        assert!(!surface.frames.is_empty());
        assert_eq!(host.stats().rendered, hidden_at);
        assert_eq!(gpu.with_state(|state| state.packs), packs);

        host.set_visible(true);
        pump_until(&presenter, &mut surface, || host.stats().rendered > hidden_at);
        host.shutdown();
        assert_eq!(gpu.live_buffers(), 0);
        assert_eq!(gpu.live_fences(), 0);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Render(u64),
        Committed(u64),
    }

    struct OrderedSurface {
        steps: Arc<Mutex<Vec<Step>>>,
        drawn: Option<u64>,
    }

    impl PaintSurface for OrderedSurface {
        fn begin_draw(&mut self) {}

        fn draw_frame(&mut self, frame: &FrameView<'_>) {
            self.drawn = Some(frame.seq);
        }

        fn end_draw(&mut self) {
            if let Some(seq) = self.drawn.take() {
                self.steps.lock().push(Step::Committed(seq));
            }
        }
    }

    #[test]
    fn latency_priority_keeps_one_frame_in_flight() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, _log) = ScriptedRenderer::new();
        let steps = Arc::new(Mutex::new(Vec::new()));
        let events = {
            let steps = steps.clone();
            RenderEvents::new().on_before_render(move |frame| {
                steps.lock().push(Step::Render(frame.seq));
            })
        };
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu)),
            renderer,
            config(RenderTactic::LatencyPriority),
            events,
        )
        .unwrap();
        assert_eq!(host.profile().parallelism, 1);
        host.resize(RenderTargetInfo::from_pixels(32, 32));

        let presenter = host.presenter();
        let mut surface = OrderedSurface {
            steps: steps.clone(),
            drawn: None,
        };
        pump_until(&presenter, &mut surface, || presenter.last_committed() >= 6);
        host.shutdown();

        let steps = steps.lock();
        let expected: Vec<Step> = (1..=6u64)
            .flat_map(|seq| [Step::Render(seq), Step::Committed(seq)])
            .collect();
        assert_eq!(&steps[..expected.len()], &expected[..]);
    }

    #[test]
    fn renderer_failure_is_reported_and_later_ticks_continue() {
        init_logging();
        let gpu = FakeGpu::new();
        let (mut renderer, log) = ScriptedRenderer::new();
        renderer.fail_on_call = Some(5);
        let (events, errors) = error_sink();
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu)),
            renderer,
            config(RenderTactic::ThroughputPriority),
            events,
        )
        .unwrap();
        host.resize(RenderTargetInfo::from_pixels(16, 16));

        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();
        pump_until(&presenter, &mut surface, || log.lock().renders.len() >= 9);
        host.shutdown();

        assert_eq!(&log.lock().renders[..9], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let errors = errors.lock();
        assert_eq!(
            *errors,
            vec![RenderErrorEvent {
                phase: RenderPhase::Render,
                error: RenderError::Renderer("scripted failure on call 5".to_string()),
            }]
        );
    }

    #[test]
    fn renderer_panic_is_caught_and_reported() {
        init_logging();
        let gpu = FakeGpu::new();
        let (mut renderer, log) = ScriptedRenderer::new();
        renderer.panic_on_call = Some(2);
        let (events, errors) = error_sink();
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu)),
            renderer,
            config(RenderTactic::ThroughputPriority),
            events,
        )
        .unwrap();
        host.resize(RenderTargetInfo::from_pixels(16, 16));

        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();
        pump_until(&presenter, &mut surface, || log.lock().renders.len() >= 4);
        host.shutdown();

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].phase, RenderPhase::Render);
        assert!(matches!(&errors[0].error, RenderError::Panicked(message) if message.contains("call 2")));
        assert_eq!(log.lock().uninitialized, 1);
    }

    #[test]
    fn render_once_produces_exactly_one_frame() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, log) = ScriptedRenderer::new();
        let mut config = config(RenderTactic::ThroughputPriority);
        config.initially_continuous = false;
        let mut host =
            RenderHost::start(Arc::new(FakeProvider::new(gpu)), renderer, config, RenderEvents::new())
                .unwrap();
        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();

        host.resize(RenderTargetInfo::from_pixels(16, 16));
        pump_for(&presenter, &mut surface, Duration::from_millis(50));
        assert_eq!(host.stats().rendered, 0);

        host.request_render();
        host.request_render();
        pump_until(&presenter, &mut surface, || presenter.last_committed() == 1);
        pump_for(&presenter, &mut surface, Duration::from_millis(50));
        assert_eq!(host.stats().rendered, 1);

        host.set_continuous(true);
        pump_until(&presenter, &mut surface, || presenter.last_committed() >= 3);
        host.shutdown();
        assert_eq!(&log.lock().renders[..3], &[1, 2, 3]);
    }

    #[test]
    fn hidden_target_renders_nothing_until_shown() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, _log) = ScriptedRenderer::new();
        let mut config = config(RenderTactic::Balance);
        config.initially_visible = false;
        let mut host =
            RenderHost::start(Arc::new(FakeProvider::new(gpu)), renderer, config, RenderEvents::new())
                .unwrap();
        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();

        host.resize(RenderTargetInfo::from_pixels(16, 16));
        pump_for(&presenter, &mut surface, Duration::from_millis(50));
        assert_eq!(host.stats().rendered, 0);

        host.set_visible(true);
        pump_until(&presenter, &mut surface, || presenter.last_committed() >= 2);
        host.shutdown();
    }

    #[test]
    fn declining_renderer_does_not_spin() {
        init_logging();
        let gpu = FakeGpu::new();
        let (mut renderer, log) = ScriptedRenderer::new();
        renderer.decline = true;
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu)),
            renderer,
            config(RenderTactic::ThroughputPriority),
            RenderEvents::new(),
        )
        .unwrap();
        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();

        host.resize(RenderTargetInfo::from_pixels(16, 16));
        pump_for(&presenter, &mut surface, Duration::from_millis(150));
        host.shutdown();

        // The first frame after an allocation always renders.
        assert_eq!(log.lock().renders, vec![1]);
    }

    #[test]
    fn frame_rate_cap_spaces_out_frames() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, _log) = ScriptedRenderer::new();
        let mut config = config(RenderTactic::ThroughputPriority);
        config.max_fps = 50.0;
        let mut host =
            RenderHost::start(Arc::new(FakeProvider::new(gpu)), renderer, config, RenderEvents::new())
                .unwrap();
        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();

        host.resize(RenderTargetInfo::from_pixels(16, 16));
        pump_until(&presenter, &mut surface, || host.stats().rendered >= 1);
        let first = host.stats().rendered;
        pump_for(&presenter, &mut surface, Duration::from_millis(200));
        let rendered = host.stats().rendered - first;
        host.shutdown();
        assert!(rendered >= 2, "only {rendered} frames in 200ms");
        assert!(rendered <= 14, "{rendered} frames in 200ms at 50 fps");
    }

    #[test]
    fn context_failure_fails_start() {
        init_logging();
        let gpu = FakeGpu::new();
        let mut provider = FakeProvider::new(gpu);
        provider.fail_primary = true;
        let (renderer, log) = ScriptedRenderer::new();
        let (events, errors) = error_sink();

        let result = RenderHost::start(
            Arc::new(provider),
            renderer,
            config(RenderTactic::Balance),
            events,
        );
        assert!(matches!(result, Err(RenderError::ContextCreation(_))));
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(errors.lock()[0].phase, RenderPhase::Initialize);
        assert_eq!(log.lock().initialized, 0);
    }

    #[test]
    fn pipeline_failure_uninitializes_the_renderer() {
        init_logging();
        let gpu = FakeGpu::new();
        let mut provider = FakeProvider::new(gpu.clone());
        provider.fail_shared = true;
        let (renderer, log) = ScriptedRenderer::new();

        let result = RenderHost::start(
            Arc::new(provider),
            renderer,
            config(RenderTactic::Balance),
            RenderEvents::new(),
        );
        assert!(matches!(result, Err(RenderError::ContextCreation(_))));
        let log = log.lock();
        assert_eq!(log.initialized, 1);
        assert_eq!(log.uninitialized, 1);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn faulted_pipeline_is_restarted() {
        init_logging();
        let gpu = FakeGpu::new();
        let (renderer, _log) = ScriptedRenderer::new();
        let (events, errors) = error_sink();
        let mut host = RenderHost::start(
            Arc::new(FakeProvider::new(gpu.clone())),
            renderer,
            config(RenderTactic::ThroughputPriority),
            events,
        )
        .unwrap();
        let presenter = host.presenter();
        let mut surface = RecordingSurface::default();
        host.resize(RenderTargetInfo::from_pixels(16, 16));
        pump_until(&presenter, &mut surface, || presenter.last_committed() >= 1);

        gpu.with_state(|state| state.fail_fence_wait = true);
        pump_until(&presenter, &mut surface, || {
            errors
                .lock()
                .iter()
                .any(|event| event.phase == RenderPhase::Internal)
        });
        gpu.with_state(|state| state.fail_fence_wait = false);

        let before = presenter.last_committed();
        pump_until(&presenter, &mut surface, || presenter.last_committed() > before + 2);
        host.shutdown();
        assert!(
            errors
                .lock()
                .iter()
                .any(|event| matches!(event.error, RenderError::Gpu(_)))
        );
    }
}
