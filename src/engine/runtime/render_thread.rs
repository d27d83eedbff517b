//! ### English
//! Dedicated render thread: owns the primary GL context and the render procedure, drives the
//! per-tick state machine and feeds the frame pipeline.
//!
//! ### 中文
//! 独立渲染线程：持有主 GL 上下文与渲染过程，驱动逐 tick 状态机并向帧管线投递帧。

use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dpi::PhysicalSize;
use log::{debug, error, info, trace, warn};

use crate::engine::config::{RenderConfig, TacticProfile, frame_budget};
use crate::engine::error::{RenderError, RenderPhase, Result};
use crate::engine::pipeline::{Pipeline, PipelineOptions, Presenter, RenderArgs};
use crate::engine::rendering::{ContextProvider, RenderProcedure};
use crate::engine::sync::Completion;
use crate::engine::target::RenderTargetInfo;

use super::control::RenderControl;
use super::events::RenderEvents;
use super::renderer::{FrameInfo, Renderer};
use super::stats::FrameStats;

/// ### English
/// Everything the render thread takes ownership of when it is spawned.
///
/// ### 中文
/// 渲染线程启动时接管的全部内容。
pub(super) struct RenderThreadInit<P, R> {
    pub provider: Arc<P>,
    pub renderer: R,
    pub config: RenderConfig,
    pub profile: TacticProfile,
    pub control: Arc<RenderControl>,
    pub events: Arc<RenderEvents>,
    pub stats: Arc<FrameStats>,
    pub presenter: Presenter,
    /// ### English
    /// Init handshake: resolved once the context, the renderer and the pipeline are up (or failed).
    ///
    /// ### 中文
    /// 初始化握手：上下文、渲染器与管线就绪（或失败）后写入。
    pub init: Arc<Completion<Result<()>>>,
}

/// ### English
/// Render thread entry function. Returns after shutdown or a fatal initialization error.
///
/// ### 中文
/// 渲染线程入口函数。关闭或发生致命初始化错误后返回。
pub(super) fn run_render_thread<P, R>(init: RenderThreadInit<P, R>)
where
    P: ContextProvider,
    R: Renderer<P::Device>,
{
    let RenderThreadInit {
        provider,
        renderer,
        config,
        profile,
        control,
        events,
        stats,
        presenter,
        init,
    } = init;

    let mut driver = Driver {
        procedure: RenderProcedure::new(&config),
        options: PipelineOptions::new(&config, &profile),
        declined_render_sleep: config.declined_render_sleep,
        provider,
        renderer,
        renderer_ready: false,
        pipeline: None,
        size_dirty: false,
        failed_target: None,
        control,
        events,
        stats,
        presenter,
    };

    /*
    ### English
    Initialization errors are fatal: report once, fail the handshake, release what was created.

    ### 中文
    初始化错误是致命的：报告一次、使握手失败，并释放已创建的资源。
    */
    if let Err(error) = driver.initialize() {
        driver.events.render_error(RenderPhase::Initialize, error.clone());
        init.complete(Err(error));
        driver.shutdown();
        return;
    }
    init.complete(Ok(()));
    info!("render thread started ({:?})", profile);

    driver.run();
    driver.shutdown();
    info!("render thread stopped");
}

/// ### English
/// Runs renderer code, turning a panic into [`RenderError::Panicked`].
///
/// ### 中文
/// 运行渲染器代码，并将 panic 转换为 [`RenderError::Panicked`]。
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(RenderError::from_panic(payload)))
}

struct Driver<P: ContextProvider, R> {
    provider: Arc<P>,
    renderer: R,
    renderer_ready: bool,
    procedure: RenderProcedure<P::Device>,
    pipeline: Option<Pipeline>,
    options: PipelineOptions,
    declined_render_sleep: Duration,
    /// ### English
    /// Set when the target was (re)allocated; cleared by the next rendered frame.
    ///
    /// ### 中文
    /// 目标（重新）分配时置位；由下一次成功渲染的帧清除。
    size_dirty: bool,
    /// Last target whose allocation failed (reported once per target).
    failed_target: Option<RenderTargetInfo>,
    control: Arc<RenderControl>,
    events: Arc<RenderEvents>,
    stats: Arc<FrameStats>,
    presenter: Presenter,
}

impl<P, R> Driver<P, R>
where
    P: ContextProvider,
    R: Renderer<P::Device>,
{
    fn initialize(&mut self) -> Result<()> {
        self.procedure.initialize(self.provider.as_ref())?;
        let device = self.procedure.device()?;
        guarded(|| self.renderer.initialize(device))?;
        self.renderer_ready = true;

        let pipeline = Pipeline::start(
            self.provider.clone(),
            &self.options,
            self.stats.clone(),
            self.events.clone(),
        )?;
        self.presenter.attach(pipeline.commit_queue());
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn run(&mut self) {
        while !self.control.cancel.is_cancelled() {
            if self.tick().is_break() {
                break;
            }
        }
    }

    fn tick(&mut self) -> ControlFlow<()> {
        let control = self.control.clone();

        if !control.is_visible() {
            trace!("render target hidden; waiting for visibility");
            control.visibility_gate.wait();
            return ControlFlow::Continue(());
        }
        if !control.is_continuous() && !control.render_requested() {
            control.continuous_gate.wait();
            return ControlFlow::Continue(());
        }
        let target = control.target();
        if target.is_empty() {
            trace!("render target is empty; waiting for a size");
            control.size_gate.wait();
            return ControlFlow::Continue(());
        }
        let tick_started = Instant::now();

        if !self.apply(target) {
            control.sleep(self.declined_render_sleep);
            return ControlFlow::Continue(());
        }

        let wants_render = guarded(|| Ok(self.renderer.preview_render())).unwrap_or_else(|error| {
            self.events.render_error(RenderPhase::Render, error);
            false
        });
        if !wants_render && !self.size_dirty {
            control.sleep(self.declined_render_sleep);
            return ControlFlow::Continue(());
        }

        /*
        ### English
        A ring the downstream stages still hold ends the tick after the bounded slot wait, so a
        stalled UI never keeps this thread away from the gates above.

        ### 中文
        若下游阶段仍占用整个环，则在有界的槽位等待后结束本 tick，使停滞的 UI 不会让本线程无法回到上面的各个门。
        */
        match self.procedure.wait_writable(&control.cancel) {
            Ok(true) => {}
            Ok(false) => {
                trace!("pixel buffer ring is full; re-checking gates");
                self.stats.record_ring_full();
                return ControlFlow::Continue(());
            }
            Err(RenderError::Cancelled) => return ControlFlow::Break(()),
            Err(error) => {
                self.events.render_error(RenderPhase::Render, error);
                return ControlFlow::Continue(());
            }
        }

        let permit = match &control.semaphore {
            Some(semaphore) => match semaphore.acquire() {
                Some(permit) => Some(permit),
                None => return ControlFlow::Break(()),
            },
            None => None,
        };
        if control.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        control.clear_render_request();

        let frame = FrameInfo {
            target: self.procedure.target(),
            seq: self.procedure.next_frame_seq(),
            size_changed: self.size_dirty,
        };
        self.events.before_render(&frame);
        let args = match self.render_frame(&frame) {
            Ok(args) => args.with_permit(permit),
            Err(RenderError::Cancelled) => return ControlFlow::Break(()),
            Err(error) => {
                self.events.render_error(RenderPhase::Render, error);
                return ControlFlow::Continue(());
            }
        };
        self.stats.record_rendered(tick_started.elapsed());
        self.size_dirty = false;
        self.events.after_render(&frame);

        if self.post(args).is_break() {
            return ControlFlow::Break(());
        }

        if let Some(budget) = frame_budget(control.max_fps()) {
            if let Some(rest) = budget.checked_sub(tick_started.elapsed()) {
                control.sleep(rest);
            }
        }
        ControlFlow::Continue(())
    }

    /// ### English
    /// Moves the procedure to `target` and notifies the renderer. Returns `false` when the tick
    /// cannot render (allocation failed).
    ///
    /// ### 中文
    /// 将渲染过程切换到 `target` 并通知渲染器。无法渲染（分配失败）时返回 `false`。
    fn apply(&mut self, target: RenderTargetInfo) -> bool {
        match self.procedure.apply(target) {
            Ok(false) => true,
            Ok(true) => {
                self.failed_target = None;
                self.size_dirty = true;
                let size = PhysicalSize::new(target.pixel_width(), target.pixel_height());
                let Ok(device) = self.procedure.device() else {
                    return false;
                };
                if let Err(error) = guarded(|| self.renderer.resize(device, size)) {
                    self.events.render_error(RenderPhase::Initialize, error);
                }
                true
            }
            Err(error) => {
                if self.failed_target != Some(target) {
                    self.failed_target = Some(target);
                    self.events.render_error(RenderPhase::Initialize, error);
                }
                false
            }
        }
    }

    /// ### English
    /// Brackets one renderer call with `pre_render`/`post_render`/`swap`.
    ///
    /// ### 中文
    /// 用 `pre_render`/`post_render`/`swap` 包裹一次渲染器调用。
    fn render_frame(&mut self, frame: &FrameInfo) -> Result<RenderArgs> {
        self.procedure.pre_render()?;
        let device = self.procedure.device()?;
        guarded(|| self.renderer.render(device, frame))?;
        let args = self.procedure.post_render(&self.control.cancel)?;
        self.procedure.swap()?;
        Ok(args)
    }

    fn post(&mut self, args: RenderArgs) -> ControlFlow<()> {
        if self.pipeline.is_none() {
            self.restart_pipeline();
        }
        let Some(pipeline) = self.pipeline.as_ref() else {
            drop(args);
            self.control.sleep(self.declined_render_sleep);
            return ControlFlow::Continue(());
        };
        match pipeline.post(args, &self.control.cancel) {
            Ok(()) => ControlFlow::Continue(()),
            Err(RenderError::Cancelled) => ControlFlow::Break(()),
            Err(error) => {
                debug!("frame post failed: {error}");
                self.restart_pipeline();
                ControlFlow::Continue(())
            }
        }
    }

    /// ### English
    /// Drains a closed or faulted pipeline, reports why it stopped, and starts a fresh one.
    ///
    /// ### 中文
    /// 排空已关闭或故障的管线，报告其停止原因，并启动新的管线。
    fn restart_pipeline(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            self.presenter.detach();
            let error = match pipeline.finish() {
                Err(fault) => fault.error,
                Ok(()) => RenderError::PipelineClosed,
            };
            self.events.render_error(RenderPhase::Internal, error);
        }
        if self.control.cancel.is_cancelled() {
            return;
        }

        match Pipeline::start(
            self.provider.clone(),
            &self.options,
            self.stats.clone(),
            self.events.clone(),
        ) {
            Ok(pipeline) => {
                warn!("frame pipeline restarted");
                self.presenter.attach(pipeline.commit_queue());
                self.pipeline = Some(pipeline);
            }
            Err(error) => self.events.render_error(RenderPhase::Internal, error),
        }
    }

    /// ### English
    /// Drains the pipeline before any GPU resource is released, then disposes the procedure.
    ///
    /// ### 中文
    /// 先排空管线，再释放任何 GPU 资源，最后释放渲染过程。
    fn shutdown(&mut self) {
        self.presenter.detach();
        if let Some(mut pipeline) = self.pipeline.take() {
            if let Err(fault) = pipeline.finish() {
                self.events.render_error(RenderPhase::Internal, fault.error);
            }
        }

        let renderer = &mut self.renderer;
        let renderer_ready = self.renderer_ready;
        self.procedure.dispose(|device| {
            if !renderer_ready {
                return;
            }
            let outcome = guarded(|| {
                renderer.uninitialize(device);
                Ok(())
            });
            if let Err(error) = outcome {
                error!("renderer uninitialize failed: {error}");
            }
        });
        self.renderer_ready = false;
    }
}
