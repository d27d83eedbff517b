//! ### English
//! Three-stage frame pipeline: readback (shared GL context) → copy (worker pool) → commit (UI
//! thread), connected by bounded channels.
//!
//! ```text
//! render thread --post--> [head, cap 1] --> readback --> [cap N] --> copy x N --> [cap N+1] --> commit (UI)
//! ```
//!
//! Completion flows forward: closing the head lets each stage drain and complete in turn; a fault
//! in any stage replaces completion with that fault for every stage downstream, and the commit
//! stage's result is the pipeline's overall result.
//!
//! ### 中文
//! 三阶段帧管线：回读（共享 GL 上下文）→ 拷贝（工作线程池）→ 提交（UI 线程），由有界通道连接。
//!
//! 完成状态向前传播：关闭头部通道后各阶段依次排空并完成；任一阶段的故障会替代其所有下游阶段的
//! 完成状态，而提交阶段的结果即管线的整体结果。

mod commit;
mod payload;
mod stage;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender, bounded};
use log::{debug, error, info};

use crate::engine::canvas::RenderCanvas;
use crate::engine::config::{InvalidationDriver, PixelFormat, RenderConfig, TacticProfile};
use crate::engine::error::{PipelineFault, PipelineStage, RenderError, Result};
use crate::engine::rendering::ContextProvider;
use crate::engine::runtime::{FrameStats, RenderEvents};
use crate::engine::sync::{CancelToken, Completion};

pub use commit::Presenter;
pub use payload::{CanvasArgs, FrameArgs, RenderArgs};
pub use stage::StageResult;

pub(crate) use commit::CommitQueue;

use stage::{CopyGroup, CopyWorker, StageCompletion};

/// How often a blocked `post` re-checks the cancel token.
const POST_POLL: Duration = Duration::from_millis(10);
/// How often `finish` drains uncollected commit items while waiting for the copy stage.
const FINISH_POLL: Duration = Duration::from_millis(5);

/// ### English
/// Pipeline shape derived from the configuration and the resolved tactic.
///
/// ### 中文
/// 由配置与解析后的 tactic 推导出的管线形态。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub parallelism: usize,
    pub fence_timeout: Duration,
    pub invalidation: InvalidationDriver,
    pub format: PixelFormat,
    pub startup_timeout: Duration,
}

impl PipelineOptions {
    pub fn new(config: &RenderConfig, profile: &TacticProfile) -> Self {
        Self {
            parallelism: profile.parallelism.max(1),
            fence_timeout: config.fence_timeout,
            invalidation: profile.invalidation,
            format: config.pixel_format,
            startup_timeout: config.init_timeout,
        }
    }

    /// ### English
    /// Canvas slots: one per copy worker plus the one being presented.
    ///
    /// ### 中文
    /// 画布槽位数：每个拷贝工作线程一个，外加一个正在呈现的槽位。
    pub fn canvas_slots(&self) -> usize {
        self.parallelism + 1
    }
}

/// ### English
/// Running pipeline. Owned by the render thread; [`Pipeline::finish`] (or drop) drains it.
///
/// ### 中文
/// 运行中的管线。由渲染线程持有；[`Pipeline::finish`]（或 drop）负责排空。
pub struct Pipeline {
    head: Option<Sender<RenderArgs>>,
    readback: StageCompletion,
    copy: StageCompletion,
    commit: Arc<CommitQueue>,
    threads: Vec<thread::JoinHandle<()>>,
    finished: Option<StageResult>,
}

impl Pipeline {
    /// ### English
    /// Spawns the readback thread and the copy workers.
    ///
    /// Blocks until the readback thread has created its shared context; a context failure is
    /// returned here rather than surfacing later as a stage fault.
    ///
    /// #### Parameters
    /// - `provider`: Source of the readback thread's shared context.
    /// - `options`: Parallelism, fence poll timeout, invalidation driver and pixel format.
    /// - `stats`: Counters updated by every stage.
    /// - `events`: Receives `frame-ready` from internally driven tactics.
    ///
    /// ### 中文
    /// 启动回读线程与拷贝工作线程。
    ///
    /// 阻塞直到回读线程创建好共享上下文；上下文创建失败在此处返回，而不是稍后以阶段故障的形式出现。
    ///
    /// #### 参数
    /// - `provider`：回读线程共享上下文的来源。
    /// - `options`：并行度、fence 轮询超时、失效驱动方式与像素格式。
    /// - `stats`：各阶段更新的计数器。
    /// - `events`：内部驱动型 tactic 通过它发出 `frame-ready`。
    pub fn start<P: ContextProvider>(
        provider: Arc<P>,
        options: &PipelineOptions,
        stats: Arc<FrameStats>,
        events: Arc<RenderEvents>,
    ) -> Result<Self> {
        let (head_tx, head_rx) = bounded::<RenderArgs>(1);
        let (frame_tx, frame_rx) = bounded::<FrameArgs>(options.parallelism);
        let (canvas_tx, canvas_rx) = bounded::<CanvasArgs>(options.canvas_slots());

        let readback: StageCompletion = Completion::new();
        let group = CopyGroup::new(options.parallelism, readback.clone());
        let copy = group.completion().clone();
        let commit = Arc::new(CommitQueue::new(
            canvas_rx,
            copy.clone(),
            stats.clone(),
            events.clone(),
        ));

        let mut pipeline = Self {
            head: Some(head_tx),
            readback: readback.clone(),
            copy,
            commit,
            threads: Vec::with_capacity(options.parallelism + 1),
            finished: None,
        };

        let ready = Completion::<Result<()>>::new();
        let spawned = {
            let ready = ready.clone();
            let stats = stats.clone();
            let fence_timeout = options.fence_timeout;
            thread::Builder::new()
                .name("gl-readback".to_string())
                .spawn(move || match provider.create_shared() {
                    Ok(device) => {
                        ready.complete(Ok(()));
                        stage::run_readback(
                            device,
                            head_rx,
                            frame_tx,
                            fence_timeout,
                            stats,
                            readback,
                        );
                    }
                    Err(error) => {
                        ready.complete(Err(error.clone()));
                        readback.complete(Err(PipelineFault {
                            stage: PipelineStage::Readback,
                            error,
                        }));
                    }
                })
        };
        match spawned {
            Ok(handle) => pipeline.threads.push(handle),
            Err(error) => {
                let error = RenderError::Initialization(format!(
                    "failed to spawn the readback thread: {error}"
                ));
                pipeline.readback.complete(Err(PipelineFault {
                    stage: PipelineStage::Readback,
                    error: error.clone(),
                }));
                group.forfeit(options.parallelism, error.clone());
                return Err(error);
            }
        }

        let canvas = RenderCanvas::new(options.canvas_slots(), options.format);
        for index in 0..options.parallelism {
            let worker = CopyWorker {
                group: group.clone(),
                input: frame_rx.clone(),
                output: canvas_tx.clone(),
                canvas: canvas.clone(),
                stats: stats.clone(),
                events: events.clone(),
                invalidation: options.invalidation,
            };
            let spawned = thread::Builder::new()
                .name(format!("gl-copy-{index}"))
                .spawn(move || stage::run_copy(worker));
            match spawned {
                Ok(handle) => pipeline.threads.push(handle),
                Err(error) => {
                    let error = RenderError::Initialization(format!(
                        "failed to spawn copy worker {index}: {error}"
                    ));
                    group.forfeit(options.parallelism - index, error.clone());
                    return Err(error);
                }
            }
        }
        drop(frame_rx);
        drop(canvas_tx);

        match ready.wait_timeout(options.startup_timeout) {
            Some(Ok(())) => {
                info!(
                    "pipeline started: {} copy worker(s), {:?} invalidation",
                    options.parallelism, options.invalidation
                );
                Ok(pipeline)
            }
            Some(Err(error)) => {
                let _ = pipeline.finish();
                Err(error)
            }
            None => {
                let millis = u64::try_from(options.startup_timeout.as_millis()).unwrap_or(u64::MAX);
                // The readback thread may still be stuck in context creation; do not join it.
                pipeline.head.take();
                pipeline.threads.clear();
                pipeline.finished = Some(Ok(()));
                Err(RenderError::Timeout(millis))
            }
        }
    }

    /// ### English
    /// Hands a produced frame to the readback stage, blocking while the stage is busy.
    ///
    /// Fails with [`RenderError::Cancelled`] when `cancel` fires while blocked and with
    /// [`RenderError::PipelineClosed`] once the readback stage is gone (finished or faulted).
    ///
    /// ### 中文
    /// 将已生产的帧交给回读阶段；阶段繁忙时阻塞。
    ///
    /// 阻塞期间 `cancel` 触发时返回 [`RenderError::Cancelled`]；回读阶段已结束（完成或故障）时返回
    /// [`RenderError::PipelineClosed`]。
    pub fn post(&self, args: RenderArgs, cancel: &CancelToken) -> Result<()> {
        let Some(head) = self.head.as_ref() else {
            return Err(RenderError::PipelineClosed);
        };
        let mut args = args;
        loop {
            match head.send_timeout(args, POST_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if cancel.is_cancelled() {
                        return Err(RenderError::Cancelled);
                    }
                    args = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(RenderError::PipelineClosed),
            }
        }
    }

    pub(crate) fn commit_queue(&self) -> Arc<CommitQueue> {
        self.commit.clone()
    }

    /// ### English
    /// Closes the head and waits until every stage has drained.
    ///
    /// Commit items the UI does not collect are discarded while waiting, so a UI that stopped
    /// painting cannot stall shutdown. Returns the commit stage's result; calling it again returns
    /// the same result.
    ///
    /// ### 中文
    /// 关闭头部通道并等待所有阶段排空。
    ///
    /// 等待期间会丢弃 UI 未取走的提交项，因此停止绘制的 UI 不会拖住关闭流程。返回提交阶段的结果；
    /// 再次调用返回相同结果。
    pub fn finish(&mut self) -> StageResult {
        if let Some(result) = &self.finished {
            return result.clone();
        }
        self.head.take();

        while self.copy.wait_timeout(FINISH_POLL).is_none() {
            self.commit.discard_pending();
        }
        let result = self.commit.finish();

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("pipeline").to_string();
            if handle.join().is_err() {
                error!("pipeline thread `{name}` panicked");
            }
        }

        match &result {
            Ok(()) => debug!("pipeline finished"),
            Err(fault) => error!("pipeline finished with a fault: {fault}"),
        }
        self.finished = Some(result.clone());
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
