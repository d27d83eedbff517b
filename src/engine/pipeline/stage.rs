//! ### English
//! Worker loops of the readback and copy stages.
//!
//! A stage completes when its input disconnects and it drained without fault. On error or panic
//! it records a fault instead; a downstream stage whose input disconnects after an upstream fault
//! completes with that same fault.
//!
//! ### 中文
//! 回读阶段与拷贝阶段的工作循环。
//!
//! 阶段在输入断开且无故障地排空后完成。出错或 panic 时改为记录故障；上游故障后输入断开的下游阶段
//! 以同一故障完成。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, trace};
use parking_lot::Mutex;

use crate::engine::canvas::RenderCanvas;
use crate::engine::config::InvalidationDriver;
use crate::engine::error::{PipelineFault, PipelineStage, RenderError};
use crate::engine::rendering::{GlDevice, PixelBuffer, with_context};
use crate::engine::runtime::{FrameStats, RenderEvents};
use crate::engine::sync::Completion;

use super::payload::{CanvasArgs, FrameArgs, RenderArgs};

/// ### English
/// Completion value of one stage.
///
/// ### 中文
/// 单个阶段的完成值。
pub type StageResult = std::result::Result<(), PipelineFault>;

pub(crate) type StageCompletion = Arc<Completion<StageResult>>;

fn fault(stage: PipelineStage, error: RenderError) -> StageResult {
    Err(PipelineFault { stage, error })
}

/// ### English
/// Readback stage body. Runs on its own thread with `device` (a context sharing objects with the
/// render thread's) bound around every fence check.
///
/// The completion is resolved before `output` is dropped, so copy workers that observe the
/// disconnect always find the readback result.
///
/// ### 中文
/// 回读阶段主体。运行在独立线程上，每次 fence 检查前后都会绑定/解绑 `device`（与渲染线程上下文
/// 共享对象的上下文）。
///
/// 完成值在 drop `output` 之前写入，因此观察到断开的拷贝工作线程总能读到回读结果。
pub(crate) fn run_readback<D: GlDevice>(
    device: D,
    input: Receiver<RenderArgs>,
    output: Sender<FrameArgs>,
    fence_timeout: Duration,
    stats: Arc<FrameStats>,
    completion: StageCompletion,
) {
    let mut failure = None;
    for args in input.iter() {
        let seq = args.seq();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            with_context(&device, |device| {
                PixelBuffer::read_frames(device, args, fence_timeout)
            })
        }))
        .unwrap_or_else(|payload| Err(RenderError::from_panic(payload)));

        match outcome {
            Ok(Some(frame)) => {
                trace!("frame {seq} passed its fence");
                if output.send(frame).is_err() {
                    debug!("copy stage closed; readback stops");
                    break;
                }
            }
            Ok(None) => stats.record_skipped(),
            Err(error) => {
                error!("readback of frame {seq} failed: {error}");
                failure = Some(error);
                break;
            }
        }
    }

    drop(input);
    completion.complete(match failure {
        Some(error) => fault(PipelineStage::Readback, error),
        None => Ok(()),
    });
    drop(output);
    drop(device);
}

/// ### English
/// Shared state of the copy workers; the last worker to exit resolves the stage completion.
///
/// ### 中文
/// 拷贝工作线程的共享状态；最后一个退出的工作线程写入阶段完成值。
pub(crate) struct CopyGroup {
    live: AtomicUsize,
    faulted: AtomicBool,
    failure: Mutex<Option<RenderError>>,
    upstream: StageCompletion,
    completion: StageCompletion,
}

impl CopyGroup {
    pub(crate) fn new(workers: usize, upstream: StageCompletion) -> Arc<Self> {
        Arc::new(Self {
            live: AtomicUsize::new(workers.max(1)),
            faulted: AtomicBool::new(false),
            failure: Mutex::new(None),
            upstream,
            completion: Completion::new(),
        })
    }

    pub(crate) fn completion(&self) -> &StageCompletion {
        &self.completion
    }

    fn fail(&self, error: RenderError) {
        error!("copy stage faulted: {error}");
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
        self.faulted.store(true, Ordering::Release);
    }

    /// ### English
    /// Accounts for `count` workers that never started, failing the stage with `error`.
    ///
    /// ### 中文
    /// 为 `count` 个未能启动的工作线程记账，并以 `error` 使本阶段失败。
    pub(crate) fn forfeit(&self, count: usize, error: RenderError) {
        self.fail(error);
        for _ in 0..count {
            self.worker_exited();
        }
    }

    fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn worker_exited(&self) {
        if self.live.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let result = match self.failure.lock().take() {
            Some(error) => fault(PipelineStage::Copy, error),
            None => self.upstream.wait(),
        };
        self.completion.complete(result);
    }
}

/// ### English
/// Per-worker inputs of the copy stage.
///
/// ### 中文
/// 拷贝阶段每个工作线程的输入。
pub(crate) struct CopyWorker {
    pub group: Arc<CopyGroup>,
    pub input: Receiver<FrameArgs>,
    pub output: Sender<CanvasArgs>,
    pub canvas: Arc<RenderCanvas>,
    pub stats: Arc<FrameStats>,
    pub events: Arc<RenderEvents>,
    pub invalidation: InvalidationDriver,
}

/// ### English
/// Copy stage body: moves fence-checked frames out of the pixel ring into the canvas and forwards
/// them to the commit queue. Needs no GL context (the ring is persistently mapped).
///
/// ### 中文
/// 拷贝阶段主体：将已通过 fence 检查的帧从像素环拷入画布，并转发到提交队列。
/// 不需要 GL 上下文（环为持久映射）。
pub(crate) fn run_copy(worker: CopyWorker) {
    let CopyWorker {
        group,
        input,
        output,
        canvas,
        stats,
        events,
        invalidation,
    } = worker;

    for frame in input.iter() {
        if group.is_faulted() {
            break;
        }
        let seq = frame.seq();
        match panic::catch_unwind(AssertUnwindSafe(|| canvas.copy_frame(&frame))) {
            Ok(Some(index)) => {
                trace!("frame {seq} copied into canvas slot {index}");
                if output.send(frame.into_canvas_args(canvas.clone(), index)).is_err() {
                    break;
                }
                stats.record_copied();
                if invalidation == InvalidationDriver::Internal {
                    events.frame_ready();
                }
            }
            Ok(None) => stats.record_skipped(),
            Err(payload) => {
                group.fail(RenderError::from_panic(payload));
                break;
            }
        }
    }

    // The receiver goes first so a readback blocked on a full channel observes the disconnect;
    // the sender goes last so the commit queue never sees a disconnect before the completion.
    drop(input);
    group.worker_exited();
    drop(output);
}
