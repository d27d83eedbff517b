//! ### English
//! Commit stage: the queue of copied frames drained on the UI thread, and the [`Presenter`]
//! handle the UI calls from its paint callback.
//!
//! ### 中文
//! 提交阶段：在 UI 线程上排空的已拷贝帧队列，以及 UI 在绘制回调中调用的 [`Presenter`] 句柄。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, TryRecvError};
use log::trace;
use parking_lot::RwLock;

use crate::engine::canvas::{DrawBatch, PaintSurface};
use crate::engine::runtime::{FrameStats, RenderEvents};
use crate::engine::sync::Completion;

use super::payload::CanvasArgs;
use super::stage::{StageCompletion, StageResult};

/// ### English
/// Receiving end of the commit stage.
///
/// Only the newest copied frame is drawn; older ones, and anything not newer than the last
/// committed frame, are dropped so their permits return.
///
/// ### 中文
/// 提交阶段的接收端。
///
/// 只绘制最新的已拷贝帧；更旧的帧以及不比上次已提交帧更新的帧都会被丢弃，使其许可归还。
pub(crate) struct CommitQueue {
    receiver: Receiver<CanvasArgs>,
    upstream: StageCompletion,
    completion: StageCompletion,
    last_committed: AtomicU64,
    stats: Arc<FrameStats>,
    events: Arc<RenderEvents>,
}

impl CommitQueue {
    pub(crate) fn new(
        receiver: Receiver<CanvasArgs>,
        upstream: StageCompletion,
        stats: Arc<FrameStats>,
        events: Arc<RenderEvents>,
    ) -> Self {
        Self {
            receiver,
            upstream,
            completion: Completion::new(),
            last_committed: AtomicU64::new(0),
            stats,
            events,
        }
    }

    #[cfg(test)]
    pub(crate) fn completion(&self) -> &StageCompletion {
        &self.completion
    }

    pub(crate) fn last_committed(&self) -> u64 {
        self.last_committed.load(Ordering::Acquire)
    }

    /// ### English
    /// Draws the newest queued frame into `surface` inside one draw batch.
    ///
    /// Returns `true` when a frame was drawn.
    ///
    /// ### 中文
    /// 在一个绘制批次内把队列中最新的帧绘制到 `surface`。
    ///
    /// 绘制了帧时返回 `true`。
    pub(crate) fn commit(&self, surface: &mut dyn PaintSurface) -> bool {
        self.events.frame_consumed();
        let last = self.last_committed();

        let mut newest: Option<CanvasArgs> = None;
        let mut disconnected = false;
        loop {
            match self.receiver.try_recv() {
                Ok(args) => {
                    let newer = args.seq() > last
                        && newest
                            .as_ref()
                            .is_none_or(|current| args.seq() > current.seq());
                    if !newer {
                        self.stats.record_dropped();
                    } else if newest.replace(args).is_some() {
                        self.stats.record_dropped();
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        let drawn = match newest {
            Some(args) => {
                let drawn = {
                    let mut batch = DrawBatch::begin(surface);
                    args.canvas().draw(args.slot(), args.seq(), &mut batch)
                };
                if drawn {
                    self.last_committed.fetch_max(args.seq(), Ordering::AcqRel);
                    self.stats.record_committed();
                    trace!("frame {} committed", args.seq());
                } else {
                    self.stats.record_dropped();
                }
                drawn
            }
            None => false,
        };

        if disconnected {
            if let Some(result) = self.upstream.get() {
                self.completion.complete(result);
            }
        }
        drawn
    }

    /// ### English
    /// Drops every queued frame without drawing it. Returns how many were dropped.
    ///
    /// ### 中文
    /// 丢弃队列中所有帧而不绘制。返回丢弃的数量。
    pub(crate) fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        for _ in self.receiver.try_iter() {
            self.stats.record_dropped();
            discarded += 1;
        }
        discarded
    }

    /// ### English
    /// Resolves the commit stage once the copy stage has completed: queued frames are discarded
    /// and the copy stage's result (fault included) becomes the commit result.
    ///
    /// ### 中文
    /// 在拷贝阶段完成后结束提交阶段：丢弃排队的帧，并以拷贝阶段的结果（包括故障）作为提交结果。
    pub(crate) fn finish(&self) -> StageResult {
        let upstream = self.upstream.wait();
        self.discard_pending();
        self.completion.complete(upstream);
        self.completion.wait()
    }
}

/// ### English
/// UI-thread handle for committing frames. Cheap to clone; stays valid across pipeline restarts
/// and after shutdown (commits then draw nothing).
///
/// ### 中文
/// 用于提交帧的 UI 线程句柄。克隆开销低；在管线重建期间以及关闭之后依然有效（此时提交不绘制任何内容）。
#[derive(Clone, Default)]
pub struct Presenter {
    queue: Arc<RwLock<Option<Arc<CommitQueue>>>>,
}

impl Presenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Commits the newest ready frame into `surface`. Call from the UI paint callback.
    ///
    /// ### 中文
    /// 将最新就绪的帧提交到 `surface`。在 UI 绘制回调中调用。
    pub fn commit(&self, surface: &mut dyn PaintSurface) -> bool {
        let queue = self.queue.read().clone();
        match queue {
            Some(queue) => queue.commit(surface),
            None => false,
        }
    }

    /// ### English
    /// Sequence number of the last committed frame (`0` before the first commit).
    ///
    /// ### 中文
    /// 最后一次提交的帧序号（首次提交前为 `0`）。
    pub fn last_committed(&self) -> u64 {
        self.queue
            .read()
            .as_ref()
            .map_or(0, |queue| queue.last_committed())
    }

    pub fn is_attached(&self) -> bool {
        self.queue.read().is_some()
    }

    pub(crate) fn attach(&self, queue: Arc<CommitQueue>) {
        *self.queue.write() = Some(queue);
    }

    pub(crate) fn detach(&self) {
        self.queue.write().take();
    }
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("attached", &self.is_attached())
            .field("last_committed", &self.last_committed())
            .finish()
    }
}
