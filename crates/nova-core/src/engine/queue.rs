//! FIFO evaluation queue.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::cell::{CellId, CellType, EvalStatus};
use crate::error::{Error, Result};

/// Outcome of one evaluation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    pub cell_id: CellId,
    pub cell_type: CellType,
    pub status: EvalStatus,
}

/// Handle for a requested evaluation.
///
/// Resolves once the evaluation (including its queue slot and continuation
/// gate) has settled. A cell ending in [`EvalStatus::Error`] still resolves
/// to `Ok`; `Err` means the evaluation task itself died.
#[derive(Debug)]
pub struct PendingEvaluation {
    cell_id: CellId,
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Ready(Option<EvaluationSummary>),
    Waiting(oneshot::Receiver<EvaluationSummary>),
}

impl PendingEvaluation {
    pub(crate) fn ready(summary: EvaluationSummary) -> Self {
        Self {
            cell_id: summary.cell_id,
            state: PendingState::Ready(Some(summary)),
        }
    }

    pub(crate) fn waiting(cell_id: CellId, rx: oneshot::Receiver<EvaluationSummary>) -> Self {
        Self {
            cell_id,
            state: PendingState::Waiting(rx),
        }
    }

    /// Run `task` on its own tokio task, outside the queue.
    pub(crate) fn spawn<F>(cell_id: CellId, task: F) -> Self
    where
        F: Future<Output = EvaluationSummary> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
        Self::waiting(cell_id, rx)
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }
}

impl Future for PendingEvaluation {
    type Output = Result<EvaluationSummary>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let cell_id = this.cell_id;
        match &mut this.state {
            PendingState::Ready(summary) => match summary.take() {
                Some(summary) => Poll::Ready(Ok(summary)),
                None => Poll::Ready(Err(Error::EvaluationDropped(cell_id))),
            },
            PendingState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.map_err(|_| Error::EvaluationDropped(cell_id))),
        }
    }
}

type Job = BoxFuture<'static, ()>;

/// Runs submitted tasks one at a time in submission order.
///
/// Each task runs on its own tokio task and the worker waits for it to
/// finish before starting the next, so a panicking task is logged and the
/// queue moves on.
#[derive(Debug, Clone)]
pub struct EvaluationQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl EvaluationQueue {
    /// Start the queue worker. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) = tokio::spawn(job).await {
                    tracing::error!("queued evaluation task failed: {}", err);
                }
            }
            tracing::debug!("evaluation queue closed");
        });

        Self { tx }
    }

    /// Append `task` to the queue.
    pub fn submit<F>(&self, cell_id: CellId, task: F) -> PendingEvaluation
    where
        F: Future<Output = EvaluationSummary> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job = async move {
            let summary = task.await;
            let _ = done_tx.send(summary);
        }
        .boxed();

        if self.tx.send(job).is_err() {
            tracing::error!(cell = %cell_id, "evaluation queue worker is gone");
        }
        PendingEvaluation::waiting(cell_id, done_rx)
    }
}

impl Default for EvaluationQueue {
    fn default() -> Self {
        Self::new()
    }
}
