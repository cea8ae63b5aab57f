//! Attempt completion notices.
//!
//! Every finished attempt sends an [`AttemptCompleted`] notice over a
//! channel. A single consumer calls the user callback, so callbacks never
//! run concurrently, and the sending attempt waits until its notice was
//! handled. A callback returning [`Flow::Abort`] cancels the run.

use std::collections::BTreeSet;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Attempt;
use crate::TestId;

/// Notice sent after each attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptCompleted {
    pub batch: usize,
    /// 0-based retry index.
    pub retry: usize,
    pub slot: usize,
    pub passed: BTreeSet<TestId>,
    pub failed: BTreeSet<TestId>,
}

impl From<&Attempt> for AttemptCompleted {
    fn from(attempt: &Attempt) -> Self {
        Self {
            batch: attempt.tag.batch,
            retry: attempt.tag.retry,
            slot: attempt.tag.slot,
            passed: attempt.passed.clone(),
            failed: attempt.failed.clone(),
        }
    }
}

/// What the run should do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Abort,
}

/// Callback invoked once per completed attempt.
pub type CompletionCallback = Box<dyn FnMut(&AttemptCompleted) -> Flow + Send>;

struct Notice {
    event: AttemptCompleted,
    handled: oneshot::Sender<()>,
}

/// Sending half, shared by every retry chain.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<Notice>,
}

/// Receiving half, driven by the coordinator.
pub struct ProgressReceiver {
    rx: mpsc::UnboundedReceiver<Notice>,
}

/// Creates a connected sender and receiver.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, ProgressReceiver { rx })
}

impl ProgressSender {
    /// Reports a finished attempt and waits until it was handled.
    ///
    /// Returns immediately when nobody is listening.
    pub async fn attempt_completed(&self, attempt: &Attempt) {
        let (handled, done) = oneshot::channel();
        let notice = Notice {
            event: AttemptCompleted::from(attempt),
            handled,
        };
        if self.tx.send(notice).is_err() {
            return;
        }
        let _ = done.await;
    }
}

impl ProgressReceiver {
    /// Handles notices until every sender is dropped.
    pub async fn drive(mut self, mut callback: Option<CompletionCallback>, cancel: CancellationToken) {
        while let Some(notice) = self.rx.recv().await {
            let event = &notice.event;
            info!(
                "Batch {} try {} finished on slot {}: {} passed, {} failed",
                event.batch,
                event.retry + 1,
                event.slot,
                event.passed.len(),
                event.failed.len()
            );

            if let Some(callback) = callback.as_mut()
                && callback(event) == Flow::Abort
                && !cancel.is_cancelled()
            {
                warn!("Run aborted by completion callback");
                cancel.cancel();
            }

            let _ = notice.handled.send(());
        }
    }
}
