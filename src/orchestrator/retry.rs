//! Retry chains.
//!
//! A chain owns one batch on one slot. Each retry runs only the tests that
//! failed in the previous attempt, until everything passes, the try budget
//! is spent, or the run is aborted.
//!
//! ```text
//!  Pending ──► Running ──┬──► Succeeded
//!                        ├──► ExhaustedRetries
//!                        └──► Aborted
//! ```

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::progress::ProgressSender;
use super::{Attempt, AttemptExecutor, Batch, Slot};
use crate::report::{AttemptTag, ReportParser};
use crate::tool::TestTool;

/// Where a retry chain is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainState {
    Pending,
    Running,
    /// The last attempt left nothing to retry.
    Succeeded,
    /// Tests were still failing after the last allowed attempt.
    ExhaustedRetries,
    /// The run was cancelled before the chain could finish.
    Aborted,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChainState::Succeeded | ChainState::ExhaustedRetries | ChainState::Aborted
        )
    }
}

/// All attempts of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct RetryChain {
    pub batch: usize,
    /// Slot the chain ran on, `None` if it never started.
    pub slot: Option<usize>,
    pub state: ChainState,
    pub attempts: Vec<Attempt>,
}

impl RetryChain {
    /// A chain for `batch` that has not started.
    pub fn new(batch: usize) -> Self {
        Self {
            batch,
            slot: None,
            state: ChainState::Pending,
            attempts: Vec::new(),
        }
    }

    /// A chain cancelled before its first attempt.
    pub fn aborted(batch: usize) -> Self {
        Self {
            state: ChainState::Aborted,
            ..Self::new(batch)
        }
    }

    /// Attempts after the first.
    pub fn retry_count(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }

    /// The most recent attempt, if any ran.
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }
}

/// Drives retry chains.
pub struct RetryController<'a, T, P> {
    executor: AttemptExecutor<'a, T, P>,
    try_count: usize,
    progress: ProgressSender,
    cancel: CancellationToken,
}

impl<'a, T: TestTool, P: ReportParser> RetryController<'a, T, P> {
    /// Creates a controller allowing `try_count` attempts per batch.
    ///
    /// A `try_count` of zero is treated as one.
    pub fn new(
        executor: AttemptExecutor<'a, T, P>,
        try_count: usize,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            try_count: try_count.max(1),
            progress,
            cancel,
        }
    }

    /// Returns `true` once the run has been aborted.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `batch` on `slot` until it reaches a terminal state.
    pub async fn run(&self, batch: &Batch, slot: &Slot) -> RetryChain {
        let mut chain = RetryChain::new(batch.index);
        chain.slot = Some(slot.index);
        chain.state = ChainState::Running;

        let mut selection = batch.selection.clone();
        for retry in 0..self.try_count {
            if self.is_cancelled() {
                chain.state = ChainState::Aborted;
                break;
            }

            let tag = AttemptTag {
                batch: batch.index,
                retry,
                slot: slot.index,
            };
            let attempt = self.executor.execute(tag, &selection, slot).await;
            self.progress.attempt_completed(&attempt).await;

            let next = attempt.next_selection();
            chain.attempts.push(attempt);

            match next {
                None => {
                    chain.state = ChainState::Succeeded;
                    break;
                }
                Some(_) if self.is_cancelled() => {
                    chain.state = ChainState::Aborted;
                    break;
                }
                Some(next) => selection = next,
            }
        }

        if chain.state == ChainState::Running {
            chain.state = ChainState::ExhaustedRetries;
        }

        match chain.state {
            ChainState::Succeeded => info!(
                "Batch {} passed after {} attempt(s)",
                chain.batch,
                chain.attempts.len()
            ),
            ChainState::ExhaustedRetries => warn!(
                "Batch {} still failing after {} attempt(s)",
                chain.batch,
                chain.attempts.len()
            ),
            _ => info!("Batch {} aborted", chain.batch),
        }

        chain
    }
}
