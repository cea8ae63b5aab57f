//! Parallel dispatch of retry chains over a fixed pool of slots.
//!
//! Each slot pairs a device with a private output directory. A chain
//! leases a slot for its whole life, so at most one attempt ever runs on a
//! slot at a time and no two concurrent attempts share a directory.

use std::ops::Deref;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use futures::future::join_all;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};

use super::{Batch, RetryChain, RetryController};
use crate::device::Device;
use crate::report::ReportParser;
use crate::tool::TestTool;

/// An execution lane: one device and one output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// 1-based slot number.
    pub index: usize,
    pub device: Device,
    pub output_dir: PathBuf,
}

/// Directory name of slot `index` below the run's output directory.
pub fn slot_dir_name(index: usize) -> String {
    format!("slot-{}", index)
}

/// Slot number encoded in a directory name made by [`slot_dir_name`].
pub fn slot_dir_index(name: &str) -> Option<usize> {
    name.strip_prefix("slot-")?.parse().ok()
}

/// Fixed set of slots handed out one chain at a time.
pub struct SlotPool {
    free: Mutex<Vec<Slot>>,
    available: Semaphore,
    size: usize,
}

impl SlotPool {
    /// Creates a pool holding `slots`.
    pub fn new(mut slots: Vec<Slot>) -> Self {
        // lowest index is handed out first
        slots.reverse();
        let size = slots.len();
        Self {
            free: Mutex::new(slots),
            available: Semaphore::new(size),
            size,
        }
    }

    /// Creates `count` slots under `output_dir`, binding slot `n` to the
    /// `n`th device, or to the tool's default device when there are fewer.
    pub fn with_devices(count: usize, devices: &[Device], output_dir: &Path) -> Self {
        let slots = (1..=count)
            .map(|index| Slot {
                index,
                device: devices.get(index - 1).cloned().unwrap_or_default(),
                output_dir: output_dir.join(slot_dir_name(index)),
            })
            .collect();
        Self::new(slots)
    }

    /// Number of slots, whether free or leased.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the pool has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Waits for a free slot.
    ///
    /// Returns `None` if the pool has no slots.
    pub async fn acquire(&self) -> Option<SlotLease<'_>> {
        if self.is_empty() {
            return None;
        }
        let permit = self.available.acquire().await.ok()?;
        let slot = self.lock().pop()?;
        Some(SlotLease {
            slot,
            pool: self,
            _permit: permit,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A slot held by one chain. Returned to the pool on drop.
pub struct SlotLease<'a> {
    slot: Slot,
    pool: &'a SlotPool,
    _permit: SemaphorePermit<'a>,
}

impl Deref for SlotLease<'_> {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.slot
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        debug!("Slot {} released", self.slot.index);
        self.pool.lock().push(self.slot.clone());
    }
}

/// Runs every batch's retry chain, at most one per slot at a time.
pub struct ParallelDispatcher {
    pool: SlotPool,
}

impl ParallelDispatcher {
    /// Creates a dispatcher over `pool`.
    pub fn new(pool: SlotPool) -> Self {
        Self { pool }
    }

    /// Runs all `batches`, returning one chain per batch in batch order.
    ///
    /// Batches that have not started when the run is aborted come back as
    /// [`ChainState::Aborted`](super::ChainState::Aborted) chains with no
    /// attempts. With a single slot the batches run one after another.
    pub async fn dispatch<T: TestTool, P: ReportParser>(
        &self,
        batches: &[Batch],
        controller: &RetryController<'_, T, P>,
    ) -> Vec<RetryChain> {
        info!(
            "Dispatching {} batch(es) over {} slot(s)",
            batches.len(),
            self.pool.len()
        );

        let chains = batches.iter().map(|batch| async move {
            if controller.is_cancelled() {
                return RetryChain::aborted(batch.index);
            }
            let Some(slot) = self.pool.acquire().await else {
                return RetryChain::aborted(batch.index);
            };
            if controller.is_cancelled() {
                return RetryChain::aborted(batch.index);
            }

            debug!("Batch {} bound to slot {}", batch.index, slot.index);
            controller.run(batch, &slot).await
        });

        join_all(chains).await
    }
}
