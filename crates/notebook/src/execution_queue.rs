//! FIFO queue that runs cells one at a time.

use log::info;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use crate::cell::CellId;

/// Status of a queued cell
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CellQueueStatus {
    /// Waiting in queue
    Pending,
    /// Currently executing
    Executing,
}

/// A cell in the execution queue
#[derive(Debug, Clone, Serialize)]
pub struct QueuedCell {
    pub cell_id: CellId,
    pub status: CellQueueStatus,
    /// Position in queue (0 = currently executing or next)
    pub position: usize,
}

/// Snapshot of the queue for observers
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionQueueState {
    /// Is the queue processing (has pending or executing cells)?
    pub processing: bool,
    /// Cells currently in queue (pending + executing)
    pub cells: Vec<QueuedCell>,
    /// ID of currently executing cell (if any)
    pub executing_cell_id: Option<CellId>,
}

/// The execution queue - owns the pending/executing state
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    /// Pending cell IDs (FIFO)
    pending: VecDeque<CellId>,
    /// Currently executing cell ID
    executing: Option<CellId>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a cell for execution
    pub fn enqueue(&mut self, cell_id: CellId) {
        self.pending.push_back(cell_id);
    }

    /// Get next cell to execute (if queue is non-empty and nothing executing)
    pub fn dequeue(&mut self) -> Option<CellId> {
        if self.executing.is_some() {
            return None;
        }
        let cell_id = self.pending.pop_front()?;
        self.executing = Some(cell_id.clone());
        Some(cell_id)
    }

    /// Mark current execution as complete
    pub fn complete(&mut self, cell_id: &CellId) {
        if self.executing.as_ref() == Some(cell_id) {
            self.executing = None;
        }
    }

    /// Clear all pending (but not currently executing)
    pub fn clear_pending(&mut self) -> Vec<CellId> {
        self.pending.drain(..).collect()
    }

    /// Forget pending cells and the executing slot. Returns the pending ids.
    pub fn clear(&mut self) -> Vec<CellId> {
        self.executing = None;
        self.clear_pending()
    }

    /// Check if a cell is currently executing
    pub fn is_executing(&self, cell_id: &CellId) -> bool {
        self.executing.as_ref() == Some(cell_id)
    }

    /// Check if queue is empty (no pending and no executing)
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.executing.is_none()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Get current state for observers
    pub fn get_state(&self) -> ExecutionQueueState {
        let executing = self.executing.iter().map(|id| (id, CellQueueStatus::Executing));
        let pending = self.pending.iter().map(|id| (id, CellQueueStatus::Pending));

        let cells = executing
            .chain(pending)
            .enumerate()
            .map(|(position, (cell_id, status))| QueuedCell {
                cell_id: cell_id.clone(),
                status,
                position,
            })
            .collect();

        ExecutionQueueState {
            processing: !self.is_empty(),
            cells,
            executing_cell_id: self.executing.clone(),
        }
    }
}

/// Shared queue type
pub type SharedExecutionQueue = Arc<StdMutex<ExecutionQueue>>;

fn lock(queue: &SharedExecutionQueue) -> MutexGuard<'_, ExecutionQueue> {
    queue.lock().unwrap_or_else(|e| e.into_inner())
}

/// Frees the executing slot when dropped, including when the drain future
/// itself is dropped mid-run.
struct CompleteOnDrop<'a> {
    queue: &'a SharedExecutionQueue,
    cell_id: CellId,
}

impl Drop for CompleteOnDrop<'_> {
    fn drop(&mut self) {
        lock(self.queue).complete(&self.cell_id);
    }
}

/// Run queued cells one at a time until the queue is empty.
///
/// Each call to `run` is awaited to completion before the next cell is
/// dequeued. If another drain already has a cell executing this returns
/// immediately; that drain will also pick up anything enqueued meanwhile.
/// Dropping the returned future releases the cell it was running.
/// Returns the number of cells this call ran.
pub async fn drain<F, Fut>(queue: &SharedExecutionQueue, mut run: F) -> usize
where
    F: FnMut(CellId) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ran = 0;
    loop {
        let Some(cell_id) = lock(queue).dequeue() else {
            break;
        };

        info!("[queue] Processing cell: {}", cell_id);
        let done = CompleteOnDrop {
            queue,
            cell_id: cell_id.clone(),
        };
        run(cell_id.clone()).await;
        ran += 1;

        drop(done);
        info!("[queue] Execution done: {}", cell_id);
    }
    ran
}
