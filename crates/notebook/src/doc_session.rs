//! Documentation cells: standalone snippets that run themselves on mount.
//!
//! Unlike notebook cells, which the user runs independently, documentation
//! cells share a VM and must not run concurrently, so every mounted cell
//! goes through one [`ExecutionQueue`]. Cells whose output was rendered
//! ahead of time are replayed from the session's prerendered cache instead
//! of being run again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use log::{info, warn};

use crate::cell::CellId;
use crate::execution_queue::{self, ExecutionQueueState, SharedExecutionQueue};
use crate::notebook::{Notebook, NotebookConfig};
use crate::output::{OutputEvent, OutputTarget};
use crate::rpc::RpcHandle;
use crate::vm::Vm;

/// Output captured ahead of time, keyed by cell id.
#[derive(Debug, Default)]
pub struct PrerenderedOutputs {
    outputs: HashMap<CellId, Vec<OutputEvent>>,
}

impl PrerenderedOutputs {
    pub fn insert(&mut self, cell_id: CellId, events: Vec<OutputEvent>) {
        self.outputs.insert(cell_id, events);
    }

    pub fn get(&self, cell_id: &CellId) -> Option<&[OutputEvent]> {
        self.outputs.get(cell_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
    }
}

pub struct DocSession<V: Vm> {
    notebook: Notebook<V>,
    queue: SharedExecutionQueue,
    prerendered: StdMutex<PrerenderedOutputs>,
}

impl<V: Vm> DocSession<V> {
    pub fn new<F>(target: Arc<dyn OutputTarget>, make_vm: F) -> Self
    where
        F: FnOnce(RpcHandle) -> V,
    {
        Self {
            notebook: Notebook::new(target, make_vm),
            queue: SharedExecutionQueue::default(),
            prerendered: StdMutex::default(),
        }
    }

    pub fn with_config(mut self, config: NotebookConfig) -> Self {
        self.notebook = self.notebook.with_config(config);
        self
    }

    pub fn notebook(&self) -> &Notebook<V> {
        &self.notebook
    }

    fn prerendered(&self) -> MutexGuard<'_, PrerenderedOutputs> {
        self.prerendered.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self) -> MutexGuard<'_, execution_queue::ExecutionQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record output for the cell that will be mounted as `cell_id`.
    pub fn set_prerendered(&self, cell_id: CellId, events: Vec<OutputEvent>) {
        self.prerendered().insert(cell_id, events);
    }

    pub fn prerendered_count(&self) -> usize {
        self.prerendered().len()
    }

    /// Append a documentation cell. It is replayed from the prerendered
    /// cache when possible, otherwise queued to run.
    pub fn mount_cell(&self, code: impl Into<String>) -> CellId {
        let cell_id = self.notebook.insert_cell(usize::MAX, code);

        let cached = self.prerendered().get(&cell_id).map(<[OutputEvent]>::to_vec);
        match (cached, self.notebook.output_handler(&cell_id)) {
            (Some(events), Some(output)) => {
                info!("[docs] Replaying prerendered output for {}", cell_id);
                for event in &events {
                    event.replay(output.as_ref());
                }
            }
            _ => self.queue().enqueue(cell_id.clone()),
        }
        cell_id
    }

    /// Run every queued cell, one at a time. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let notebook = &self.notebook;
        execution_queue::drain(&self.queue, |cell_id| async move {
            if let Err(e) = notebook.run(&cell_id).await {
                warn!("[docs] Skipping {}: {}", cell_id, e);
            }
        })
        .await
    }

    pub fn queue_state(&self) -> ExecutionQueueState {
        self.queue().get_state()
    }

    /// Forget all cells, pending runs and prerendered output.
    pub fn reset(&self) {
        let cancelled = self.queue().clear();
        if !cancelled.is_empty() {
            info!("[docs] Cancelled {} pending cells", cancelled.len());
        }
        self.prerendered().clear();
        self.notebook.reset();
    }

    /// Reset and destroy the VM.
    pub fn shutdown(&self) {
        self.reset();
        self.notebook.shutdown();
    }
}
