//! One-way RPC from the VM back into the notebook.
//!
//! While (or after) executing a cell the VM pushes zero or more events
//! tagged with the originating cell id. The notebook routes each one to
//! that cell's output handler. No acknowledgement flows back, and events
//! for cells that no longer exist are dropped.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cell::CellId;
use crate::error::{NotebookError, NotebookResult};
use crate::notebook::{lock_state, NotebookState};
use crate::output::OutputHandler;

/// Events a VM can push for a cell.
///
/// Wire form: `{"method": "print", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum RpcEvent {
    Print(Value),
    Plot(Value),
    Imshow(Value),
    DownloadProgress(Value),
}

impl RpcEvent {
    /// Build an event from a method name as it appears on the wire.
    pub fn from_method(method: &str, data: Value) -> NotebookResult<Self> {
        match method {
            "print" => Ok(RpcEvent::Print(data)),
            "plot" => Ok(RpcEvent::Plot(data)),
            "imshow" => Ok(RpcEvent::Imshow(data)),
            "downloadProgress" => Ok(RpcEvent::DownloadProgress(data)),
            other => Err(NotebookError::UnknownRpcMethod(other.to_string())),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            RpcEvent::Print(_) => "print",
            RpcEvent::Plot(_) => "plot",
            RpcEvent::Imshow(_) => "imshow",
            RpcEvent::DownloadProgress(_) => "downloadProgress",
        }
    }

    pub fn deliver(self, handler: &dyn OutputHandler) {
        match self {
            RpcEvent::Print(data) => handler.print(data),
            RpcEvent::Plot(data) => handler.plot(data),
            RpcEvent::Imshow(data) => handler.imshow(data),
            RpcEvent::DownloadProgress(data) => handler.download_progress(data),
        }
    }
}

/// An event addressed to a cell, as carried over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub cell_id: CellId,
    pub event: RpcEvent,
}

/// Callback target handed to a VM.
///
/// Holds only a weak reference to the notebook: a VM that outlives its
/// notebook simply has its events dropped.
#[derive(Clone)]
pub struct RpcHandle {
    state: Weak<StdMutex<NotebookState>>,
}

impl RpcHandle {
    pub(crate) fn new(state: &Arc<StdMutex<NotebookState>>) -> Self {
        Self {
            state: Arc::downgrade(state),
        }
    }

    /// Route `event` to the output handler of `cell_id`.
    pub fn dispatch(&self, cell_id: &CellId, event: RpcEvent) {
        let Some(state) = self.state.upgrade() else {
            debug!("[rpc] Notebook gone, dropping {} for {}", event.method(), cell_id);
            return;
        };

        // Release the state lock before calling into the handler.
        let handler = lock_state(&state)
            .cells
            .get(cell_id)
            .map(|cell| cell.output_handler());

        match handler {
            Some(handler) => event.deliver(handler.as_ref()),
            None => debug!("[rpc] Dropping {} for missing cell {}", event.method(), cell_id),
        }
    }

    pub fn print(&self, cell_id: &CellId, data: Value) {
        self.dispatch(cell_id, RpcEvent::Print(data));
    }

    pub fn plot(&self, cell_id: &CellId, data: Value) {
        self.dispatch(cell_id, RpcEvent::Plot(data));
    }

    pub fn imshow(&self, cell_id: &CellId, data: Value) {
        self.dispatch(cell_id, RpcEvent::Imshow(data));
    }

    pub fn download_progress(&self, cell_id: &CellId, data: Value) {
        self.dispatch(cell_id, RpcEvent::DownloadProgress(data));
    }
}

/// Spawn a task forwarding messages from `rx` into `handle`.
///
/// For VMs that run on their own task and talk to the notebook through a
/// channel. The task ends when every sender is dropped.
pub fn spawn_rpc_pump(mut rx: mpsc::Receiver<RpcMessage>, handle: RpcHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[rpc] Pump started");
        while let Some(RpcMessage { cell_id, event }) = rx.recv().await {
            handle.dispatch(&cell_id, event);
        }
        info!("[rpc] Pump channel closed");
    })
}
