//! Output handlers: where VM-pushed events for a cell end up.
//!
//! The notebook never renders anything itself. Each cell owns one
//! [`OutputHandler`], obtained from an [`OutputTarget`] when the cell is
//! inserted and released again when it is deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cell::CellId;

/// Receives rendered events for a single cell.
///
/// Implement this to route output to your UI layer. All methods are
/// fire-and-forget.
pub trait OutputHandler: Send + Sync {
    fn print(&self, data: Value);
    fn plot(&self, data: Value);
    fn imshow(&self, data: Value);
    fn download_progress(&self, data: Value);
    /// Called when the VM rejected a run.
    fn error(&self, message: &str);
    /// Reset the output region.
    fn clear(&self);
}

/// Hands out output handlers bound to a render target.
pub trait OutputTarget: Send + Sync {
    fn attach(&self, cell_id: &CellId) -> Arc<dyn OutputHandler>;

    /// The cell is gone; release anything held for it.
    fn detach(&self, _cell_id: &CellId) {}
}

/// One event as seen by an output handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OutputEvent {
    Print(Value),
    Plot(Value),
    Imshow(Value),
    DownloadProgress(Value),
    Error(String),
}

impl OutputEvent {
    /// Feed this event into `handler`.
    pub fn replay(&self, handler: &dyn OutputHandler) {
        match self {
            OutputEvent::Print(data) => handler.print(data.clone()),
            OutputEvent::Plot(data) => handler.plot(data.clone()),
            OutputEvent::Imshow(data) => handler.imshow(data.clone()),
            OutputEvent::DownloadProgress(data) => handler.download_progress(data.clone()),
            OutputEvent::Error(message) => handler.error(message),
        }
    }
}

/// Log-only output handler.
///
/// Writes every event to the `log` crate, tagged with the cell id.
pub struct LogOutputHandler {
    cell_id: CellId,
}

impl LogOutputHandler {
    pub fn new(cell_id: CellId) -> Self {
        Self { cell_id }
    }
}

impl OutputHandler for LogOutputHandler {
    fn print(&self, data: Value) {
        log::info!("[{}] {}", self.cell_id, display_value(&data));
    }

    fn plot(&self, data: Value) {
        log::info!("[{}] plot: {}", self.cell_id, data);
    }

    fn imshow(&self, data: Value) {
        log::info!("[{}] imshow: {}", self.cell_id, data);
    }

    fn download_progress(&self, data: Value) {
        log::debug!("[{}] download progress: {}", self.cell_id, data);
    }

    fn error(&self, message: &str) {
        log::error!("[{}] {}", self.cell_id, message);
    }

    fn clear(&self) {}
}

/// Strings print without their JSON quotes.
fn display_value(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Target producing [`LogOutputHandler`]s.
#[derive(Debug, Default)]
pub struct LogTarget;

impl OutputTarget for LogTarget {
    fn attach(&self, cell_id: &CellId) -> Arc<dyn OutputHandler> {
        Arc::new(LogOutputHandler::new(cell_id.clone()))
    }
}

/// In-memory output region. Keeps every event since the last `clear`.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    events: StdMutex<Vec<OutputEvent>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, event: OutputEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutputEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputHandler for RecordingOutput {
    fn print(&self, data: Value) {
        self.push(OutputEvent::Print(data));
    }

    fn plot(&self, data: Value) {
        self.push(OutputEvent::Plot(data));
    }

    fn imshow(&self, data: Value) {
        self.push(OutputEvent::Imshow(data));
    }

    fn download_progress(&self, data: Value) {
        self.push(OutputEvent::DownloadProgress(data));
    }

    fn error(&self, message: &str) {
        self.push(OutputEvent::Error(message.to_string()));
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// Target that keeps a [`RecordingOutput`] per attached cell.
#[derive(Debug, Default)]
pub struct RecordingTarget {
    outputs: StdMutex<HashMap<CellId, Arc<RecordingOutput>>>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// The output region currently attached for `cell_id`.
    pub fn output(&self, cell_id: &CellId) -> Option<Arc<RecordingOutput>> {
        self.lock().get(cell_id).cloned()
    }

    pub fn attached_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CellId, Arc<RecordingOutput>>> {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputTarget for RecordingTarget {
    fn attach(&self, cell_id: &CellId) -> Arc<dyn OutputHandler> {
        let output = Arc::new(RecordingOutput::new());
        self.lock().insert(cell_id.clone(), Arc::clone(&output));
        output
    }

    fn detach(&self, cell_id: &CellId) {
        self.lock().remove(cell_id);
    }
}
