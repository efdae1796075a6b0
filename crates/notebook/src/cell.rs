//! Per-cell runtime state: identity, code, run status and output handle.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::output::OutputHandler;

/// Identifier of a cell within a notebook.
///
/// Ids are allocated by the owning notebook and never reused while the
/// notebook is alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        CellId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        CellId(s.to_string())
    }
}

/// Run status of a cell.
///
/// A successful run walks `Idle -> Running -> Updating -> Idle`; a failed
/// one walks `Idle -> Running -> Error -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    #[default]
    Idle,
    /// Code has been handed to the VM.
    Running,
    /// VM finished; waiting for trailing RPC events to settle.
    Updating,
    /// VM rejected the run; waiting out the settle delay.
    Error,
}

impl CellStatus {
    /// Whether a run is in flight.
    pub fn is_busy(self) -> bool {
        !matches!(self, CellStatus::Idle)
    }

    pub fn can_transition_to(self, next: CellStatus) -> bool {
        matches!(
            (self, next),
            (CellStatus::Idle, CellStatus::Running)
                | (CellStatus::Running, CellStatus::Updating)
                | (CellStatus::Running, CellStatus::Error)
                | (CellStatus::Updating, CellStatus::Idle)
                | (CellStatus::Error, CellStatus::Idle)
        )
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellStatus::Idle => write!(f, "idle"),
            CellStatus::Running => write!(f, "running"),
            CellStatus::Updating => write!(f, "updating"),
            CellStatus::Error => write!(f, "error"),
        }
    }
}

/// A live cell owned by a notebook.
pub struct Cell {
    pub id: CellId,
    pub code: String,
    pub status: CellStatus,
    output: Arc<dyn OutputHandler>,
}

impl Cell {
    pub fn new(id: CellId, code: impl Into<String>, output: Arc<dyn OutputHandler>) -> Self {
        Cell {
            id,
            code: code.into(),
            status: CellStatus::Idle,
            output,
        }
    }

    pub fn output_handler(&self) -> Arc<dyn OutputHandler> {
        Arc::clone(&self.output)
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn set_status(&mut self, next: CellStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            log::warn!(
                "[cell] Ignoring illegal status change for {}: {} -> {}",
                self.id,
                self.status,
                next
            );
            false
        }
    }

    pub fn snapshot(&self, focused: bool) -> CellSnapshot {
        CellSnapshot {
            id: self.id.clone(),
            code: self.code.clone(),
            status: self.status,
            focused,
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a cell handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub id: CellId,
    pub code: String,
    pub status: CellStatus,
    pub focused: bool,
}

/// Monotonic cell id source owned by a notebook. There is no way to rewind
/// it: a run in flight may still address its old id.
#[derive(Debug, Default)]
pub struct CellIdAllocator {
    next: u64,
}

impl CellIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> CellId {
        let id = CellId(format!("cell-{}", self.next));
        self.next += 1;
        id
    }
}
