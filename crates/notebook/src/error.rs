use crate::cell::{CellId, CellStatus};

/// Result type for notebook operations.
pub type NotebookResult<T> = Result<T, NotebookError>;

/// Errors surfaced by the notebook orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("Cell not found: {0}")]
    CellNotFound(CellId),

    #[error("Cell {cell_id} is busy ({status})")]
    CellBusy { cell_id: CellId, status: CellStatus },

    #[error("No user is signed in")]
    NotSignedIn,

    #[error("User {uid} does not own this notebook")]
    NotOwner { uid: String },

    #[error("A clone of this notebook is already in progress")]
    CloneInProgress,

    #[error("No document store is attached")]
    NoStore,

    #[error("Unknown RPC method: {0}")]
    UnknownRpcMethod(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from a persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Notebook not found: {0}")]
    NotFound(String),

    #[error("Document has no id")]
    MissingId,
}

/// Errors reported by a VM.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    #[error("{0}")]
    Exec(String),

    #[error("VM has been destroyed")]
    Destroyed,
}
