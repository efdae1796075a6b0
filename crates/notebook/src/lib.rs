//! cellbook - cell execution and notebook state model.
//!
//! A notebook is an ordered set of code cells executed against an opaque
//! computation VM. The VM pushes output back as RPC events addressed by
//! cell id; the notebook routes them to per-cell output handlers.
//!
//! Rendering, the VM itself, storage and sign-in are collaborators behind
//! traits: [`output::OutputTarget`], [`vm::Vm`], [`store::Persistence`] and
//! [`auth::AuthProvider`].

pub mod auth;
pub mod cell;
pub mod doc_session;
pub mod document;
pub mod error;
pub mod execution_queue;
pub mod notebook;
pub mod output;
pub mod rpc;
pub mod settings;
pub mod store;
pub mod vm;

pub use cell::{CellId, CellSnapshot, CellStatus};
pub use document::NotebookDoc;
pub use error::{NotebookError, NotebookResult, StoreError, VmError};
pub use notebook::{Notebook, NotebookConfig, NotebookEvent, RunOutcome};
pub use rpc::{RpcEvent, RpcHandle};
