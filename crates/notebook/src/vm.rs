//! The computation VM boundary.

use futures::future::BoxFuture;

use crate::cell::CellId;
pub use crate::error::VmError;

/// An opaque executor for cell code.
///
/// A VM is built with an [`RpcHandle`](crate::rpc::RpcHandle) and reports
/// output through it, out of band relative to `exec` completing.
pub trait Vm: Send + Sync {
    /// Execute `code` on behalf of `cell_id`. Resolves when the VM
    /// considers the run finished.
    fn exec(&self, code: &str, cell_id: &CellId) -> BoxFuture<'static, Result<(), VmError>>;

    /// Release VM resources. Further `exec` calls may fail.
    fn destroy(&self);
}
