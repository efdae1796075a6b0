//! Shared helpers for integration tests.
//!
//! `ScriptVm` interprets cell code as a tiny script, one call per line:
//!
//! ```text
//! print(1)            push a print event with payload 1
//! plot([1, 2])        push a plot event (payload parsed as JSON)
//! imshow("img")       push an imshow event
//! downloadProgress({"loaded": 1})
//! sleep(50)           wait 50ms of (tokio) time before continuing
//! trailing(3)         print 3 roughly 10ms after exec resolves
//! fail(oops)          reject the run with "oops"
//! ```
//!
//! Anything else is ignored.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cellbook::cell::{CellId, CellStatus};
use cellbook::notebook::NotebookEvent;
use cellbook::rpc::{RpcEvent, RpcHandle};
use cellbook::vm::{Vm, VmError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Default)]
pub struct VmStats {
    pub execs: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub destroyed: AtomicBool,
}

pub struct ScriptVm {
    rpc: RpcHandle,
    pub stats: Arc<VmStats>,
}

impl ScriptVm {
    pub fn new(rpc: RpcHandle) -> Self {
        Self {
            rpc,
            stats: Arc::default(),
        }
    }
}

enum Step {
    Emit(RpcEvent),
    Sleep(u64),
    Trailing(Value),
    Fail(String),
}

fn parse_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

fn parse(code: &str) -> Vec<Step> {
    code.lines()
        .filter_map(|line| {
            let line = line.trim();
            let open = line.find('(')?;
            let name = &line[..open];
            let arg = line[open + 1..].strip_suffix(')')?;
            match name {
                "sleep" => arg.parse().ok().map(Step::Sleep),
                "trailing" => Some(Step::Trailing(parse_arg(arg))),
                "fail" => Some(Step::Fail(arg.to_string())),
                _ => RpcEvent::from_method(name, parse_arg(arg)).ok().map(Step::Emit),
            }
        })
        .collect()
}

impl Vm for ScriptVm {
    fn exec(&self, code: &str, cell_id: &CellId) -> BoxFuture<'static, Result<(), VmError>> {
        let steps = parse(code);
        let rpc = self.rpc.clone();
        let stats = Arc::clone(&self.stats);
        let cell_id = cell_id.clone();

        async move {
            if stats.destroyed.load(Ordering::SeqCst) {
                return Err(VmError::Destroyed);
            }
            stats.execs.fetch_add(1, Ordering::SeqCst);
            let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let mut result = Ok(());
            for step in steps {
                match step {
                    Step::Emit(event) => rpc.dispatch(&cell_id, event),
                    Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                    Step::Trailing(data) => {
                        let rpc = rpc.clone();
                        let cell_id = cell_id.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            rpc.print(&cell_id, data);
                        });
                    }
                    Step::Fail(message) => {
                        result = Err(VmError::Exec(message));
                        break;
                    }
                }
            }

            stats.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
        .boxed()
    }

    fn destroy(&self) {
        self.stats.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Status changes for `cell_id` received so far.
pub fn statuses(rx: &mut broadcast::Receiver<NotebookEvent>, cell_id: &CellId) -> Vec<CellStatus> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let NotebookEvent::StatusChanged { cell_id: id, status } = event {
            if &id == cell_id {
                seen.push(status);
            }
        }
    }
    seen
}
