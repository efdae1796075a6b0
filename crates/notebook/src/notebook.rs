//! The notebook orchestrator.
//!
//! A [`Notebook`] owns an ordered set of cells, runs them against a [`Vm`],
//! routes the VM's RPC events to per-cell output handlers and tracks which
//! cell is active.
//!
//! ## Run lifecycle
//!
//! ```text
//! idle ──run()──▶ running ──exec ok──▶ updating ──settle──▶ idle
//!                    │
//!                    └──exec err──▶ error ──settle──▶ idle
//! ```
//!
//! A cell accepts a new run only while idle. Runs of different cells are
//! independent and may overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::auth::{owns_doc, UserInfo};
use crate::cell::{Cell, CellId, CellIdAllocator, CellSnapshot, CellStatus};
use crate::document::NotebookDoc;
use crate::error::{NotebookError, NotebookResult, VmError};
use crate::output::{OutputHandler, OutputTarget};
use crate::rpc::RpcHandle;
use crate::settings::{NotebookSettings, DEFAULT_PLACEHOLDER_CODE, DEFAULT_SETTLE_DELAY_MS};
use crate::store::Persistence;
use crate::vm::Vm;

/// Capacity for the event broadcast channel.
/// Slow subscribers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for a notebook.
#[derive(Debug, Clone)]
pub struct NotebookConfig {
    pub settle_delay: Duration,
    pub placeholder_code: String,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            placeholder_code: DEFAULT_PLACEHOLDER_CODE.to_string(),
        }
    }
}

impl From<&NotebookSettings> for NotebookConfig {
    fn from(settings: &NotebookSettings) -> Self {
        Self {
            settle_delay: settings.settle_delay(),
            placeholder_code: settings.placeholder_code.clone(),
        }
    }
}

/// Change notifications, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotebookEvent {
    CellInserted { cell_id: CellId, position: usize },
    CellDeleted { cell_id: CellId },
    CodeChanged { cell_id: CellId },
    StatusChanged { cell_id: CellId, status: CellStatus },
    ActiveChanged { active: Option<CellId> },
    TitleChanged { title: String },
    Saved { doc_id: Option<String> },
}

/// How a run ended. A VM failure is not an error of `run` itself; it is
/// reported through the cell's status and output handler.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed,
    Failed(VmError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

pub(crate) struct NotebookState {
    pub(crate) cells: HashMap<CellId, Cell>,
    /// Replaced wholesale on every structural change.
    order: Arc<Vec<CellId>>,
    active: Option<CellId>,
    title: String,
    editing_title: bool,
    cloning_in_progress: bool,
    /// Carried-over fields of the loaded document.
    doc: NotebookDoc,
    ids: CellIdAllocator,
}

impl NotebookState {
    fn new() -> Self {
        Self {
            cells: HashMap::new(),
            order: Arc::new(Vec::new()),
            active: None,
            title: String::new(),
            editing_title: false,
            cloning_in_progress: false,
            doc: NotebookDoc::default(),
            ids: CellIdAllocator::new(),
        }
    }

    fn update_order(&mut self, f: impl FnOnce(&mut Vec<CellId>)) {
        let mut order = Vec::clone(&self.order);
        f(&mut order);
        self.order = Arc::new(order);
    }

    fn codes_in_order(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|id| self.cells.get(id))
            .map(|cell| cell.code.clone())
            .collect()
    }
}

pub(crate) fn lock_state(state: &StdMutex<NotebookState>) -> MutexGuard<'_, NotebookState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Notebook<V: Vm> {
    state: Arc<StdMutex<NotebookState>>,
    vm: V,
    target: Arc<dyn OutputTarget>,
    persistence: Option<Arc<dyn Persistence>>,
    config: NotebookConfig,
    events: broadcast::Sender<NotebookEvent>,
}

impl<V: Vm> Notebook<V> {
    /// Create an empty notebook. `make_vm` receives the handle the VM
    /// should push its RPC events into.
    pub fn new<F>(target: Arc<dyn OutputTarget>, make_vm: F) -> Self
    where
        F: FnOnce(RpcHandle) -> V,
    {
        let state = Arc::new(StdMutex::new(NotebookState::new()));
        let vm = make_vm(RpcHandle::new(&state));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state,
            vm,
            target,
            persistence: None,
            config: NotebookConfig::default(),
            events,
        }
    }

    /// Create a notebook with default config and load `doc` into it.
    pub fn open<F>(doc: NotebookDoc, target: Arc<dyn OutputTarget>, make_vm: F) -> Self
    where
        F: FnOnce(RpcHandle) -> V,
    {
        let notebook = Self::new(target, make_vm);
        notebook.mount(doc);
        notebook
    }

    pub fn with_config(mut self, config: NotebookConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    fn lock(&self) -> MutexGuard<'_, NotebookState> {
        lock_state(&self.state)
    }

    fn emit(&self, event: NotebookEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotebookEvent> {
        self.events.subscribe()
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    pub fn config(&self) -> &NotebookConfig {
        &self.config
    }

    /// A fresh handle for routing RPC events into this notebook.
    pub fn rpc_handle(&self) -> RpcHandle {
        RpcHandle::new(&self.state)
    }

    // ── Loading and teardown ─────────────────────────────────────────

    /// Replace the notebook contents with `doc`. An empty document gets a
    /// single placeholder cell.
    pub fn mount(&self, doc: NotebookDoc) {
        self.clear_cells();

        let codes = if doc.cells.is_empty() {
            vec![self.config.placeholder_code.clone()]
        } else {
            doc.cells.clone()
        };
        {
            let mut st = self.lock();
            st.title = doc.title.clone();
            st.editing_title = false;
            st.doc = doc;
        }
        for (position, code) in codes.into_iter().enumerate() {
            self.insert_cell(position, code);
        }
        info!("[notebook] Mounted notebook with {} cells", self.len());
    }

    /// Destroy the VM and drop every cell.
    pub fn shutdown(&self) {
        self.vm.destroy();
        self.reset();
        info!("[notebook] Shut down");
    }

    /// Drop every cell, keeping the VM.
    ///
    /// The id counter keeps going, so events and status changes from runs
    /// still in flight are dropped instead of reaching cells inserted later.
    pub fn reset(&self) {
        self.clear_cells();
    }

    fn clear_cells(&self) {
        let removed: Vec<CellId> = {
            let mut st = self.lock();
            let removed = Vec::clone(&st.order);
            st.cells.clear();
            st.order = Arc::new(Vec::new());
            st.active = None;
            removed
        };
        for id in &removed {
            self.target.detach(id);
        }
    }

    // ── Structure ────────────────────────────────────────────────────

    /// Insert a cell at `position` (clamped to the end) and return its id.
    pub fn insert_cell(&self, position: usize, code: impl Into<String>) -> CellId {
        self.insert_where(code.into(), |_| position)
    }

    /// Insert an empty cell right after `after`, or at the top if `after`
    /// is not in the notebook.
    pub fn insert_cell_after(&self, after: &CellId) -> CellId {
        self.insert_where(String::new(), |order| {
            order.iter().position(|id| id == after).map_or(0, |i| i + 1)
        })
    }

    fn insert_where(&self, code: String, locate: impl FnOnce(&[CellId]) -> usize) -> CellId {
        let id = self.lock().ids.allocate();
        let output = self.target.attach(&id);

        let position = {
            let mut st = self.lock();
            let position = locate(&st.order).min(st.order.len());
            st.cells.insert(id.clone(), Cell::new(id.clone(), code, output));
            st.update_order(|order| order.insert(position, id.clone()));
            position
        };

        self.emit(NotebookEvent::CellInserted {
            cell_id: id.clone(),
            position,
        });
        id
    }

    /// Remove a cell. Returns false if there was no such cell.
    pub fn delete_cell(&self, cell_id: &CellId) -> bool {
        let was_active = {
            let mut st = self.lock();
            if st.cells.remove(cell_id).is_none() {
                return false;
            }
            st.update_order(|order| order.retain(|id| id != cell_id));
            let was_active = st.active.as_ref() == Some(cell_id);
            if was_active {
                st.active = None;
            }
            was_active
        };

        self.target.detach(cell_id);
        self.emit(NotebookEvent::CellDeleted {
            cell_id: cell_id.clone(),
        });
        if was_active {
            self.emit(NotebookEvent::ActiveChanged { active: None });
        }
        true
    }

    /// Replace a cell's code. Does not run it.
    pub fn on_change(&self, cell_id: &CellId, code: impl Into<String>) -> bool {
        let changed = match self.lock().cells.get_mut(cell_id) {
            Some(cell) => {
                cell.code = code.into();
                true
            }
            None => false,
        };
        if changed {
            self.emit(NotebookEvent::CodeChanged {
                cell_id: cell_id.clone(),
            });
        }
        changed
    }

    // ── Readers ──────────────────────────────────────────────────────

    /// Snapshot of the current order.
    pub fn order(&self) -> Arc<Vec<CellId>> {
        Arc::clone(&self.lock().order)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, cell_id: &CellId) -> bool {
        self.lock().cells.contains_key(cell_id)
    }

    pub fn cell(&self, cell_id: &CellId) -> Option<CellSnapshot> {
        let st = self.lock();
        let focused = st.active.as_ref() == Some(cell_id);
        st.cells.get(cell_id).map(|cell| cell.snapshot(focused))
    }

    /// All cells in order.
    pub fn cells(&self) -> Vec<CellSnapshot> {
        let st = self.lock();
        st.order
            .iter()
            .filter_map(|id| {
                st.cells
                    .get(id)
                    .map(|cell| cell.snapshot(st.active.as_ref() == Some(id)))
            })
            .collect()
    }

    pub fn status(&self, cell_id: &CellId) -> Option<CellStatus> {
        self.lock().cells.get(cell_id).map(|cell| cell.status)
    }

    pub fn output_handler(&self, cell_id: &CellId) -> Option<Arc<dyn OutputHandler>> {
        self.lock().cells.get(cell_id).map(Cell::output_handler)
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Move a cell to `status`. Returns false if the cell is gone or the
    /// transition is not allowed.
    fn set_status(&self, cell_id: &CellId, status: CellStatus) -> bool {
        let applied = self
            .lock()
            .cells
            .get_mut(cell_id)
            .is_some_and(|cell| cell.set_status(status));
        if applied {
            self.emit(NotebookEvent::StatusChanged {
                cell_id: cell_id.clone(),
                status,
            });
        }
        applied
    }

    /// Run a cell through the VM.
    ///
    /// Fails with [`NotebookError::CellBusy`] if the cell has a run in
    /// flight. Once started, a run always ends with the cell idle again,
    /// even if the cell was deleted meanwhile.
    pub async fn run(&self, cell_id: &CellId) -> NotebookResult<RunOutcome> {
        let (code, output) = {
            let mut st = self.lock();
            let cell = st
                .cells
                .get_mut(cell_id)
                .ok_or_else(|| NotebookError::CellNotFound(cell_id.clone()))?;
            if cell.status.is_busy() {
                return Err(NotebookError::CellBusy {
                    cell_id: cell_id.clone(),
                    status: cell.status,
                });
            }
            cell.set_status(CellStatus::Running);
            (cell.code.clone(), cell.output_handler())
        };

        output.clear();
        self.emit(NotebookEvent::StatusChanged {
            cell_id: cell_id.clone(),
            status: CellStatus::Running,
        });
        info!("[notebook] Running cell {}", cell_id);

        let outcome = match self.vm.exec(&code, cell_id).await {
            Ok(()) => {
                self.set_status(cell_id, CellStatus::Updating);
                RunOutcome::Completed
            }
            Err(e) => {
                error!("[notebook] Execution failed: cell={}, error={}", cell_id, e);
                if self.set_status(cell_id, CellStatus::Error) {
                    output.error(&e.to_string());
                }
                RunOutcome::Failed(e)
            }
        };

        tokio::time::sleep(self.config.settle_delay).await;
        if !self.set_status(cell_id, CellStatus::Idle) {
            info!("[notebook] Cell {} deleted before its run settled", cell_id);
        }
        Ok(outcome)
    }

    /// Move focus to the cell after `cell_id`, then run `cell_id`.
    pub async fn run_and_focus_next(&self, cell_id: &CellId) -> NotebookResult<RunOutcome> {
        if let Some(next) = self.next_cell(cell_id) {
            self.go_to(Some(&next));
        }
        self.run(cell_id).await
    }

    pub fn next_cell(&self, cell_id: &CellId) -> Option<CellId> {
        let st = self.lock();
        let idx = st.order.iter().position(|id| id == cell_id)?;
        st.order.get(idx + 1).cloned()
    }

    // ── Focus ────────────────────────────────────────────────────────

    pub fn active(&self) -> Option<CellId> {
        self.lock().active.clone()
    }

    pub fn is_focused(&self, cell_id: &CellId) -> bool {
        self.lock().active.as_ref() == Some(cell_id)
    }

    /// Make `cell_id` the active cell. Returns whether the active cell
    /// changed.
    pub fn focus(&self, cell_id: &CellId) -> bool {
        {
            let mut st = self.lock();
            if !st.cells.contains_key(cell_id) || st.active.as_ref() == Some(cell_id) {
                return false;
            }
            st.active = Some(cell_id.clone());
        }
        self.emit(NotebookEvent::ActiveChanged {
            active: Some(cell_id.clone()),
        });
        true
    }

    /// Clear the active cell, but only if `cell_id` is still the active
    /// one. A late blur from a cell that already lost focus is ignored.
    pub fn blur(&self, cell_id: &CellId) -> bool {
        {
            let mut st = self.lock();
            if st.active.as_ref() != Some(cell_id) {
                return false;
            }
            st.active = None;
        }
        self.emit(NotebookEvent::ActiveChanged { active: None });
        true
    }

    /// Set the active cell directly. Unknown ids are ignored.
    pub fn go_to(&self, cell_id: Option<&CellId>) -> bool {
        {
            let mut st = self.lock();
            if let Some(id) = cell_id {
                if !st.cells.contains_key(id) {
                    return false;
                }
            }
            if st.active.as_ref() == cell_id {
                return false;
            }
            st.active = cell_id.cloned();
        }
        self.emit(NotebookEvent::ActiveChanged {
            active: cell_id.cloned(),
        });
        true
    }

    // ── Title ────────────────────────────────────────────────────────

    pub fn title(&self) -> String {
        self.lock().title.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        self.lock().title = title.clone();
        self.emit(NotebookEvent::TitleChanged { title });
    }

    pub fn can_edit_title(&self, user: Option<&UserInfo>) -> bool {
        owns_doc(user, &self.lock().doc)
    }

    /// Only the owner may edit the title.
    pub fn begin_title_edit(&self, user: Option<&UserInfo>) -> NotebookResult<()> {
        let mut st = self.lock();
        let user = user.ok_or(NotebookError::NotSignedIn)?;
        if !owns_doc(Some(user), &st.doc) {
            return Err(NotebookError::NotOwner {
                uid: user.uid.clone(),
            });
        }
        st.editing_title = true;
        Ok(())
    }

    pub fn cancel_title_edit(&self) {
        self.lock().editing_title = false;
    }

    pub fn is_editing_title(&self) -> bool {
        self.lock().editing_title
    }

    // ── Save and clone ───────────────────────────────────────────────

    /// The document as it would be saved now: carried-over fields of the
    /// loaded document, the code of every ordered cell, the current title.
    pub fn to_doc(&self) -> NotebookDoc {
        let st = self.lock();
        NotebookDoc {
            cells: st.codes_in_order(),
            title: st.title.clone(),
            created: Utc::now(),
            ..st.doc.clone()
        }
    }

    /// Save through the attached persistence collaborator, creating the
    /// document on first save. Ends title editing.
    pub async fn save(&self) -> NotebookResult<NotebookDoc> {
        let mut doc = self.to_doc();
        self.cancel_title_edit();

        if let Some(persistence) = &self.persistence {
            match doc.id.clone() {
                Some(_) => persistence.save(doc.clone()).await?,
                None => {
                    let id = persistence.create(doc.clone()).await?;
                    doc.id = Some(id.clone());
                    self.lock().doc.id = Some(id);
                }
            }
            info!("[notebook] Saved {}", doc.id.as_deref().unwrap_or("-"));
        }

        self.emit(NotebookEvent::Saved {
            doc_id: doc.id.clone(),
        });
        Ok(doc)
    }

    pub fn can_clone(&self, user: Option<&UserInfo>) -> bool {
        user.is_some() && self.persistence.is_some()
    }

    pub fn is_cloning(&self) -> bool {
        self.lock().cloning_in_progress
    }

    /// Copy this notebook into a new document owned by `user`. Returns the
    /// new document id.
    pub async fn clone_for(&self, user: Option<&UserInfo>) -> NotebookResult<String> {
        let user = user.ok_or(NotebookError::NotSignedIn)?;
        let persistence = self.persistence.clone().ok_or(NotebookError::NoStore)?;

        let doc = {
            let mut st = self.lock();
            if st.cloning_in_progress {
                return Err(NotebookError::CloneInProgress);
            }
            st.cloning_in_progress = true;
            NotebookDoc {
                id: None,
                owner: Some(user.clone()),
                cells: st.codes_in_order(),
                title: st.title.clone(),
                created: Utc::now(),
                updated: None,
                extra: st.doc.extra.clone(),
            }
        };

        let result = persistence.create(doc).await;
        self.lock().cloning_in_progress = false;

        match result {
            Ok(id) => {
                info!("[notebook] Cloned for {} as {}", user.uid, id);
                Ok(id)
            }
            Err(e) => {
                warn!("[notebook] Clone failed: {}", e);
                Err(e.into())
            }
        }
    }
}

impl<V: Vm> Drop for Notebook<V> {
    fn drop(&mut self) {
        let ids: Vec<CellId> = Vec::clone(&lock_state(&self.state).order);
        for id in &ids {
            self.target.detach(id);
        }
    }
}
