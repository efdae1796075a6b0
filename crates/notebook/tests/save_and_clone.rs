//! Integration tests for saving, title editing and cloning.

mod common;

use std::sync::Arc;

use cellbook::auth::{AuthProvider, LocalAuth, UserInfo};
use cellbook::document::NotebookDoc;
use cellbook::error::NotebookError;
use cellbook::notebook::{Notebook, NotebookEvent};
use cellbook::output::RecordingTarget;
use cellbook::store::{FileStore, MemoryStore, Persistence};
use common::ScriptVm;
use tempfile::TempDir;

fn ada() -> UserInfo {
    UserInfo::new("ada", "Ada Lovelace")
}

fn open_with(doc: NotebookDoc, store: Arc<dyn Persistence>) -> Notebook<ScriptVm> {
    Notebook::open(doc, Arc::new(RecordingTarget::new()), ScriptVm::new).with_persistence(store)
}

#[tokio::test]
async fn test_save_serializes_order_and_title() {
    let nb = Notebook::open(
        NotebookDoc::default(),
        Arc::new(RecordingTarget::new()),
        ScriptVm::new,
    );
    let placeholder = nb.order()[0].clone();
    let c1 = nb.insert_cell(0, "a");
    let c2 = nb.insert_cell(1, "b");
    nb.delete_cell(&placeholder);
    nb.set_title("T");
    assert_eq!(*nb.order(), vec![c1, c2]);

    let doc = nb.save().await.unwrap();

    assert_eq!(doc.cells, vec!["a", "b"]);
    assert_eq!(doc.title, "T");
    assert!(doc.id.is_none());
}

#[tokio::test]
async fn test_first_save_creates_then_updates() {
    let store = MemoryStore::new();
    let nb = open_with(NotebookDoc::new(Some(ada()), vec!["x".into()], ""), Arc::new(store.clone()));
    let mut rx = nb.subscribe();

    let first = nb.save().await.unwrap();
    let id = first.id.clone().unwrap();
    assert_eq!(store.len(), 1);

    let cell = nb.order()[0].clone();
    nb.on_change(&cell, "y");
    let second = nb.save().await.unwrap();

    assert_eq!(second.id.as_deref(), Some(id.as_str()));
    assert_eq!(store.len(), 1);
    let stored = store.get(&id).await.unwrap();
    assert_eq!(stored.cells, vec!["y"]);
    assert!(stored.updated.is_some());

    let saved: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| matches!(e, NotebookEvent::Saved { .. }))
        .collect();
    assert_eq!(saved.len(), 2);
}

#[tokio::test]
async fn test_save_to_file_store() {
    let temp = TempDir::new().unwrap();
    let store = FileStore::new(temp.path());
    let nb = open_with(
        NotebookDoc::new(Some(ada()), vec!["print(1)".into()], "Disk"),
        Arc::new(store.clone()),
    );

    let doc = nb.save().await.unwrap();

    let loaded = store.get(doc.id.as_deref().unwrap()).await.unwrap();
    assert_eq!(loaded.title, "Disk");
    assert_eq!(loaded.cells, vec!["print(1)"]);
    assert_eq!(loaded.owner, Some(ada()));
}

#[test]
fn test_title_edit_requires_owner() {
    let nb = Notebook::open(
        NotebookDoc::new(Some(ada()), vec![], "Mine"),
        Arc::new(RecordingTarget::new()),
        ScriptVm::new,
    );
    let bob = UserInfo::new("bob", "Bob");

    assert!(matches!(nb.begin_title_edit(None), Err(NotebookError::NotSignedIn)));
    assert!(matches!(
        nb.begin_title_edit(Some(&bob)),
        Err(NotebookError::NotOwner { uid }) if uid == "bob"
    ));
    assert!(!nb.is_editing_title());

    nb.begin_title_edit(Some(&ada())).unwrap();
    assert!(nb.is_editing_title());
    nb.cancel_title_edit();
    assert!(!nb.is_editing_title());
}

#[tokio::test]
async fn test_save_ends_title_edit() {
    let nb = Notebook::open(
        NotebookDoc::new(Some(ada()), vec![], "Old"),
        Arc::new(RecordingTarget::new()),
        ScriptVm::new,
    );
    nb.begin_title_edit(Some(&ada())).unwrap();
    nb.set_title("New");

    let doc = nb.save().await.unwrap();

    assert_eq!(doc.title, "New");
    assert!(!nb.is_editing_title());
}

#[test]
fn test_auth_subscription_gates_title_edit() {
    let auth = LocalAuth::new();
    let nb = Arc::new(Notebook::open(
        NotebookDoc::new(Some(ada()), vec![], ""),
        Arc::new(RecordingTarget::new()),
        ScriptVm::new,
    ));

    let editable = Arc::new(std::sync::Mutex::new(false));
    let sink = Arc::clone(&editable);
    let watched = Arc::clone(&nb);
    let _sub = auth.subscribe_auth_change(Box::new(move |user: Option<&UserInfo>| {
        *sink.lock().unwrap() = watched.can_edit_title(user);
    }));
    assert!(!*editable.lock().unwrap());

    auth.sign_in(ada());
    assert!(*editable.lock().unwrap());

    auth.sign_out();
    assert!(!*editable.lock().unwrap());
}

#[tokio::test]
async fn test_clone_copies_cells_for_new_owner() {
    let store = MemoryStore::new();
    let mut original = NotebookDoc::new(Some(ada()), vec!["a".into(), "b".into()], "Iris");
    original.id = Some("orig".into());
    original.extra.insert("tags".into(), serde_json::json!(["ml"]));
    let nb = open_with(original, Arc::new(store.clone()));
    let bob = UserInfo::new("bob", "Bob");

    assert!(nb.can_clone(Some(&bob)));
    let new_id = nb.clone_for(Some(&bob)).await.unwrap();

    assert_ne!(new_id, "orig");
    assert!(!nb.is_cloning());
    let cloned = store.get(&new_id).await.unwrap();
    assert_eq!(cloned.owner, Some(bob.clone()));
    assert_eq!(cloned.cells, vec!["a", "b"]);
    assert_eq!(cloned.title, "Iris");
    assert_eq!(cloned.extra.get("tags"), Some(&serde_json::json!(["ml"])));

    let mine = store.list_by_owner("bob").await.unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn test_clone_requires_user_and_store() {
    let nb = Notebook::open(
        NotebookDoc::default(),
        Arc::new(RecordingTarget::new()),
        ScriptVm::new,
    );
    assert!(!nb.can_clone(Some(&ada())));
    assert!(matches!(nb.clone_for(None).await, Err(NotebookError::NotSignedIn)));
    assert!(matches!(nb.clone_for(Some(&ada())).await, Err(NotebookError::NoStore)));
}
