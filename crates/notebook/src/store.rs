//! Persistence collaborators for notebook documents.
//!
//! [`FileStore`] keeps one JSON file per notebook in a directory:
//!
//! ```text
//! <store_dir>/
//!   3f0c…e1.json
//!   9a41…07.json
//! ```
//!
//! [`MemoryStore`] keeps everything in process and is handy for tests and
//! embedding.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, warn};
use uuid::Uuid;

use crate::document::NotebookDoc;
use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Loads and stores [`NotebookDoc`]s.
pub trait Persistence: Send + Sync {
    fn get(&self, id: &str) -> BoxFuture<'static, StoreResult<NotebookDoc>>;

    /// Store a new document and return its freshly assigned id.
    fn create(&self, doc: NotebookDoc) -> BoxFuture<'static, StoreResult<String>>;

    /// Overwrite an existing document. `doc.id` must be set.
    fn save(&self, doc: NotebookDoc) -> BoxFuture<'static, StoreResult<()>>;

    fn list_by_owner(&self, uid: &str) -> BoxFuture<'static, StoreResult<Vec<NotebookDoc>>>;

    /// Most recently touched documents first.
    fn list_recent(&self, limit: usize) -> BoxFuture<'static, StoreResult<Vec<NotebookDoc>>>;
}

fn newest_first(docs: &mut [NotebookDoc]) {
    docs.sort_by_key(|doc| std::cmp::Reverse(doc.last_touched()));
}

/// In-process document store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    docs: Arc<StdMutex<HashMap<String, NotebookDoc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, NotebookDoc>> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Persistence for MemoryStore {
    fn get(&self, id: &str) -> BoxFuture<'static, StoreResult<NotebookDoc>> {
        let result = self
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()));
        futures::future::ready(result).boxed()
    }

    fn create(&self, mut doc: NotebookDoc) -> BoxFuture<'static, StoreResult<String>> {
        let id = Uuid::new_v4().to_string();
        doc.id = Some(id.clone());
        self.lock().insert(id.clone(), doc);
        futures::future::ready(Ok(id)).boxed()
    }

    fn save(&self, mut doc: NotebookDoc) -> BoxFuture<'static, StoreResult<()>> {
        let result = match doc.id.clone() {
            Some(id) => {
                doc.updated = Some(Utc::now());
                self.lock().insert(id, doc);
                Ok(())
            }
            None => Err(StoreError::MissingId),
        };
        futures::future::ready(result).boxed()
    }

    fn list_by_owner(&self, uid: &str) -> BoxFuture<'static, StoreResult<Vec<NotebookDoc>>> {
        let mut docs: Vec<NotebookDoc> = self
            .lock()
            .values()
            .filter(|doc| doc.owner.as_ref().is_some_and(|o| o.uid == uid))
            .cloned()
            .collect();
        newest_first(&mut docs);
        futures::future::ready(Ok(docs)).boxed()
    }

    fn list_recent(&self, limit: usize) -> BoxFuture<'static, StoreResult<Vec<NotebookDoc>>> {
        let mut docs: Vec<NotebookDoc> = self.lock().values().cloned().collect();
        newest_first(&mut docs);
        docs.truncate(limit);
        futures::future::ready(Ok(docs)).boxed()
    }
}

/// Directory of `<id>.json` documents.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn doc_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    async fn write_doc(dir: PathBuf, id: &str, doc: &NotebookDoc) -> StoreResult<()> {
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(Self::doc_path(&dir, id), json).await?;
        Ok(())
    }

    async fn read_doc(path: &Path) -> StoreResult<NotebookDoc> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Every parseable document in the directory. Unreadable files are
    /// skipped with a warning.
    async fn read_all(dir: PathBuf) -> StoreResult<Vec<NotebookDoc>> {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_doc(&path).await {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!("[store] Skipping {}: {}", path.display(), e),
            }
        }
        Ok(docs)
    }
}

impl Persistence for FileStore {
    fn get(&self, id: &str) -> BoxFuture<'static, StoreResult<NotebookDoc>> {
        let path = Self::doc_path(&self.dir, id);
        let id = id.to_string();
        async move {
            match Self::read_doc(&path).await {
                Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StoreError::NotFound(id))
                }
                other => other,
            }
        }
        .boxed()
    }

    fn create(&self, mut doc: NotebookDoc) -> BoxFuture<'static, StoreResult<String>> {
        let dir = self.dir.clone();
        async move {
            let id = Uuid::new_v4().to_string();
            doc.id = Some(id.clone());
            Self::write_doc(dir, &id, &doc).await?;
            info!("[store] Created notebook {}", id);
            Ok(id)
        }
        .boxed()
    }

    fn save(&self, mut doc: NotebookDoc) -> BoxFuture<'static, StoreResult<()>> {
        let dir = self.dir.clone();
        async move {
            let id = doc.id.clone().ok_or(StoreError::MissingId)?;
            doc.updated = Some(Utc::now());
            Self::write_doc(dir, &id, &doc).await?;
            info!("[store] Saved notebook {}", id);
            Ok(())
        }
        .boxed()
    }

    fn list_by_owner(&self, uid: &str) -> BoxFuture<'static, StoreResult<Vec<NotebookDoc>>> {
        let dir = self.dir.clone();
        let uid = uid.to_string();
        async move {
            let mut docs: Vec<NotebookDoc> = Self::read_all(dir)
                .await?
                .into_iter()
                .filter(|doc| doc.owner.as_ref().is_some_and(|o| o.uid == uid))
                .collect();
            newest_first(&mut docs);
            Ok(docs)
        }
        .boxed()
    }

    fn list_recent(&self, limit: usize) -> BoxFuture<'static, StoreResult<Vec<NotebookDoc>>> {
        let dir = self.dir.clone();
        async move {
            let mut docs = Self::read_all(dir).await?;
            newest_first(&mut docs);
            docs.truncate(limit);
            Ok(docs)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserInfo;
    use tempfile::TempDir;

    fn doc(owner: Option<&str>, title: &str) -> NotebookDoc {
        NotebookDoc::new(
            owner.map(|uid| UserInfo::new(uid, uid)),
            vec!["x = 1".into()],
            title,
        )
    }

    #[tokio::test]
    async fn test_memory_create_then_get() {
        let store = MemoryStore::new();
        let id = store.create(doc(Some("u1"), "A")).await.unwrap();

        let loaded = store.get(&id).await.unwrap();
        assert_eq!(loaded.id.as_deref(), Some(id.as_str()));
        assert_eq!(loaded.title, "A");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_get_missing() {
        let store = MemoryStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_memory_save_requires_id() {
        let store = MemoryStore::new();
        let err = store.save(doc(None, "A")).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingId));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_save_sets_updated() {
        let store = MemoryStore::new();
        let id = store.create(doc(None, "A")).await.unwrap();
        let mut loaded = store.get(&id).await.unwrap();
        assert!(loaded.updated.is_none());

        loaded.title = "B".into();
        store.save(loaded).await.unwrap();

        let reloaded = store.get(&id).await.unwrap();
        assert_eq!(reloaded.title, "B");
        assert!(reloaded.updated.is_some());
    }

    #[tokio::test]
    async fn test_memory_list_by_owner() {
        let store = MemoryStore::new();
        store.create(doc(Some("u1"), "A")).await.unwrap();
        store.create(doc(Some("u2"), "B")).await.unwrap();
        store.create(doc(None, "C")).await.unwrap();

        let docs = store.list_by_owner("u1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "A");
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("notebooks"));

        let id = store.create(doc(Some("u1"), "Iris")).await.unwrap();
        assert!(store.dir().join(format!("{id}.json")).exists());

        let loaded = store.get(&id).await.unwrap();
        assert_eq!(loaded.title, "Iris");
        assert_eq!(loaded.cells, vec!["x = 1"]);
    }

    #[tokio::test]
    async fn test_file_store_get_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_file_store_list_on_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("does-not-exist"));
        assert!(store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_skips_invalid_files() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        store.create(doc(Some("u1"), "Good")).await.unwrap();
        std::fs::write(temp.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let docs = store.list_recent(10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Good");
    }

    #[tokio::test]
    async fn test_file_store_list_recent_orders_and_limits() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());

        let mut old = doc(None, "old");
        old.created = Utc::now() - chrono::Duration::hours(2);
        let mut mid = doc(None, "mid");
        mid.created = Utc::now() - chrono::Duration::hours(1);
        let new = doc(None, "new");

        for d in [old, mid, new] {
            store.create(d).await.unwrap();
        }

        let docs = store.list_recent(2).await.unwrap();
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "mid"]);
    }
}
