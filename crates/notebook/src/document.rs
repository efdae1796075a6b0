//! The document shape exchanged with the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::UserInfo;

/// Title shown for notebooks without one.
pub const UNTITLED: &str = "Untitled Notebook";

/// A saved notebook.
///
/// Fields this crate does not know about are kept in `extra` and written
/// back unchanged on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserInfo>,
    #[serde(default)]
    pub cells: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotebookDoc {
    pub fn new(owner: Option<UserInfo>, cells: Vec<String>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            owner,
            cells,
            title: title.into(),
            created: Utc::now(),
            updated: None,
            extra: Map::new(),
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            UNTITLED
        } else {
            &self.title
        }
    }

    /// Most recent modification time.
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.updated.unwrap_or(self.created)
    }
}

impl Default for NotebookDoc {
    fn default() -> Self {
        Self::new(None, Vec::new(), "")
    }
}
