//! Authentication boundary.
//!
//! The notebook only needs to know who is signed in, to decide whether the
//! title may be edited and whether the notebook may be cloned.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};

use crate::document::NotebookDoc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub uid: String,
    pub display_name: String,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl UserInfo {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            photo_url: None,
        }
    }
}

/// Whether `user` is the owner of `doc`.
pub fn owns_doc(user: Option<&UserInfo>, doc: &NotebookDoc) -> bool {
    match (user, doc.owner.as_ref()) {
        (Some(user), Some(owner)) => user.uid == owner.uid,
        _ => false,
    }
}

pub type AuthCallback = Box<dyn Fn(Option<&UserInfo>) + Send + Sync>;

/// Source of sign-in state changes.
pub trait AuthProvider: Send + Sync {
    /// Register `cb`. It is invoked once immediately with the current user
    /// and then on every change until the returned subscription is dropped.
    fn subscribe_auth_change(&self, cb: AuthCallback) -> Subscription;

    fn current_user(&self) -> Option<UserInfo>;
}

/// Keeps an auth callback registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<StdMutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).callbacks.remove(&self.id);
        }
    }
}

#[derive(Default)]
struct Registry {
    user: Option<UserInfo>,
    next_id: u64,
    callbacks: BTreeMap<u64, Arc<AuthCallback>>,
}

fn lock(registry: &StdMutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-process auth state, driven by explicit sign-in/sign-out calls.
#[derive(Default, Clone)]
pub struct LocalAuth {
    registry: Arc<StdMutex<Registry>>,
}

impl LocalAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: UserInfo) {
        log::info!("[auth] Signed in as {}", user.uid);
        self.set_user(Some(user));
    }

    pub fn sign_out(&self) {
        log::info!("[auth] Signed out");
        self.set_user(None);
    }

    fn set_user(&self, user: Option<UserInfo>) {
        // Callbacks run outside the lock so they may call back into us.
        let callbacks: Vec<Arc<AuthCallback>> = {
            let mut registry = lock(&self.registry);
            registry.user = user.clone();
            registry.callbacks.values().cloned().collect()
        };
        for cb in callbacks {
            cb(user.as_ref());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).callbacks.len()
    }
}

impl AuthProvider for LocalAuth {
    fn subscribe_auth_change(&self, cb: AuthCallback) -> Subscription {
        let cb = Arc::new(cb);
        let (id, user) = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.insert(id, Arc::clone(&cb));
            (id, registry.user.clone())
        };
        cb(user.as_ref());
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    fn current_user(&self) -> Option<UserInfo> {
        lock(&self.registry).user.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<StdMutex<Vec<Option<String>>>>, AuthCallback) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: AuthCallback = Box::new(move |user| {
            sink.lock().unwrap().push(user.map(|u| u.uid.clone()));
        });
        (seen, cb)
    }

    #[test]
    fn test_subscribe_receives_current_user_immediately() {
        let auth = LocalAuth::new();
        auth.sign_in(UserInfo::new("u1", "Ada"));

        let (seen, cb) = recorder();
        let _sub = auth.subscribe_auth_change(cb);

        assert_eq!(*seen.lock().unwrap(), vec![Some("u1".to_string())]);
    }

    #[test]
    fn test_subscriber_sees_changes() {
        let auth = LocalAuth::new();
        let (seen, cb) = recorder();
        let _sub = auth.subscribe_auth_change(cb);

        auth.sign_in(UserInfo::new("u1", "Ada"));
        auth.sign_out();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("u1".to_string()), None]
        );
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let auth = LocalAuth::new();
        let (seen, cb) = recorder();
        let sub = auth.subscribe_auth_change(cb);
        assert_eq!(auth.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(auth.subscriber_count(), 0);

        auth.sign_in(UserInfo::new("u1", "Ada"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_owns_doc() {
        let owner = UserInfo::new("u1", "Ada");
        let other = UserInfo::new("u2", "Bob");
        let doc = NotebookDoc::new(Some(owner.clone()), vec![], "T");

        assert!(owns_doc(Some(&owner), &doc));
        assert!(!owns_doc(Some(&other), &doc));
        assert!(!owns_doc(None, &doc));
        assert!(!owns_doc(Some(&owner), &NotebookDoc::new(None, vec![], "T")));
    }

    #[test]
    fn test_user_info_wire_names() {
        let mut user = UserInfo::new("u1", "Ada");
        user.photo_url = Some("https://example.com/a.png".into());
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["displayName"], "Ada");
        assert_eq!(value["photoURL"], "https://example.com/a.png");
    }
}
