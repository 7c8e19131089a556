//! Authenticated users and sessions.
//!
//! Authentication itself happens outside this crate. The front-end publishes
//! the signed-in user (or `None` on sign-out) to a [`SessionHub`]; the
//! library turns an [`AuthUser`] into a [`Session`] by reading the user's
//! role from the `users` collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;
pub use crate::local_db_model::Role;

/// What the identity provider reports for a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// The acting user of a workflow call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    pub email: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self, action: &str) -> Result<(), AppResponse> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppResponse::Forbidden(format!(
                "Only administrators can {action}"
            )))
        }
    }

    /// Users act on their own records; admins act on anyone's.
    pub fn require_self_or_admin(&self, user_id: &str, action: &str) -> Result<(), AppResponse> {
        if self.is_admin() || self.uid == user_id {
            Ok(())
        } else {
            Err(AppResponse::Forbidden(format!(
                "You can only {action} for your own account"
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SessionCallback = Arc<dyn Fn(Option<&AuthUser>) + Send + Sync>;

/// Fan-out of auth-state changes to interested parties.
#[derive(Default)]
pub struct SessionHub {
    current: Mutex<Option<AuthUser>>,
    subscribers: Mutex<Vec<(SubscriptionId, SessionCallback)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("current", &self.current())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback`; it is invoked right away with the current user.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Option<&AuthUser>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: SessionCallback = Arc::new(callback);
        let current = self.current();
        callback(current.as_ref());
        lock(&self.subscribers).push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Records a sign-in (`Some`) or sign-out (`None`) and notifies subscribers.
    pub fn publish(&self, user: Option<AuthUser>) {
        *lock(&self.current) = user.clone();
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let subscribers: Vec<SessionCallback> = lock(&self.subscribers)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(user.as_ref());
        }
    }

    pub fn current(&self) -> Option<AuthUser> {
        lock(&self.current).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Display name, falling back to the email, or `"Guest"` when signed out.
    pub fn display_name(&self) -> String {
        match self.current() {
            Some(user) => user
                .display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(user.email),
            None => "Guest".to_string(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
