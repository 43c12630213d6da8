//! Dismissible notifications keyed by the action that failed
//!
//! Action keys look like `fetch:<resource>` or `update:<resource>/<id>`.
//! A new failure for the same action replaces the previous notification
//! instead of stacking.

use crate::error::{ErrorKind, SyncError};
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub action: String,
    pub kind: ErrorKind,
    pub message: String,
    pub raised_at: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct NotificationCenter {
    items: Vec<Notification>,
    next_id: u64,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch_action(resource: &str) -> String {
        format!("fetch:{resource}")
    }

    pub fn update_action(resource: &str, id: &str) -> String {
        format!("update:{resource}/{id}")
    }

    /// Records `error` for `action`, replacing any notification already raised for it.
    pub fn push(&mut self, action: impl Into<String>, error: &SyncError, at: OffsetDateTime) -> u64 {
        let action = action.into();
        self.items.retain(|n| n.action != action);
        self.next_id += 1;
        let id = self.next_id;
        self.items.push(Notification {
            id,
            action,
            kind: error.kind(),
            message: error.message().to_string(),
            raised_at: at,
        });
        id
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        before != self.items.len()
    }

    /// Clears the notification for an action once it succeeds again
    pub fn resolve(&mut self, action: &str) {
        self.items.retain(|n| n.action != action);
    }

    pub fn active(&self) -> &[Notification] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
