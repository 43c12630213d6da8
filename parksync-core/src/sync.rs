//! Synced resource
//!
//! Binds one `RemoteResource` to its cache and pending-mutation table.
//! Clones share the same state, so a scheduler task, a mutation coordinator
//! and any number of view models can hold one each. Every state change bumps
//! a revision on a `watch` channel; views re-render from `snapshot()`.
//!
//! At most one fetch per resource is outstanding at any time, whoever asks
//! for it: scheduled polls and manual refreshes claim the same slot.

use crate::error::SyncError;
use crate::models::{Fields, MutationAck, Page, PendingMutation, Query, Record};
use crate::resource::RemoteResource;
use crate::store::{ResourceCache, SyncState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct SyncedResource<R> {
    inner: Arc<Inner<R>>,
}

struct Inner<R> {
    remote: R,
    state: Mutex<SyncState>,
    revision: watch::Sender<u64>,
    fetching: AtomicBool,
}

/// Result of a manual refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// The page was fetched and applied to the cache
    Applied,
    /// Another fetch of this resource was still outstanding; nothing was sent
    Busy,
}

/// Holds the resource's fetch slot until dropped
pub(crate) struct FetchSlot<R> {
    synced: SyncedResource<R>,
}

impl<R> Drop for FetchSlot<R> {
    fn drop(&mut self) {
        self.synced.inner.fetching.store(false, Ordering::SeqCst);
    }
}

impl<R> Clone for SyncedResource<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteResource> SyncedResource<R> {
    pub fn new(remote: R, max_age: Duration) -> Self {
        let state = SyncState::new(remote.name(), max_age);
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                remote,
                state: Mutex::new(state),
                revision,
                fetching: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.remote.name()
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Point-in-time copy of the cache, safe to hand to view models
    pub fn snapshot(&self) -> ResourceCache {
        self.inner.state.lock().cache().clone()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.inner.state.lock().cache().get(id).cloned()
    }

    pub fn pending(&self) -> Vec<PendingMutation> {
        self.inner.state.lock().pending().to_vec()
    }

    /// Receiver whose value increments on every cache change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// True while a fetch of this resource has not resolved
    pub fn is_fetching(&self) -> bool {
        self.inner.fetching.load(Ordering::SeqCst)
    }

    /// Claims the fetch slot, or `None` if a fetch is already outstanding.
    pub(crate) fn try_begin_fetch(&self) -> Option<FetchSlot<R>> {
        if self.inner.fetching.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(FetchSlot { synced: self.clone() })
    }

    /// Runs `f` against the state under the lock and publishes a new revision.
    pub(crate) fn update_state<T>(&self, f: impl FnOnce(&mut SyncState) -> T) -> T {
        let out = {
            let mut state = self.inner.state.lock();
            f(&mut state)
        };
        self.inner.revision.send_modify(|rev| *rev += 1);
        out
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&SyncState) -> T) -> T {
        f(&self.inner.state.lock())
    }

    /// Replaces the cache with an authoritative page.
    pub fn apply_poll(&self, page: Page) {
        let count = page.records.len();
        self.update_state(|state| state.apply_poll(page, OffsetDateTime::now_utc()));
        debug!("[{}] cache refreshed with {count} records", self.name());
    }

    /// One-off fetch outside any subscription. Sends nothing and returns
    /// `Busy` if a poll of this resource is still waiting for its response.
    /// On failure the cache keeps its last-known-good content.
    pub async fn refresh(&self, query: &Query) -> Result<Refresh, SyncError> {
        let Some(_slot) = self.try_begin_fetch() else {
            debug!("[{}] refresh skipped, fetch already in flight", self.name());
            return Ok(Refresh::Busy);
        };
        let page = self.inner.remote.fetch_all(query).await?;
        self.apply_poll(page);
        Ok(Refresh::Applied)
    }

    /// Creates a record; the server's copy is inserted when it returns one.
    pub async fn create(&self, payload: &Fields) -> Result<MutationAck, SyncError> {
        let ack = self.inner.remote.create(payload).await?;
        if let Some(record) = ack.record() {
            info!("[{}] created {}", self.name(), record.id());
            let record = record.clone();
            self.update_state(|state| state.insert(record));
        }
        Ok(ack)
    }

    /// Removes a record. The cache drops it on success and on `NotFound`;
    /// the `NotFound` is still returned.
    pub async fn remove(&self, id: &str) -> Result<(), SyncError> {
        let result = self.inner.remote.remove(id).await;
        match &result {
            Ok(()) | Err(SyncError::NotFound(_)) => {
                self.update_state(|state| state.forget(id));
            }
            Err(_) => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed;

    impl RemoteResource for Fixed {
        fn name(&self) -> &str {
            "areas"
        }

        fn id_field(&self) -> &str {
            "area_id"
        }

        async fn fetch_all(&self, _query: &Query) -> Result<Page, SyncError> {
            let record = Record::from_value(json!({"area_id": "A1", "current_visitors": 3}), "area_id")?;
            Ok(Page { records: vec![record], pagination: None })
        }

        async fn create(&self, payload: &Fields) -> Result<MutationAck, SyncError> {
            Record::from_value(serde_json::Value::Object(payload.clone()), "area_id").map(MutationAck::Record)
        }

        async fn update(&self, id: &str, _patch: &Fields) -> Result<MutationAck, SyncError> {
            Err(SyncError::NotFound(id.to_string()))
        }

        async fn remove(&self, id: &str) -> Result<(), SyncError> {
            Err(SyncError::NotFound(id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_refresh_bumps_revision() {
        let synced = SyncedResource::new(Fixed, Duration::from_secs(30));
        let mut changes = synced.changes();
        synced.refresh(&Query::new()).await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(synced.snapshot().len(), 1);
        assert!(!synced.snapshot().is_stale());
    }

    #[tokio::test]
    async fn test_refresh_releases_fetch_slot() {
        let synced = SyncedResource::new(Fixed, Duration::from_secs(30));
        let slot = synced.try_begin_fetch().unwrap();
        assert!(synced.is_fetching());
        assert!(synced.try_begin_fetch().is_none());
        assert_eq!(synced.refresh(&Query::new()).await.unwrap(), Refresh::Busy);
        assert!(synced.snapshot().is_empty());

        drop(slot);
        assert!(!synced.is_fetching());
        assert_eq!(synced.refresh(&Query::new()).await.unwrap(), Refresh::Applied);
        assert!(!synced.is_fetching());
        assert_eq!(synced.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_create_inserts_returned_record() {
        let synced = SyncedResource::new(Fixed, Duration::from_secs(30));
        let payload = json!({"area_id": "B7", "area_name": "Lake"});
        synced.create(payload.as_object().unwrap()).await.unwrap();
        assert!(synced.get("B7").is_some());
    }

    #[tokio::test]
    async fn test_remove_not_found_still_drops_from_cache() {
        let synced = SyncedResource::new(Fixed, Duration::from_secs(30));
        synced.refresh(&Query::new()).await.unwrap();
        let err = synced.remove("A1").await.unwrap_err();
        assert_eq!(err, SyncError::NotFound("A1".into()));
        assert!(synced.get("A1").is_none());
    }
}
