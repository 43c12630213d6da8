/*!
In-memory RemoteResource for tests without any HTTP server

Holds the "server-side" records, counts every call, and lets a test:
- hold fetches or mutations open (to build in-flight races)
- script the next fetch/update failure
- change server data while a request is pending

Data is read when a held request is released, not when it started.
*/

use parking_lot::Mutex;
use parksync_core::{Fields, MutationAck, Page, Query, Record, RemoteResource, SyncError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct StubResource {
    inner: Arc<StubInner>,
}

struct StubInner {
    name: String,
    id_field: String,
    records: Mutex<Vec<Record>>,
    fetch_calls: AtomicUsize,
    update_calls: AtomicUsize,
    fetch_gate: watch::Sender<bool>,
    mutation_gate: watch::Sender<bool>,
    fetch_failures: Mutex<VecDeque<SyncError>>,
    update_failures: Mutex<VecDeque<SyncError>>,
    next_id: AtomicUsize,
}

impl StubResource {
    pub fn new(name: &str, id_field: &str) -> Self {
        let (fetch_gate, _) = watch::channel(true);
        let (mutation_gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(StubInner {
                name: name.to_string(),
                id_field: id_field.to_string(),
                records: Mutex::new(Vec::new()),
                fetch_calls: AtomicUsize::new(0),
                update_calls: AtomicUsize::new(0),
                fetch_gate,
                mutation_gate,
                fetch_failures: Mutex::new(VecDeque::new()),
                update_failures: Mutex::new(VecDeque::new()),
                next_id: AtomicUsize::new(1),
            }),
        }
    }

    /// Seeds server-side data; panics on records without the id field
    pub fn with_records(self, records: Vec<Value>) -> Self {
        self.set_records(records);
        self
    }

    pub fn set_records(&self, records: Vec<Value>) {
        let parsed = records
            .into_iter()
            .map(|v| Record::from_value(v, &self.inner.id_field).expect("stub record without id"))
            .collect();
        *self.inner.records.lock() = parsed;
    }

    /// Server-side shallow merge, as another client would do
    pub fn server_patch(&self, id: &str, patch: Value) {
        let mut records = self.inner.records.lock();
        if let (Some(record), Some(patch)) = (records.iter_mut().find(|r| r.id() == id), patch.as_object()) {
            record.apply_patch(patch);
        }
    }

    pub fn server_record(&self, id: &str) -> Option<Record> {
        self.inner.records.lock().iter().find(|r| r.id() == id).cloned()
    }

    pub fn fetch_calls(&self) -> usize {
        self.inner.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.inner.update_calls.load(Ordering::SeqCst)
    }

    pub fn hold_fetches(&self) {
        self.inner.fetch_gate.send_replace(false);
    }

    pub fn release_fetches(&self) {
        self.inner.fetch_gate.send_replace(true);
    }

    pub fn hold_mutations(&self) {
        self.inner.mutation_gate.send_replace(false);
    }

    pub fn release_mutations(&self) {
        self.inner.mutation_gate.send_replace(true);
    }

    pub fn fail_next_fetch(&self, error: SyncError) {
        self.inner.fetch_failures.lock().push_back(error);
    }

    pub fn fail_next_update(&self, error: SyncError) {
        self.inner.update_failures.lock().push_back(error);
    }

    async fn pass(gate: &watch::Sender<bool>) {
        let mut rx = gate.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl RemoteResource for StubResource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn id_field(&self) -> &str {
        &self.inner.id_field
    }

    async fn fetch_all(&self, _query: &Query) -> Result<Page, SyncError> {
        self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Self::pass(&self.inner.fetch_gate).await;
        if let Some(err) = self.inner.fetch_failures.lock().pop_front() {
            return Err(err);
        }
        let records = self.inner.records.lock().clone();
        Ok(Page {
            records,
            pagination: None,
        })
    }

    async fn create(&self, payload: &Fields) -> Result<MutationAck, SyncError> {
        Self::pass(&self.inner.mutation_gate).await;
        let mut fields = payload.clone();
        if !fields.contains_key(&self.inner.id_field) {
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            fields.insert(self.inner.id_field.clone(), Value::String(format!("new-{id}")));
        }
        let record = Record::from_value(Value::Object(fields), &self.inner.id_field)?;
        let mut records = self.inner.records.lock();
        records.retain(|r| r.id() != record.id());
        records.push(record.clone());
        Ok(MutationAck::Record(record))
    }

    async fn update(&self, id: &str, patch: &Fields) -> Result<MutationAck, SyncError> {
        self.inner.update_calls.fetch_add(1, Ordering::SeqCst);
        Self::pass(&self.inner.mutation_gate).await;
        if let Some(err) = self.inner.update_failures.lock().pop_front() {
            return Err(err);
        }
        let mut records = self.inner.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        record.apply_patch(patch);
        Ok(MutationAck::Record(record.clone()))
    }

    async fn remove(&self, id: &str) -> Result<(), SyncError> {
        Self::pass(&self.inner.mutation_gate).await;
        let mut records = self.inner.records.lock();
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Err(SyncError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_held_fetch_reads_data_at_release() {
        let stub = StubResource::new("areas", "area_id")
            .with_records(vec![json!({"area_id": "A1", "current_visitors": 1})]);
        stub.hold_fetches();

        let pending = tokio::spawn({
            let stub = stub.clone();
            async move { stub.fetch_all(&Query::new()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stub.fetch_calls(), 1);
        assert!(!pending.is_finished());

        stub.server_patch("A1", json!({"current_visitors": 2}));
        stub.release_fetches();
        let page = pending.await.unwrap().unwrap();
        assert_eq!(page.records[0].f64_field("current_visitors"), Some(2.0));
    }

    #[tokio::test]
    async fn test_remove_twice() {
        let stub = StubResource::new("tourists", "tourist_id")
            .with_records(vec![json!({"tourist_id": "T1"})]);
        stub.remove("T1").await.unwrap();
        assert_eq!(stub.remove("T1").await, Err(SyncError::NotFound("T1".into())));
    }
}
