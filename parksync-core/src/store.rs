/*
 * RESOURCE CACHE & RECONCILIATION
 *
 * One SyncState per resource, owned by its SyncedResource behind a mutex.
 * It holds:
 *   - the displayed cache (ordered records, last fetch time)
 *   - the pending mutations, in submission order
 *   - the last known-good server copy of every record under edit
 *
 * Rules:
 *   - a poll never overwrites a record that has a mutation still pending;
 *     it only refreshes that record's known-good copy
 *   - a rejected mutation restores known-good, then replays whatever is
 *     still pending for the same record
 *   - confirmed and timed-out mutations keep the local patch until the
 *     next poll replaces it
 *   - resolved mutations leave the pending set immediately and are never retried
 */

use crate::error::SyncError;
use crate::models::{Fields, MutationAck, MutationState, Page, Pagination, PendingMutation, Record};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

const RESOLVED_HISTORY: usize = 32;

/// Ordered cached copy of one endpoint's records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceCache {
    name: String,
    records: Vec<Record>,
    last_fetched_at: Option<OffsetDateTime>,
    #[serde(skip)]
    max_age: Duration,
    pagination: Option<Pagination>,
}

impl ResourceCache {
    pub fn new(name: impl Into<String>, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
            last_fetched_at: None,
            max_age,
            pagination: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_fetched_at(&self) -> Option<OffsetDateTime> {
        self.last_fetched_at
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    /// Never fetched, or older than the configured max age
    pub fn is_stale_at(&self, now: OffsetDateTime) -> bool {
        match self.last_fetched_at {
            Some(at) => now > at + self.max_age,
            None => true,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(OffsetDateTime::now_utc())
    }

    pub(crate) fn upsert(&mut self, record: Record) {
        match self.records.iter_mut().find(|r| r.id() == record.id()) {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id() != id);
        before != self.records.len()
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.iter_mut().find(|r| r.id() == id)
    }
}

/// What became of a settled mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Confirmed,
    RolledBack,
    Unknown,
    /// Already resolved (by a poll, or a second response)
    Stale,
}

#[derive(Debug)]
pub struct SyncState {
    cache: ResourceCache,
    pending: Vec<PendingMutation>,
    known_good: HashMap<String, Record>,
    resolved: VecDeque<PendingMutation>,
}

impl SyncState {
    pub fn new(name: impl Into<String>, max_age: Duration) -> Self {
        Self {
            cache: ResourceCache::new(name, max_age),
            pending: Vec::new(),
            known_good: HashMap::new(),
            resolved: VecDeque::new(),
        }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Mutations still awaiting a response, or awaiting the next poll after a timeout
    pub fn pending(&self) -> &[PendingMutation] {
        &self.pending
    }

    /// Recently resolved mutations, newest last
    pub fn resolved(&self) -> impl Iterator<Item = &PendingMutation> {
        self.resolved.iter()
    }

    pub fn has_pending(&self, target_id: &str) -> bool {
        self.pending
            .iter()
            .any(|m| m.target_id == target_id && m.state == MutationState::Pending)
    }

    /// Applies `patch` locally and records it as pending.
    pub fn begin_mutation(
        &mut self,
        target_id: &str,
        patch: Fields,
        now: OffsetDateTime,
    ) -> Result<Uuid, SyncError> {
        let record = self
            .cache
            .get_mut(target_id)
            .ok_or_else(|| SyncError::NotFound(target_id.to_string()))?;
        if !self.known_good.contains_key(target_id) {
            self.known_good.insert(target_id.to_string(), record.clone());
        }
        record.apply_patch(&patch);

        let mutation_id = Uuid::new_v4();
        self.pending.push(PendingMutation {
            mutation_id,
            target_id: target_id.to_string(),
            patch,
            submitted_at: now,
            state: MutationState::Pending,
        });
        Ok(mutation_id)
    }

    /// Resolves a mutation from its direct response.
    pub fn settle(
        &mut self,
        mutation_id: Uuid,
        result: &Result<MutationAck, SyncError>,
    ) -> Settlement {
        let Some(index) = self
            .pending
            .iter()
            .position(|m| m.mutation_id == mutation_id && m.state == MutationState::Pending)
        else {
            debug!(
                "[{}] response for mutation {mutation_id} arrived after it was resolved",
                self.cache.name
            );
            return Settlement::Stale;
        };

        match result {
            Ok(ack) => {
                let mut mutation = self.pending.remove(index);
                mutation.state = MutationState::Confirmed;
                self.confirm_known_good(&mutation, ack.record());
                self.retire(mutation);
                Settlement::Confirmed
            }
            Err(err) if err.is_outcome_unknown() => {
                // Kept in the pending set, but no longer shields the record from polls
                self.pending[index].state = MutationState::Unknown;
                debug!(
                    "[{}] mutation {mutation_id} timed out, waiting for the next poll",
                    self.cache.name
                );
                Settlement::Unknown
            }
            Err(err) => {
                let mut mutation = self.pending.remove(index);
                mutation.state = MutationState::Rejected;
                warn!(
                    "[{}] mutation {mutation_id} on {} rejected ({}): rolling back",
                    self.cache.name,
                    mutation.target_id,
                    err.kind()
                );
                if matches!(err, SyncError::NotFound(_)) {
                    self.cache.remove(&mutation.target_id);
                    self.known_good.remove(&mutation.target_id);
                    self.pending.retain(|m| m.target_id != mutation.target_id);
                } else {
                    self.rollback(&mutation.target_id);
                }
                self.retire(mutation);
                Settlement::RolledBack
            }
        }
    }

    /// Replaces the cache with authoritative data, shielding records with a
    /// mutation still in flight.
    pub fn apply_poll(&mut self, page: Page, at: OffsetDateTime) {
        let unknown: Vec<_> = self
            .pending
            .iter()
            .filter(|m| m.state == MutationState::Unknown)
            .map(|m| m.mutation_id)
            .collect();
        for mutation_id in unknown {
            if let Some(index) = self.pending.iter().position(|m| m.mutation_id == mutation_id) {
                let mutation = self.pending.remove(index);
                debug!(
                    "[{}] poll resolved timed-out mutation {mutation_id} on {}",
                    self.cache.name, mutation.target_id
                );
                self.retire(mutation);
            }
        }

        let mut shielded: Vec<Record> = self
            .cache
            .records
            .iter()
            .filter(|r| self.has_pending(r.id()))
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(page.records.len() + shielded.len());
        for incoming in page.records {
            match shielded.iter().position(|r| r.id() == incoming.id()) {
                Some(pos) => {
                    records.push(shielded.remove(pos));
                    self.known_good.insert(incoming.id().to_string(), incoming);
                }
                None => records.push(incoming),
            }
        }
        // Under edit but absent from this page: keep showing the local copy
        records.extend(shielded);

        self.known_good.retain(|id, _| {
            self.pending.iter().any(|m| &m.target_id == id)
        });
        self.cache.records = records;
        self.cache.pagination = page.pagination;
        self.cache.last_fetched_at = Some(at);
    }

    pub(crate) fn insert(&mut self, record: Record) {
        self.cache.upsert(record);
    }

    /// Drops a record and every trace of local edits on it.
    pub(crate) fn forget(&mut self, id: &str) -> bool {
        self.known_good.remove(id);
        let resolved: Vec<_> = {
            let (gone, kept) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|m| m.target_id == id);
            self.pending = kept;
            gone
        };
        for mut mutation in resolved {
            mutation.state = MutationState::Rejected;
            self.retire(mutation);
        }
        self.cache.remove(id)
    }

    fn confirm_known_good(&mut self, mutation: &PendingMutation, returned: Option<&Record>) {
        let target = mutation.target_id.as_str();
        match returned {
            Some(record) if record.id() == target => {
                self.known_good.insert(target.to_string(), record.clone());
            }
            _ => {
                if let Some(base) = self.known_good.get_mut(target) {
                    base.apply_patch(&mutation.patch);
                }
            }
        }
        if !self.pending.iter().any(|m| m.target_id == target) {
            self.known_good.remove(target);
        }
    }

    fn rollback(&mut self, target_id: &str) {
        let Some(base) = self.known_good.get(target_id).cloned() else {
            return;
        };
        let mut restored = base;
        for mutation in self.pending.iter().filter(|m| m.target_id == target_id) {
            restored.apply_patch(&mutation.patch);
        }
        if let Some(slot) = self.cache.get_mut(target_id) {
            *slot = restored;
        }
        if !self.pending.iter().any(|m| m.target_id == target_id) {
            self.known_good.remove(target_id);
        }
    }

    fn retire(&mut self, mutation: PendingMutation) {
        if self.resolved.len() == RESOLVED_HISTORY {
            self.resolved.pop_front();
        }
        self.resolved.push_back(mutation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    fn area(id: &str, visitors: u64) -> Record {
        Record::from_value(
            json!({"area_id": id, "current_visitors": visitors, "daily_capacity": 800}),
            "area_id",
        )
        .unwrap()
    }

    fn page(records: Vec<Record>) -> Page {
        Page { records, pagination: None }
    }

    fn patch(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn seeded() -> SyncState {
        let mut state = SyncState::new("areas", Duration::from_secs(30));
        state.apply_poll(page(vec![area("A1", 100), area("A2", 200)]), T0);
        state
    }

    fn visitors(state: &SyncState, id: &str) -> Option<f64> {
        state.cache().get(id).and_then(|r| r.f64_field("current_visitors"))
    }

    #[test]
    fn test_staleness() {
        let state = seeded();
        assert!(!state.cache().is_stale_at(T0 + Duration::from_secs(30)));
        assert!(state.cache().is_stale_at(T0 + Duration::from_secs(31)));
        assert!(ResourceCache::new("empty", Duration::from_secs(30)).is_stale_at(T0));
    }

    #[test]
    fn test_submit_against_unknown_id() {
        let mut state = seeded();
        let err = state.begin_mutation("A9", patch(json!({"current_visitors": 1})), T0).unwrap_err();
        assert_eq!(err, SyncError::NotFound("A9".into()));
        assert!(state.pending().is_empty());
    }

    #[test]
    fn test_poll_does_not_overwrite_pending_edit() {
        let mut state = seeded();
        state.begin_mutation("A1", patch(json!({"current_visitors": 150})), T0).unwrap();

        state.apply_poll(page(vec![area("A1", 101), area("A2", 210)]), T0);
        assert_eq!(visitors(&state, "A1"), Some(150.0));
        assert_eq!(visitors(&state, "A2"), Some(210.0));
    }

    #[test]
    fn test_rejection_restores_latest_server_value() {
        let mut state = seeded();
        let id = state.begin_mutation("A1", patch(json!({"current_visitors": 150})), T0).unwrap();
        state.apply_poll(page(vec![area("A1", 120), area("A2", 200)]), T0);

        let outcome = state.settle(id, &Err(SyncError::Api { status: 500, message: "boom".into() }));
        assert_eq!(outcome, Settlement::RolledBack);
        assert_eq!(visitors(&state, "A1"), Some(120.0));
        assert!(state.pending().is_empty());
        assert_eq!(state.resolved().last().unwrap().state, MutationState::Rejected);
    }

    #[test]
    fn test_rejection_replays_other_pending_edits() {
        let mut state = seeded();
        let first = state
            .begin_mutation("A1", patch(json!({"current_visitors": 150})), T0)
            .unwrap();
        state
            .begin_mutation("A1", patch(json!({"status": "closed"})), T0)
            .unwrap();

        state.settle(first, &Err(SyncError::network("refused")));
        let record = state.cache().get("A1").unwrap();
        assert_eq!(record.f64_field("current_visitors"), Some(100.0));
        assert_eq!(record.str_field("status"), Some("closed"));
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn test_confirmed_edit_stays_until_next_poll() {
        let mut state = seeded();
        let id = state.begin_mutation("A1", patch(json!({"current_visitors": 150})), T0).unwrap();
        let outcome = state.settle(id, &Ok(MutationAck::Acknowledged { id: None, message: None }));
        assert_eq!(outcome, Settlement::Confirmed);
        assert_eq!(visitors(&state, "A1"), Some(150.0));
        assert!(state.pending().is_empty());

        state.apply_poll(page(vec![area("A1", 151), area("A2", 200)]), T0);
        assert_eq!(visitors(&state, "A1"), Some(151.0));
    }

    #[test]
    fn test_timeout_is_resolved_by_next_poll() {
        let mut state = seeded();
        let id = state.begin_mutation("A1", patch(json!({"current_visitors": 150})), T0).unwrap();
        assert_eq!(state.settle(id, &Err(SyncError::timed_out("deadline"))), Settlement::Unknown);
        assert_eq!(visitors(&state, "A1"), Some(150.0));
        assert_eq!(state.pending()[0].state, MutationState::Unknown);

        state.apply_poll(page(vec![area("A1", 100), area("A2", 200)]), T0);
        assert_eq!(visitors(&state, "A1"), Some(100.0));
        assert!(state.pending().is_empty());
        assert_eq!(state.settle(id, &Ok(MutationAck::Acknowledged { id: None, message: None })), Settlement::Stale);
    }

    #[test]
    fn test_shielded_record_missing_from_poll_is_kept() {
        let mut state = seeded();
        state.begin_mutation("A2", patch(json!({"current_visitors": 5})), T0).unwrap();
        state.apply_poll(page(vec![area("A1", 100)]), T0);
        let ids: Vec<_> = state.cache().records().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, ["A1", "A2"]);
    }

    #[test]
    fn test_not_found_rejection_drops_record() {
        let mut state = seeded();
        let id = state.begin_mutation("A2", patch(json!({"current_visitors": 5})), T0).unwrap();
        state.settle(id, &Err(SyncError::NotFound("A2".into())));
        assert!(!state.cache().contains("A2"));
    }

    #[test]
    fn test_forget_clears_pending() {
        let mut state = seeded();
        state.begin_mutation("A1", patch(json!({"current_visitors": 5})), T0).unwrap();
        assert!(state.forget("A1"));
        assert!(!state.forget("A1"));
        assert!(state.pending().is_empty());
    }
}
