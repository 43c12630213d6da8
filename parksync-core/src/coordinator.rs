//! Optimistic mutations
//!
//! `submit` patches the cached record before any network traffic and hands
//! back a ticket. The update request runs in its own task under the
//! configured timeout; its response settles the mutation in the resource's
//! `SyncState` (confirm, roll back, or leave it to the next poll).

use crate::error::SyncError;
use crate::models::{Fields, MutationAck};
use crate::resource::RemoteResource;
use crate::store::Settlement;
use crate::sync::SyncedResource;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Confirmed(MutationAck),
    /// Rolled back; the error is the server's, verbatim
    Rejected(SyncError),
    /// Timed out; the next poll decides what the record looks like
    Unknown(SyncError),
}

impl MutationOutcome {
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            MutationOutcome::Confirmed(_) => None,
            MutationOutcome::Rejected(e) | MutationOutcome::Unknown(e) => Some(e),
        }
    }
}

pub struct MutationTicket {
    pub mutation_id: Uuid,
    pub target_id: String,
    outcome: oneshot::Receiver<MutationOutcome>,
}

impl MutationTicket {
    /// Waits for the response. A dropped coordinator task reads as an unknown outcome.
    pub async fn outcome(self) -> MutationOutcome {
        self.outcome.await.unwrap_or_else(|_| {
            MutationOutcome::Unknown(SyncError::network("mutation task ended without a response"))
        })
    }
}

pub struct OptimisticMutationCoordinator<R> {
    synced: SyncedResource<R>,
    timeout: Duration,
}

impl<R: RemoteResource> OptimisticMutationCoordinator<R> {
    pub fn new(synced: SyncedResource<R>, timeout: Duration) -> Self {
        Self { synced, timeout }
    }

    pub fn resource(&self) -> &SyncedResource<R> {
        &self.synced
    }

    /// Applies `patch` locally and returns at once; the request runs in the background.
    /// Fails with `NotFound` if `target_id` is not cached.
    pub fn submit(&self, target_id: &str, patch: Fields) -> Result<MutationTicket, SyncError> {
        let mutation_id = self.synced.update_state(|state| {
            state.begin_mutation(target_id, patch.clone(), OffsetDateTime::now_utc())
        })?;
        debug!(
            "[{}] mutation {mutation_id} applied locally to {target_id}",
            self.synced.name()
        );

        let (tx, rx) = oneshot::channel();
        let synced = self.synced.clone();
        let timeout = self.timeout;
        let target = target_id.to_string();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, synced.remote().update(&target, &patch)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::timed_out(format!(
                    "update of {target} did not complete within {timeout:?}"
                ))),
            };
            let settlement = synced.update_state(|state| state.settle(mutation_id, &result));
            let outcome = match (settlement, result) {
                (_, Ok(ack)) => MutationOutcome::Confirmed(ack),
                (Settlement::Unknown, Err(e)) => MutationOutcome::Unknown(e),
                (_, Err(e)) if e.is_outcome_unknown() => MutationOutcome::Unknown(e),
                (_, Err(e)) => MutationOutcome::Rejected(e),
            };
            if let MutationOutcome::Confirmed(_) = outcome {
                info!("[{}] mutation {mutation_id} on {target} confirmed", synced.name());
            }
            let _ = tx.send(outcome);
        });

        Ok(MutationTicket {
            mutation_id,
            target_id: target_id.to_string(),
            outcome: rx,
        })
    }

    /// Number of mutations still awaiting a response or the next poll
    pub fn in_flight(&self) -> usize {
        self.synced.with_state(|state| state.pending().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Page, Query, Record};
    use serde_json::json;

    /// Rejects any patch touching `daily_capacity` below 1
    struct Areas;

    impl RemoteResource for Areas {
        fn name(&self) -> &str {
            "flow-control"
        }

        fn id_field(&self) -> &str {
            "area_id"
        }

        async fn fetch_all(&self, _query: &Query) -> Result<Page, SyncError> {
            let record = Record::from_value(
                json!({"area_id": "A1", "daily_capacity": 800, "current_visitors": 100}),
                "area_id",
            )?;
            Ok(Page { records: vec![record], pagination: None })
        }

        async fn create(&self, _payload: &Fields) -> Result<MutationAck, SyncError> {
            unimplemented!()
        }

        async fn update(&self, _id: &str, patch: &Fields) -> Result<MutationAck, SyncError> {
            match patch.get("daily_capacity").and_then(|v| v.as_f64()) {
                Some(c) if c < 1.0 => Err(SyncError::Api { status: 400, message: "容量必须大于0".into() }),
                _ => Ok(MutationAck::Acknowledged { id: None, message: Some("更新成功".into()) }),
            }
        }

        async fn remove(&self, _id: &str) -> Result<(), SyncError> {
            unimplemented!()
        }
    }

    async fn coordinator() -> OptimisticMutationCoordinator<Areas> {
        let synced = SyncedResource::new(Areas, Duration::from_secs(30));
        synced.refresh(&Query::new()).await.unwrap();
        OptimisticMutationCoordinator::new(synced, Duration::from_secs(5))
    }

    fn patch(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_submit_is_visible_before_response() {
        let coordinator = coordinator().await;
        let ticket = coordinator.submit("A1", patch(json!({"daily_capacity": 900}))).unwrap();
        let local = coordinator.resource().get("A1").unwrap();
        assert_eq!(local.f64_field("daily_capacity"), Some(900.0));

        assert!(matches!(ticket.outcome().await, MutationOutcome::Confirmed(_)));
        assert_eq!(coordinator.in_flight(), 0);
        let after = coordinator.resource().get("A1").unwrap();
        assert_eq!(after.f64_field("daily_capacity"), Some(900.0));
    }

    #[tokio::test]
    async fn test_rejection_rolls_back_and_reports_message() {
        let coordinator = coordinator().await;
        let ticket = coordinator.submit("A1", patch(json!({"daily_capacity": 0}))).unwrap();
        match ticket.outcome().await {
            MutationOutcome::Rejected(err) => assert_eq!(err.message(), "容量必须大于0"),
            other => panic!("expected rejection, got {other:?}"),
        }
        let record = coordinator.resource().get("A1").unwrap();
        assert_eq!(record.f64_field("daily_capacity"), Some(800.0));
    }

    #[tokio::test]
    async fn test_unknown_target_fails_synchronously() {
        let coordinator = coordinator().await;
        let err = coordinator.submit("Z9", patch(json!({"daily_capacity": 1}))).err().unwrap();
        assert_eq!(err, SyncError::NotFound("Z9".into()));
    }
}
