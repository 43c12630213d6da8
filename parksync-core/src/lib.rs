/*!
# ParkSync Core - polling sync layer for the park consoles

Keeps dashboard views consistent with a periodically changing JSON API:
- `RemoteResource`: one HTTP collection, envelopes normalized at the boundary
- `PollingScheduler`: per-subscription timers, no overlapping fetches
- `OptimisticMutationCoordinator`: local-first edits reconciled with polls
- `DerivedFieldComputer` / `aggregate`: pure display fields and screen statistics

Data flow: tick -> fetch -> cache -> derived fields -> view model.
*/

pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod derive;
pub mod envelope;
pub mod error;
pub mod models;
pub mod notify;
pub mod resource;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use aggregate::{AlertSummary, DashboardModel, DashboardSources, DeviceSummary, EnvironmentSummary, FlowOverview};
pub use config::{ConfigError, ResourceConfig, SyncConfig};
pub use coordinator::{MutationOutcome, MutationTicket, OptimisticMutationCoordinator};
pub use derive::{AlertLevel, BoundStatus, CapacityStatus, DeriveConfig, DerivedFieldComputer};
pub use error::{ErrorKind, SyncError};
pub use models::{Fields, MutationAck, MutationState, Page, Pagination, PendingMutation, Query, Record};
pub use notify::{Notification, NotificationCenter};
pub use resource::{ApiClient, HttpResource, RemoteResource};
pub use scheduler::{FetchFailure, PollingScheduler, SubscriptionHandle, SubscriptionState};
pub use store::ResourceCache;
pub use sync::{Refresh, SyncedResource};
