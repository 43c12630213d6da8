/*
 * POLLING SCHEDULER
 *
 * One ticker task per subscription:
 *
 *   idle -> scheduled -> fetching -> scheduled -> ...   (loops)
 *                  \__________\____________________ -> cancelled (terminal)
 *
 * - the first fetch happens on subscribe, then every `interval`
 * - a tick that finds a fetch of the same resource unresolved is skipped
 *   and logged as backpressure; no second request, no queue. The fetch may
 *   belong to this subscription, another one, or a manual refresh
 * - fetch errors go to the scheduler's error channel, the loop keeps going
 * - cancel() is synchronous: the timer stops and a fetch already in flight
 *   is allowed to finish but its result is dropped
 *
 * The in-flight fetch runs as its own task so the ticker keeps observing
 * ticks while it waits.
 */

use crate::error::SyncError;
use crate::models::Query;
use crate::resource::RemoteResource;
use crate::sync::{FetchSlot, SyncedResource};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Idle,
    Scheduled,
    Fetching,
    Cancelled,
}

/// Reported on the scheduler's error channel; the subscription stays scheduled
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub subscription: u64,
    pub resource: String,
    pub error: SyncError,
    pub at: OffsetDateTime,
}

struct Subscription {
    id: u64,
    resource: String,
    state: Mutex<SubscriptionState>,
    skipped_ticks: AtomicU64,
    fetches: AtomicU64,
    ticker: Mutex<Option<AbortHandle>>,
}

impl Subscription {
    fn cancel(&self) {
        let mut state = self.state.lock();
        if *state == SubscriptionState::Cancelled {
            return;
        }
        *state = SubscriptionState::Cancelled;
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        info!("[{}] subscription {} cancelled", self.resource, self.id);
    }

    fn is_cancelled(&self) -> bool {
        *self.state.lock() == SubscriptionState::Cancelled
    }
}

/// A screen's registration; dropping it unsubscribes
pub struct SubscriptionHandle {
    shared: Arc<Subscription>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn resource(&self) -> &str {
        &self.shared.resource
    }

    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.lock()
    }

    /// Ticks skipped because a fetch of the resource had not resolved
    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped_ticks.load(Ordering::SeqCst)
    }

    /// Fetches actually started
    pub fn fetch_count(&self) -> u64 {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

pub struct PollingScheduler {
    fetch_timeout: Duration,
    errors: mpsc::UnboundedSender<FetchFailure>,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl PollingScheduler {
    /// Floor for subscription intervals; tokio intervals cannot be zero.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Returns the scheduler and the receiving end of its error channel.
    pub fn new(fetch_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<FetchFailure>) {
        let (errors, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            fetch_timeout,
            errors,
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        };
        (scheduler, rx)
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Starts polling `synced` every `interval`, fetching immediately.
    pub fn subscribe<R: RemoteResource>(
        &self,
        synced: SyncedResource<R>,
        interval: Duration,
        query: Query,
    ) -> SubscriptionHandle {
        let interval = if interval < Self::MIN_INTERVAL {
            warn!(
                "[{}] polling interval {:?} below minimum, using {:?}",
                synced.name(),
                interval,
                Self::MIN_INTERVAL
            );
            Self::MIN_INTERVAL
        } else {
            interval
        };
        let shared = Arc::new(Subscription {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            resource: synced.name().to_string(),
            state: Mutex::new(SubscriptionState::Idle),
            skipped_ticks: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            ticker: Mutex::new(None),
        });

        let poller = Poller {
            shared: shared.clone(),
            synced,
            query,
            fetch_timeout: self.fetch_timeout,
            errors: self.errors.clone(),
        };

        {
            // Holding the state lock keeps a concurrent cancel from racing the registration
            let mut state = shared.state.lock();
            *state = SubscriptionState::Scheduled;
            let task = tokio::spawn(poller.run(interval));
            *shared.ticker.lock() = Some(task.abort_handle());
        }

        info!(
            "[{}] subscription {} scheduled every {:?}",
            shared.resource, shared.id, interval
        );
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|s| !s.is_cancelled());
        subscriptions.push(shared.clone());
        SubscriptionHandle { shared }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.cancel();
        self.subscriptions.lock().retain(|s| s.id != handle.id());
    }

    pub fn unsubscribe_all(&self) {
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.cancel();
        }
    }

    pub fn active(&self) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| !s.is_cancelled())
            .count()
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

struct Poller<R> {
    shared: Arc<Subscription>,
    synced: SyncedResource<R>,
    query: Query,
    fetch_timeout: Duration,
    errors: mpsc::UnboundedSender<FetchFailure>,
}

impl<R: RemoteResource> Poller<R> {
    async fn run(self, interval: Duration) {
        let poller = Arc::new(self);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if poller.shared.is_cancelled() {
                break;
            }
            let Some(slot) = poller.synced.try_begin_fetch() else {
                let skipped = poller.shared.skipped_ticks.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    "[{}] backpressure: previous fetch still running, tick skipped ({skipped} so far)",
                    poller.shared.resource
                );
                continue;
            };
            {
                let mut state = poller.shared.state.lock();
                if *state == SubscriptionState::Cancelled {
                    break;
                }
                *state = SubscriptionState::Fetching;
            }
            poller.shared.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(poller.clone().fetch_once(slot));
        }
    }

    async fn fetch_once(self: Arc<Self>, slot: FetchSlot<R>) {
        let result = match tokio::time::timeout(
            self.fetch_timeout,
            self.synced.remote().fetch_all(&self.query),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::timed_out(format!(
                "fetch did not complete within {:?}",
                self.fetch_timeout
            ))),
        };

        {
            let mut state = self.shared.state.lock();
            if *state == SubscriptionState::Cancelled {
                debug!(
                    "[{}] late response after unsubscribe discarded",
                    self.shared.resource
                );
            } else {
                match result {
                    Ok(page) => self.synced.apply_poll(page),
                    Err(error) => {
                        warn!(
                            "[{}] fetch failed ({}): {}",
                            self.shared.resource,
                            error.kind(),
                            error.message()
                        );
                        let _ = self.errors.send(FetchFailure {
                            subscription: self.shared.id,
                            resource: self.shared.resource.clone(),
                            error,
                            at: OffsetDateTime::now_utc(),
                        });
                    }
                }
                *state = SubscriptionState::Scheduled;
            }
        }
        drop(slot);
    }
}
