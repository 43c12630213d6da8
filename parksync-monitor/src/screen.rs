//! Dashboard screen: owns its scheduler and subscriptions for as long as it lives.

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use parksync_core::{
    ApiClient, DashboardModel, DashboardSources, DerivedFieldComputer, FetchFailure, HttpResource,
    NotificationCenter, PollingScheduler, Query, Refresh, ResourceCache, SubscriptionHandle,
    SyncConfig, SyncedResource,
};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct Screen {
    resources: BTreeMap<String, SyncedResource<HttpResource>>,
    scheduler: PollingScheduler,
    subscriptions: Vec<SubscriptionHandle>,
    computer: DerivedFieldComputer,
    pub notifications: NotificationCenter,
}

impl Screen {
    /// Builds the screen's resources without starting any timers.
    pub fn open(config: &SyncConfig) -> Result<(Self, mpsc::UnboundedReceiver<FetchFailure>)> {
        let client = ApiClient::new(config).context("Failed to build API client")?;
        let (scheduler, failures) = PollingScheduler::new(config.timeout);

        let resources: BTreeMap<_, _> = config
            .resources
            .iter()
            .map(|rc| {
                let synced = SyncedResource::new(client.resource(rc), config.max_age);
                (rc.name.clone(), synced)
            })
            .collect();

        info!("Screen opened: {} resources at {}", resources.len(), client.base_url());
        let screen = Self {
            resources,
            scheduler,
            subscriptions: Vec::new(),
            computer: DerivedFieldComputer::new(config.derive_config()),
            notifications: NotificationCenter::new(),
        };
        Ok((screen, failures))
    }

    /// Opens the screen and subscribes every resource at its configured interval.
    pub fn mount(config: &SyncConfig) -> Result<(Self, mpsc::UnboundedReceiver<FetchFailure>)> {
        let (mut screen, failures) = Self::open(config)?;
        for rc in &config.resources {
            if let Some(synced) = screen.resources.get(&rc.name) {
                let handle = screen
                    .scheduler
                    .subscribe(synced.clone(), config.interval_for(rc), Query::new());
                screen.subscriptions.push(handle);
            }
        }
        info!("Screen mounted: {} subscriptions", screen.subscriptions.len());
        Ok((screen, failures))
    }

    /// Fetches every resource once; a resource whose poll is still pending is left to it.
    pub async fn refresh_all(&mut self) {
        let now = OffsetDateTime::now_utc();
        for (name, synced) in &self.resources {
            let action = NotificationCenter::fetch_action(name);
            match synced.refresh(&Query::new()).await {
                Ok(Refresh::Applied) => self.notifications.resolve(&action),
                Ok(Refresh::Busy) => debug!("{name} already being fetched"),
                Err(e) => {
                    warn!("Initial fetch of {name} failed: {e}");
                    self.notifications.push(action, &e, now);
                }
            }
        }
    }

    /// Name of the resource whose cache changed, one item per change
    pub fn changes(&self) -> BoxStream<'static, String> {
        let streams = self.resources.iter().map(|(name, synced)| {
            let name = name.clone();
            stream::unfold(synced.changes(), move |mut rx| {
                let name = name.clone();
                async move {
                    rx.changed().await.ok()?;
                    Some((name, rx))
                }
            })
            .boxed()
        });
        stream::select_all(streams).boxed()
    }

    pub fn on_failure(&mut self, failure: FetchFailure) {
        if failure.error.is_unauthorized() {
            error!(
                "{}: token rejected by the server, set PARKSYNC_TOKEN",
                failure.resource
            );
        }
        self.notifications.push(
            NotificationCenter::fetch_action(&failure.resource),
            &failure.error,
            failure.at,
        );
    }

    pub fn on_change(&mut self, resource: &str) {
        self.notifications
            .resolve(&NotificationCenter::fetch_action(resource));
    }

    pub fn dashboard(&self) -> DashboardModel {
        let snapshot = |name: &str| -> Option<ResourceCache> {
            self.resources.get(name).map(SyncedResource::snapshot)
        };
        let areas = snapshot("flow-control").or_else(|| snapshot("realtime"));
        let logs = snapshot("logs");
        let devices = snapshot("devices");
        let readings = snapshot("environment");
        let indicators = snapshot("indicators");

        DashboardModel::compute(
            DashboardSources {
                areas: areas.as_ref(),
                logs: logs.as_ref(),
                devices: devices.as_ref(),
                readings: readings.as_ref(),
                indicators: indicators.as_ref(),
            },
            &self.computer,
            OffsetDateTime::now_utc(),
        )
    }

    pub fn unmount(mut self) {
        for handle in self.subscriptions.drain(..) {
            self.scheduler.unsubscribe(&handle);
        }
        info!("Screen unmounted");
    }
}
