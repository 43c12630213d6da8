//! ParkSync Monitor - headless park console
//!
//! Polls the configured park/ecological resources and logs the dashboard
//! view model every time one of them changes:
//! - visitor totals, peak area and capacity status counts
//! - alert counts by level, with the latest entries
//! - device status and abnormal environment readings
//!
//! `--once` fetches everything a single time and prints the dashboard as JSON.

mod screen;

use anyhow::{Context, Result};
use futures::StreamExt;
use parksync_core::{DashboardModel, SyncConfig};
use screen::Screen;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parksync_core=info,parksync_monitor=info")),
        )
        .init();

    let once = std::env::args().any(|a| a == "--once");
    let config = SyncConfig::load().context("Failed to load parksync configuration")?;
    info!(
        "ParkSync Monitor v{} - {} resources",
        env!("CARGO_PKG_VERSION"),
        config.resources.len()
    );

    if once {
        return run_once(&config).await;
    }

    let (mut screen, mut failures) = Screen::mount(&config)?;
    let mut changes = screen.changes();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            Some(failure) = failures.recv() => {
                warn!(
                    "{} unavailable ({}), showing last known data: {}",
                    failure.resource,
                    failure.error.kind(),
                    failure.error.message()
                );
                screen.on_failure(failure);
            }
            Some(resource) = changes.next() => {
                screen.on_change(&resource);
                report(&screen.dashboard());
            }
        }
    }

    screen.unmount();
    Ok(())
}

async fn run_once(config: &SyncConfig) -> Result<()> {
    let (mut screen, _failures) = Screen::open(config)?;
    screen.refresh_all().await;
    let model = screen.dashboard();
    println!(
        "{}",
        serde_json::to_string_pretty(&model).context("Failed to serialize dashboard")?
    );
    for note in screen.notifications.active() {
        warn!("[{}] {}: {}", note.kind, note.action, note.message);
    }
    screen.unmount();
    Ok(())
}

fn report(model: &DashboardModel) {
    let flow = &model.flow;
    info!(
        "visitors {}/{} | avg usage {}% | peak {} | alerts {} ({} in the last window)",
        flow.total_visitors,
        flow.total_capacity,
        flow.average_usage,
        flow.peak_area
            .as_ref()
            .map(|a| a.name.clone().unwrap_or_else(|| a.area_id.clone()))
            .unwrap_or_else(|| "-".to_string()),
        model.alert_count(),
        model.alerts.recent_count
    );
    for area in &flow.top_areas {
        let capacity = area.capacity.map_or_else(|| "-".to_string(), |c| c.to_string());
        match &area.derived {
            Some(derived) => info!(
                "  {:<12} {:>6} / {:<6} {:>3}% {}",
                area.area_id,
                area.visitors,
                capacity,
                derived.usage_percent,
                derived.status.as_str()
            ),
            None => info!("  {:<12} {:>6} / {:<6} no capacity set", area.area_id, area.visitors, capacity),
        }
    }
    if model.devices.total > 0 {
        info!("devices: {:?}", model.devices.by_status);
    }
    if model.environment.abnormal > 0 {
        warn!(
            "{} of {} environment readings out of bounds",
            model.environment.abnormal, model.environment.total
        );
    }
    for section in model.sections.iter().filter(|s| s.stale) {
        warn!("{} is stale ({} records shown)", section.resource, section.records);
    }
}
