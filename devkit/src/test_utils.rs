/*!
Test harness for sync-layer integration tests

- env_logger initialised once, so core `tracing` events show with RUST_LOG
- a mock park API with the consoles' collections registered
- SyncConfig pointing at it
- polling helpers for conditions reached asynchronously
*/

use crate::fixtures::ParkRecords;
use crate::mock_api::{EnvelopeStyle, MockParkApi};
use anyhow::Result;
use parksync_core::{ResourceConfig, SyncConfig};
use std::time::Duration;

pub struct TestHarness {
    pub api: MockParkApi,
    pub config: SyncConfig,
}

impl TestHarness {
    /// Starts the mock API with the flow-control, logs, tourists, devices,
    /// indicators and environment collections; flow-control is seeded.
    pub async fn new() -> Result<Self> {
        init_logging();
        let api = MockParkApi::start().await?;
        api.add_collection("flow-control", "area_id", EnvelopeStyle::Keyed("flow_control".into()));
        api.add_collection("logs", "log_id", EnvelopeStyle::Keyed("logs".into()));
        api.add_collection("tourists", "tourist_id", EnvelopeStyle::Bare);
        api.add_collection("devices", "device_id", EnvelopeStyle::Keyed("devices".into()));
        api.add_collection("indicators", "indicator_id", EnvelopeStyle::Keyed("indicators".into()));
        api.add_collection("environment-data", "data_id", EnvelopeStyle::Paginated);
        api.seed("flow-control", ParkRecords::five_areas());

        let config = config_for(&api.base_url());
        log::info!("🧰 test harness ready on {}", api.base_url());
        Ok(Self { api, config })
    }

    pub fn resource(&self, name: &str) -> Result<&ResourceConfig> {
        self.config
            .resource(name)
            .ok_or_else(|| anyhow::anyhow!("no resource named {name} in the test config"))
    }
}

pub fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Config matching the collections registered by `TestHarness::new`
pub fn config_for(base_url: &str) -> SyncConfig {
    SyncConfig {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        bearer_token: None,
        max_age: Duration::from_secs(60),
        default_interval: Duration::from_millis(200),
        resources: vec![
            ResourceConfig::new("flow-control", "/flow-control", "area_id").keys(&["flow_control"]),
            ResourceConfig::new("logs", "/logs", "log_id").keys(&["logs"]),
            ResourceConfig::new("tourists", "/tourists", "tourist_id"),
            ResourceConfig::new("devices", "/devices", "device_id").keys(&["devices"]),
            ResourceConfig::new("indicators", "/indicators", "indicator_id").keys(&["indicators"]),
            ResourceConfig::new("environment", "/environment-data", "data_id"),
        ],
        ..SyncConfig::default()
    }
}

/// Polls `condition` every 10 ms until it holds or `timeout_ms` elapses.
pub async fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let met = condition();
    if !met {
        log::warn!("⏰ condition not met within {timeout_ms} ms");
    }
    met
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_serves_seeded_areas() {
        let harness = TestHarness::new().await.unwrap();
        assert_eq!(harness.api.records("flow-control").len(), 5);
        harness.config.validate().unwrap();
        assert!(harness.resource("flow-control").is_ok());
        assert!(harness.resource("nope").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_gives_up() {
        assert!(!wait_until(50, || false).await);
        let mut n = 0;
        assert!(wait_until(1000, || {
            n += 1;
            n > 3
        })
        .await);
    }
}
