//! Dashboard composition from independently polled resources

use parksync_core::{
    ApiClient, CapacityStatus, DashboardModel, DashboardSources, DerivedFieldComputer,
    PollingScheduler, Query, SyncedResource,
};
use parksync_devkit::test_utils::wait_until;
use parksync_devkit::{ParkRecords, StubResource, TestHarness};
use std::time::Duration;
use time::OffsetDateTime;

#[tokio::test(start_paused = true)]
async fn test_areas_render_while_alerts_are_still_loading() {
    let areas = SyncedResource::new(
        StubResource::new("flow-control", "area_id").with_records(ParkRecords::five_areas()),
        Duration::from_secs(60),
    );
    let logs_stub = StubResource::new("logs", "log_id");
    logs_stub.hold_fetches();
    let logs = SyncedResource::new(logs_stub.clone(), Duration::from_secs(60));

    let (scheduler, _failures) = PollingScheduler::new(Duration::from_secs(30));
    let _areas_sub = scheduler.subscribe(areas.clone(), Duration::from_secs(10), Query::new());
    let _logs_sub = scheduler.subscribe(logs.clone(), Duration::from_secs(5), Query::new());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(logs_stub.fetch_calls(), 1);

    let areas_cache = areas.snapshot();
    let logs_cache = logs.snapshot();
    let model = DashboardModel::compute(
        DashboardSources {
            areas: Some(&areas_cache),
            logs: Some(&logs_cache),
            ..DashboardSources::default()
        },
        &DerivedFieldComputer::default(),
        OffsetDateTime::now_utc(),
    );

    assert_eq!(model.flow.total_visitors, 2030.0);
    assert_eq!(model.flow.area_count, 5);
    assert_eq!(model.alert_count(), 0);
    assert!(model.alerts.latest.is_empty());

    let logs_section = model.sections.iter().find(|s| s.resource == "logs").unwrap();
    assert!(logs_section.stale);
    assert!(logs_section.last_fetched_at.is_none());
    let areas_section = model.sections.iter().find(|s| s.resource == "flow-control").unwrap();
    assert!(!areas_section.stale);
}

#[tokio::test]
async fn test_dashboard_over_http_with_empty_alerts() {
    let harness = TestHarness::new().await.unwrap();
    let client = ApiClient::new(&harness.config).unwrap();
    let areas = SyncedResource::new(
        client.resource(harness.resource("flow-control").unwrap()),
        harness.config.max_age,
    );
    let logs = SyncedResource::new(
        client.resource(harness.resource("logs").unwrap()),
        harness.config.max_age,
    );

    let (scheduler, _failures) = PollingScheduler::new(harness.config.timeout);
    let _subs = [
        scheduler.subscribe(areas.clone(), Duration::from_millis(200), Query::new()),
        scheduler.subscribe(logs.clone(), Duration::from_millis(200), Query::new()),
    ];
    assert!(wait_until(2000, || !areas.snapshot().is_stale() && !logs.snapshot().is_stale()).await);

    let areas_cache = areas.snapshot();
    let logs_cache = logs.snapshot();
    let model = DashboardModel::compute(
        DashboardSources {
            areas: Some(&areas_cache),
            logs: Some(&logs_cache),
            ..DashboardSources::default()
        },
        &DerivedFieldComputer::new(harness.config.derive_config()),
        OffsetDateTime::now_utc(),
    );

    assert_eq!(model.flow.total_visitors, 2030.0);
    assert_eq!(model.flow.peak_area.as_ref().unwrap().area_id, "A002");
    // A002 at the 0.8 boundary, A003 above 0.7, A004 full
    assert_eq!(model.flow.status_counts.get(&CapacityStatus::Warning), Some(&2));
    assert_eq!(model.flow.status_counts.get(&CapacityStatus::Restricted), Some(&1));
    assert_eq!(model.alert_count(), 0);
}

#[tokio::test]
async fn test_failed_section_keeps_last_known_good() {
    let harness = TestHarness::new().await.unwrap();
    let client = ApiClient::new(&harness.config).unwrap();
    let areas = SyncedResource::new(
        client.resource(harness.resource("flow-control").unwrap()),
        harness.config.max_age,
    );
    areas.refresh(&Query::new()).await.unwrap();

    harness.api.fail_next("flow-control", 503, serde_json::json!({"message": "maintenance"}));
    assert!(areas.refresh(&Query::new()).await.is_err());

    let cache = areas.snapshot();
    let model = DashboardModel::compute(
        DashboardSources { areas: Some(&cache), ..DashboardSources::default() },
        &DerivedFieldComputer::default(),
        OffsetDateTime::now_utc(),
    );
    assert_eq!(model.flow.total_visitors, 2030.0);
}
