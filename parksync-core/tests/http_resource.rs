//! HttpResource against the devkit mock park API over loopback

use parksync_core::{
    ApiClient, ErrorKind, MutationAck, Query, RemoteResource, SyncError, SyncedResource,
};
use parksync_devkit::{AckStyle, ParkRecords, TestHarness};
use serde_json::{json, Value};
use std::time::Duration;

fn fields(value: Value) -> parksync_core::Fields {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_keyed_envelope_is_normalized() {
    let harness = TestHarness::new().await.unwrap();
    let client = ApiClient::new(&harness.config).unwrap();
    let areas = client.resource(harness.resource("flow-control").unwrap());

    let page = areas.fetch_all(&Query::new()).await.unwrap();
    assert_eq!(page.records.len(), 5);
    assert_eq!(page.records[0].id(), "A001");
    assert!(page.pagination.is_none());
}

#[tokio::test]
async fn test_paginated_envelope_and_query() {
    let harness = TestHarness::new().await.unwrap();
    let at = time::OffsetDateTime::now_utc();
    harness.api.seed(
        "environment-data",
        (1..=25)
            .map(|i| ParkRecords::reading(&format!("D{i:02}"), "PM25", i as f64, at))
            .collect(),
    );
    let client = ApiClient::new(&harness.config).unwrap();
    let readings = client.resource(harness.resource("environment").unwrap());

    let page = readings.fetch_all(&Query::new().page(2, 10)).await.unwrap();
    assert_eq!(page.records.len(), 10);
    assert_eq!(page.records[0].id(), "D11");
    let pagination = page.pagination.unwrap();
    assert_eq!(pagination.total, Some(25));
    assert_eq!(pagination.pages, Some(3));
}

#[tokio::test]
async fn test_log_filters_are_sent_as_query() {
    let harness = TestHarness::new().await.unwrap();
    let at = time::OffsetDateTime::now_utc();
    harness.api.seed(
        "logs",
        vec![
            ParkRecords::log(1, "error", "booking", "payment gateway timeout", at),
            ParkRecords::log(2, "info", "booking", "reservation created", at),
            ParkRecords::log(3, "error", "auth", "too many attempts", at),
        ],
    );
    let client = ApiClient::new(&harness.config).unwrap();
    let logs = client.resource(harness.resource("logs").unwrap());

    let page = logs
        .fetch_all(&Query::new().param("log_type", "error").param("module", "booking"))
        .await
        .unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].id(), "1");
}

#[tokio::test]
async fn test_create_then_fetch_round_trip() {
    let harness = TestHarness::new().await.unwrap();
    let client = ApiClient::new(&harness.config).unwrap();
    let tourists = SyncedResource::new(
        client.resource(harness.resource("tourists").unwrap()),
        Duration::from_secs(60),
    );

    let ack = tourists
        .create(&fields(json!({"name": "Li Wei", "phone": "13800000000"})))
        .await
        .unwrap();
    let created = ack.record().unwrap().clone();
    assert!(tourists.get(created.id()).is_some());

    let page = tourists.remote().fetch_all(&Query::new()).await.unwrap();
    let fetched = page.records.iter().find(|r| r.id() == created.id()).unwrap();
    assert_eq!(fetched.str_field("name"), Some("Li Wei"));
    assert_eq!(fetched.str_field("phone"), Some("13800000000"));
}

#[tokio::test]
async fn test_validation_errors_carry_fields() {
    let harness = TestHarness::new().await.unwrap();
    harness.api.require_fields("tourists", &["name", "phone"]);
    let client = ApiClient::new(&harness.config).unwrap();
    let tourists = client.resource(harness.resource("tourists").unwrap());

    let err = tourists.create(&fields(json!({"name": "Li Wei"}))).await.unwrap_err();
    match err {
        SyncError::Validation { fields, message } => {
            assert_eq!(message, "validation failed");
            assert_eq!(fields.get("phone").map(String::as_str), Some("phone is required"));
            assert!(!fields.contains_key("name"));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_ack_styles() {
    let harness = TestHarness::new().await.unwrap();
    let client = ApiClient::new(&harness.config).unwrap();
    let areas = client.resource(harness.resource("flow-control").unwrap());

    let ack = areas.update("A001", &fields(json!({"daily_capacity": 900}))).await.unwrap();
    assert_eq!(ack.record().unwrap().f64_field("daily_capacity"), Some(900.0));

    harness.api.set_ack_style("flow-control", AckStyle::Message);
    let ack = areas.update("A001", &fields(json!({"daily_capacity": 950}))).await.unwrap();
    assert_eq!(
        ack,
        MutationAck::Acknowledged { id: None, message: Some("updated".into()) }
    );

    let err = areas.update("A999", &fields(json!({"daily_capacity": 1}))).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_remove_twice_is_not_found() {
    let harness = TestHarness::new().await.unwrap();
    harness.api.seed("tourists", vec![ParkRecords::tourist("T1", "Zhang San", "13900000000")]);
    let client = ApiClient::new(&harness.config).unwrap();
    let tourists = SyncedResource::new(
        client.resource(harness.resource("tourists").unwrap()),
        Duration::from_secs(60),
    );
    tourists.refresh(&Query::new()).await.unwrap();

    tourists.remove("T1").await.unwrap();
    assert!(tourists.get("T1").is_none());

    let err = tourists.remove("T1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(tourists.get("T1").is_none());
}

#[tokio::test]
async fn test_bearer_token_and_unauthorized() {
    let mut harness = TestHarness::new().await.unwrap();
    harness.api.require_token("s3cret");

    let client = ApiClient::new(&harness.config).unwrap();
    let err = client
        .resource(harness.resource("flow-control").unwrap())
        .fetch_all(&Query::new())
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(err.message(), "token invalid or expired");

    harness.config.bearer_token = Some("s3cret".into());
    let client = ApiClient::new(&harness.config).unwrap();
    let page = client
        .resource(harness.resource("flow-control").unwrap())
        .fetch_all(&Query::new())
        .await
        .unwrap();
    assert_eq!(page.records.len(), 5);
}

#[tokio::test]
async fn test_server_errors_are_verbatim_and_cache_survives() {
    let harness = TestHarness::new().await.unwrap();
    let client = ApiClient::new(&harness.config).unwrap();
    let areas = SyncedResource::new(
        client.resource(harness.resource("flow-control").unwrap()),
        Duration::from_secs(60),
    );
    areas.refresh(&Query::new()).await.unwrap();

    harness.api.fail_next("flow-control", 500, json!({"error": "数据库连接失败"}));
    let err = areas.refresh(&Query::new()).await.unwrap_err();
    assert_eq!(err, SyncError::Api { status: 500, message: "数据库连接失败".into() });
    assert_eq!(areas.snapshot().len(), 5);

    harness.api.fail_next("flow-control", 200, json!({"success": false, "error": "查询失败"}));
    let err = areas.refresh(&Query::new()).await.unwrap_err();
    assert_eq!(err, SyncError::Api { status: 200, message: "查询失败".into() });
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let mut config = parksync_devkit::test_utils::config_for("http://127.0.0.1:9/api");
    config.timeout = Duration::from_secs(2);
    let client = ApiClient::new(&config).unwrap();
    let err = client
        .resource(config.resource("logs").unwrap())
        .fetch_all(&Query::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}
