mod common;

use std::io::Write;
use std::time::{Duration, Instant};

use assert_json_diff::assert_json_eq;
use axum::http::StatusCode;
use axum_test_helper::TestClient;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use common::{TestApp, TestOptions, FIXED_TIME};
use ingestion_gateway::api::{IngestResponse, IngestStatus};
use ingestion_gateway::dedup::MemoryDedupStore;
use ingestion_gateway::reporter::{HealthReport, MetricsReport};

#[tokio::test]
async fn accepts_then_suppresses_duplicates() {
    let app = TestApp::new(TestOptions::default());
    let client = TestClient::new(app.router.clone()).await;

    let res = client
        .post("/events")
        .body(r#"{"user_id":"a","event_type":"click"}"#)
        .header("Content-Type", "application/json")
        .send()
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted = res.json::<IngestResponse>().await;
    assert_eq!(accepted.status, IngestStatus::Accepted);
    assert_eq!(
        accepted.event_id.as_deref(),
        Some("b134652585f58494c6ae67bea192f315a702fe7b1ef22986795f0fb7a1779c87")
    );

    // Same content, other key order and endpoint
    let res = client
        .post("/ingest")
        .body(r#"{ "event_type": "click", "user_id": "a" }"#)
        .header("Content-Type", "application/json")
        .send()
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let duplicate = res.json::<Value>().await;
    assert_json_eq!(
        duplicate,
        json!({"status": "duplicate", "message": "Event already processed"})
    );

    assert_eq!(app.queue.depth(), 1);
    let queued = app.queue.try_dequeue().await.unwrap();
    assert_json_eq!(
        serde_json::to_value(&queued).unwrap(),
        json!({
            "user_id": "a",
            "event_type": "click",
            "event_id": "b134652585f58494c6ae67bea192f315a702fe7b1ef22986795f0fb7a1779c87",
            "ingested_at": FIXED_TIME,
            "service": "ingestion",
        })
    );

    let stats = app.stats.snapshot();
    assert_eq!(stats.events_accepted, 1);
    assert_eq!(stats.events_duplicate, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
}

#[tokio::test]
async fn rejects_bodies_that_are_not_json_objects() {
    let app = TestApp::new(TestOptions::default());
    let client = TestClient::new(app.router.clone()).await;

    for body in ["", "not json", r#"{"user_id":"#, "[]", "42"] {
        let res = client.post("/events").body(body).send().await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body: {body:?}");
    }

    assert_eq!(app.queue.depth(), 0);
    let metrics = client.get("/metrics").send().await.json::<MetricsReport>().await;
    assert_eq!(metrics.events_rejected, 5);
    assert_eq!(metrics.events_accepted, 0);
    assert_eq!(metrics.timestamp, FIXED_TIME);
}

#[tokio::test]
async fn intake_only_accepts_post() {
    let app = TestApp::new(TestOptions::default());
    let client = TestClient::new(app.router.clone()).await;

    let res = client.get("/events").send().await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let res = client.get("/ingest").send().await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn dedup_store_outage_fails_open() {
    let app = TestApp::new(TestOptions {
        store: MemoryDedupStore::unavailable(),
        ..Default::default()
    });
    let client = TestClient::new(app.router.clone()).await;

    for _ in 0..2 {
        let res = client.post("/events").body(r#"{"user_id":"a"}"#).send().await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }
    assert_eq!(app.queue.depth(), 2);

    let res = client.get("/health").send().await;
    assert_eq!(res.status(), StatusCode::OK);
    let health = res.json::<HealthReport>().await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.time, FIXED_TIME);
    assert!(health.dedup_store.starts_with("unhealthy: "), "{health:?}");
    assert_eq!(health.queue_depth, 2);

    app.store.set_available(true);
    let health = client.get("/health").send().await.json::<HealthReport>().await;
    assert_eq!(health.dedup_store, "healthy");
}

#[tokio::test]
async fn duplicates_are_accepted_again_after_the_ttl() {
    let app = TestApp::new(TestOptions {
        ttl: Duration::from_millis(200),
        ..Default::default()
    });
    let client = TestClient::new(app.router.clone()).await;
    let body = r#"{"user_id":"a","event_type":"click"}"#;

    let res = client.post("/events").body(body).send().await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let res = client.post("/events").body(body).send().await;
    assert_eq!(res.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let res = client.post("/events").body(body).send().await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn client_supplied_gateway_fields_are_replaced() {
    let app = TestApp::new(TestOptions::default());
    let client = TestClient::new(app.router.clone()).await;

    let res = client
        .post("/events")
        .body(r#"{"user_id":"a","event_id":"mine","service":"spoofed","ingested_at":"yesterday"}"#)
        .send()
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted = res.json::<IngestResponse>().await;
    let event_id = accepted.event_id.unwrap();
    assert_ne!(event_id, "mine");

    let queued = app.queue.try_dequeue().await.unwrap();
    assert_eq!(queued.event_id.as_str(), event_id);
    assert_eq!(queued.service, "ingestion");
    assert_eq!(queued.ingested_at, FIXED_TIME);
    assert_eq!(queued.properties.get("user_id"), Some(&json!("a")));
}

#[tokio::test]
async fn slow_dedup_store_does_not_hold_requests() {
    let app = TestApp::new(TestOptions {
        store: MemoryDedupStore::slow(Duration::from_secs(3)),
        dedup_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    let client = TestClient::new(app.router.clone()).await;

    let start = Instant::now();
    let res = client.post("/events").body(r#"{"user_id":"a"}"#).send().await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(app.stats.snapshot().dedup_write_failures, 1);
}

#[tokio::test]
async fn requests_past_the_timeout_get_a_504() {
    let app = TestApp::new(TestOptions {
        store: MemoryDedupStore::slow(Duration::from_secs(2)),
        dedup_timeout: Duration::from_secs(5),
        request_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let client = TestClient::new(app.router.clone()).await;

    let res = client.post("/events").body(r#"{"user_id":"a"}"#).send().await;
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn body_size_is_limited() {
    let app = TestApp::new(TestOptions {
        max_body_bytes: 64,
        ..Default::default()
    });
    let client = TestClient::new(app.router.clone()).await;

    let big = format!(r#"{{"data":"{}"}}"#, "x".repeat(128));
    let res = client.post("/events").body(big).send().await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.queue.depth(), 0);
}

#[tokio::test]
async fn gzip_bodies_are_accepted() {
    let app = TestApp::new(TestOptions::default());
    let client = TestClient::new(app.router.clone()).await;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(br#"{"user_id":"a","event_type":"click"}"#)
        .unwrap();
    let compressed = encoder.finish().unwrap();

    let res = client
        .post("/events")
        .body(compressed)
        .header("Content-Encoding", "gzip")
        .send()
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    // Fingerprinted on the decoded payload
    let res = client
        .post("/events")
        .body(r#"{"event_type":"click","user_id":"a"}"#)
        .send()
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}
