mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum_test_helper::TestClient;
use tokio_util::sync::CancellationToken;

use common::{FailingSink, MemorySink, TestApp, TestOptions, FIXED_TIME};
use ingestion_gateway::api::IngestResponse;
use ingestion_gateway::config::DedupMarkStage;
use ingestion_gateway::reporter::MetricsReport;
use ingestion_gateway::sinks::SleepSink;

#[tokio::test]
async fn accepted_events_reach_the_sink() {
    let app = TestApp::new(TestOptions::default());
    let sink = MemorySink::default();
    let shutdown = CancellationToken::new();
    let workers = app.start_workers(2, Arc::new(sink.clone()), shutdown.clone());
    let client = TestClient::new(app.router.clone()).await;

    let res = client
        .post("/events")
        .body(r#"{"user_id":"a","event_type":"click"}"#)
        .send()
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let event_id = res.json::<IngestResponse>().await.event_id.unwrap();

    let published = sink.wait_for(1).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key(), event_id);
    assert_eq!(published[0].ingested_at, FIXED_TIME);

    shutdown.cancel();
    workers.join().await;

    let metrics = client.get("/metrics").send().await.json::<MetricsReport>().await;
    assert_eq!(metrics.events_published, 1);
    assert_eq!(metrics.events_accepted, 1);
    assert_eq!(metrics.queue_depth, 0);
}

#[tokio::test]
async fn responses_do_not_wait_for_the_broker() {
    let app = TestApp::new(TestOptions::default());
    let shutdown = CancellationToken::new();
    let workers = app.start_workers(
        2,
        Arc::new(SleepSink {
            delay: Duration::from_secs(2),
        }),
        shutdown.clone(),
    );
    let client = TestClient::new(app.router.clone()).await;

    let start = Instant::now();
    for n in 0..5 {
        let res = client
            .post("/events")
            .body(format!(r#"{{"n":{n}}}"#))
            .send()
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    app.queue.close();
    shutdown.cancel();
    drop(workers);
}

#[tokio::test]
async fn publish_failures_do_not_stop_workers() {
    let app = TestApp::new(TestOptions::default());
    let shutdown = CancellationToken::new();
    let workers = app.start_workers(1, Arc::new(FailingSink {}), shutdown.clone());
    let client = TestClient::new(app.router.clone()).await;

    for n in 0..3 {
        let res = client
            .post("/events")
            .body(format!(r#"{{"n":{n}}}"#))
            .send()
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    for _ in 0..200 {
        if app.stats.snapshot().publish_failures == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stats = app.stats.snapshot();
    assert_eq!(stats.publish_failures, 3);
    assert_eq!(stats.events_published, 0);
    assert_eq!(app.queue.depth(), 0);

    shutdown.cancel();
    workers.join().await;
}

#[tokio::test]
async fn published_stage_marks_only_after_delivery() {
    let app = TestApp::new(TestOptions {
        mark_stage: DedupMarkStage::Published,
        ..Default::default()
    });
    let client = TestClient::new(app.router.clone()).await;
    let body = r#"{"user_id":"a","event_type":"click"}"#;

    // Nothing published yet: a resubmission is not caught
    let res = client.post("/events").body(body).send().await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let res = client.post("/events").body(body).send().await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let sink = MemorySink::default();
    let shutdown = CancellationToken::new();
    let workers = app.start_workers(1, Arc::new(sink.clone()), shutdown.clone());
    sink.wait_for(2).await;
    shutdown.cancel();
    workers.join().await;

    let res = client.post("/events").body(body).send().await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn shutdown_drains_queued_events() {
    let app = TestApp::new(TestOptions::default());
    let client = TestClient::new(app.router.clone()).await;

    for n in 0..20 {
        let res = client
            .post("/events")
            .body(format!(r#"{{"n":{n}}}"#))
            .send()
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    let sink = MemorySink::default();
    let shutdown = CancellationToken::new();
    app.queue.close();
    shutdown.cancel();
    let workers = app.start_workers(4, Arc::new(sink.clone()), shutdown);
    workers.join().await;

    assert_eq!(sink.events().len(), 20);
    assert_eq!(app.queue.depth(), 0);
    assert_eq!(app.stats.snapshot().events_published, 20);
}
