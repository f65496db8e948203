use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::IngestError;
use crate::dedup::Deduplicator;
use crate::health::HealthRegistry;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::queue::IntakeQueue;
use crate::stats::IntakeStats;
use crate::time::TimeSource;
use crate::{intake, reporter};

#[derive(Clone)]
pub struct State {
    pub queue: IntakeQueue,
    pub dedup: Deduplicator,
    pub stats: Arc<IntakeStats>,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
    pub service_name: String,
    pub max_body_bytes: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct RequestLimits {
    pub max_body_bytes: usize,
    pub concurrency_limit: Option<usize>,
    pub request_timeout: Option<Duration>,
}

async fn index() -> &'static str {
    "ingestion gateway"
}

#[allow(clippy::too_many_arguments)]
pub fn router<TZ: TimeSource + Send + Sync + 'static>(
    timesource: TZ,
    liveness: HealthRegistry,
    queue: IntakeQueue,
    dedup: Deduplicator,
    stats: Arc<IntakeStats>,
    service_name: String,
    metrics: bool,
    limits: RequestLimits,
) -> Router {
    let state = State {
        queue,
        dedup,
        stats,
        timesource: Arc::new(timesource),
        service_name,
        max_body_bytes: limits.max_body_bytes,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let mut intake_router = Router::new()
        .route("/events", post(intake::event))
        .route("/ingest", post(intake::event))
        .layer(DefaultBodyLimit::max(limits.max_body_bytes));
    if let Some(limit) = limits.concurrency_limit {
        intake_router = intake_router.layer(ConcurrencyLimitLayer::new(limit));
    }

    let status_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/health", get(reporter::health))
        .route("/metrics", get(reporter::metrics));

    let router = Router::new()
        .merge(status_router)
        .merge(intake_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    let router = apply_request_timeout(router, limits.request_timeout);

    // Installing a global recorder when the gateway is used as a library
    // (during tests etc) does not work well
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route(
            "/metrics/prometheus",
            get(move || ready(recorder_handle.render())),
        )
    } else {
        router
    }
}

fn apply_request_timeout(router: Router, timeout: Option<Duration>) -> Router {
    let Some(timeout) = timeout else {
        tracing::info!("no request timeout applied");
        return router;
    };

    router.layer(axum::middleware::from_fn(
        move |req: Request, next: Next| async move {
            let method = req.method().to_string();
            let path = req.uri().path().to_owned();

            match tokio::time::timeout(timeout, next.run(req)).await {
                Ok(response) => response,
                Err(_) => {
                    let labels = [("method", method.clone()), ("path", path.clone())];
                    metrics::counter!("ingestion_request_timed_out_total", &labels).increment(1);
                    tracing::warn!(method, path, ?timeout, "request timed out");
                    IngestError::RequestTimeout.into_response()
                }
            }
        },
    ))
}
