use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dedup::{Deduplicator, RedisDedupStore};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::queue::IntakeQueue;
use crate::router::{self, RequestLimits};
use crate::sinks::kafka::KafkaSink;
use crate::sinks::print::PrintSink;
use crate::sinks::Event;
use crate::stats::IntakeStats;
use crate::worker::PublishWorkerPool;

fn create_sink(
    config: &Config,
    liveness: &HealthRegistry,
) -> anyhow::Result<Arc<dyn Event + Send + Sync>> {
    if config.print_sink {
        // Print sink is only used for local debug, don't allow a container with it to run on prod
        liveness
            .register("print_sink".to_string(), Duration::from_secs(30))
            .report_status(ComponentStatus::Unhealthy);

        Ok(Arc::new(PrintSink {}))
    } else {
        let sink_liveness = liveness.register("rdkafka".to_string(), Duration::from_secs(30));
        Ok(Arc::new(KafkaSink::new(config.kafka.clone(), sink_liveness)?))
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");
    let stats = Arc::new(IntakeStats::default());

    let store = RedisDedupStore::new(config.dedup.redis_url.clone())?;
    let dedup = Deduplicator::from_config(Arc::new(store), &config.dedup, stats.clone());
    // Duplicate suppression degrades without Redis, intake keeps going
    if let Err(err) = dedup.ping().await {
        warn!("dedup store not reachable at startup, duplicates will not be detected: {err}");
    }

    let sink = create_sink(&config, &liveness)?;
    let queue = IntakeQueue::new(config.queue_capacity);

    let workers_shutdown = CancellationToken::new();
    let workers = PublishWorkerPool::start(
        config.worker_count,
        queue.clone(),
        sink.clone(),
        dedup.clone(),
        stats.clone(),
        &liveness,
        workers_shutdown.clone(),
    );

    let app = router::router(
        crate::time::SystemTime {},
        liveness,
        queue.clone(),
        dedup,
        stats,
        config.service_name.clone(),
        config.export_prometheus,
        RequestLimits {
            max_body_bytes: config.max_body_bytes,
            concurrency_limit: config.concurrency_limit,
            request_timeout: config.request_timeout(),
        },
    );

    info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped, draining {} queued events", queue.depth());

    queue.close();
    workers_shutdown.cancel();
    if tokio::time::timeout(config.shutdown_drain_timeout(), workers.join())
        .await
        .is_err()
    {
        warn!(
            "publish workers did not drain within {:?}, {} events left behind",
            config.shutdown_drain_timeout(),
            queue.depth()
        );
    }

    if let Err(err) = sink.flush().await {
        error!("failed to flush sink on shutdown: {err}");
    }
    info!("shutdown complete");

    Ok(())
}
