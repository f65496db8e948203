use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use crate::config::DedupMarkStage;
use crate::dedup::Deduplicator;
use crate::event::ProcessedEvent;
use crate::health::{HealthHandle, HealthRegistry};
use crate::queue::IntakeQueue;
use crate::sinks::Event;
use crate::stats::IntakeStats;

const WORKER_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);
const WORKER_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed set of tasks moving events from the intake queue to the sink.
pub struct PublishWorkerPool {
    tasks: JoinSet<()>,
}

#[derive(Clone)]
struct PublishWorker {
    queue: IntakeQueue,
    sink: Arc<dyn Event + Send + Sync>,
    dedup: Deduplicator,
    stats: Arc<IntakeStats>,
}

impl PublishWorkerPool {
    pub fn start(
        worker_count: usize,
        queue: IntakeQueue,
        sink: Arc<dyn Event + Send + Sync>,
        dedup: Deduplicator,
        stats: Arc<IntakeStats>,
        liveness: &HealthRegistry,
        shutdown: CancellationToken,
    ) -> Self {
        let worker = PublishWorker {
            queue,
            sink,
            dedup,
            stats,
        };

        let mut tasks = JoinSet::new();
        for id in 0..worker_count {
            let handle = liveness.register(format!("publish_worker_{id}"), WORKER_LIVENESS_DEADLINE);
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(
                async move { worker.run(handle, shutdown).await }
                    .instrument(tracing::info_span!("publish_worker", id)),
            );
        }
        info!("started {worker_count} publish workers");

        PublishWorkerPool { tasks }
    }

    /// Waits for every worker to exit. Workers only exit once cancelled.
    pub async fn join(mut self) {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(err) = res {
                error!("publish worker panicked: {:?}", err);
            }
        }
    }
}

impl PublishWorker {
    async fn run(&self, liveness: HealthHandle, shutdown: CancellationToken) {
        let mut heartbeat = tokio::time::interval(WORKER_HEARTBEAT_INTERVAL);
        liveness.report_healthy();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => liveness.report_healthy(),
                next = self.queue.dequeue() => match next {
                    Some(event) => self.process(event).await,
                    None => break,
                },
            }
        }

        // Drain what the closed queue still holds
        let mut drained = 0;
        while let Some(event) = self.queue.try_dequeue().await {
            self.process(event).await;
            drained += 1;
        }
        debug!(drained, "publish worker stopped");
    }

    /// A failed publish is logged and counted, never retried.
    async fn process(&self, event: ProcessedEvent) {
        let event_id = event.event_id.clone();
        match self.sink.send(event).await {
            Ok(()) => {
                self.stats.record_published();
                if self.dedup.mark_stage() == DedupMarkStage::Published {
                    self.dedup.mark_processed(&event_id).await;
                }
            }
            Err(err) => {
                error!("failed to publish event {event_id}: {err}");
                self.stats.record_publish_failure(err.to_metric_tag());
            }
        }
    }
}
