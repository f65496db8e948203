#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use time::macros::datetime;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use ingestion_gateway::api::PublishError;
use ingestion_gateway::config::DedupMarkStage;
use ingestion_gateway::dedup::{Deduplicator, MemoryDedupStore};
use ingestion_gateway::event::ProcessedEvent;
use ingestion_gateway::health::HealthRegistry;
use ingestion_gateway::queue::IntakeQueue;
use ingestion_gateway::router::{router, RequestLimits};
use ingestion_gateway::sinks::Event;
use ingestion_gateway::stats::IntakeStats;
use ingestion_gateway::time::TimeSource;
use ingestion_gateway::worker::PublishWorkerPool;

pub const FIXED_TIME: &str = "2024-05-01T12:00:00Z";

pub struct FixedTime {}

impl TimeSource for FixedTime {
    fn now(&self) -> OffsetDateTime {
        datetime!(2024-05-01 12:00:00 UTC)
    }
}

#[derive(Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ProcessedEvent>>>,
}

#[async_trait]
impl Event for MemorySink {
    async fn send(&self, event: ProcessedEvent) -> Result<(), PublishError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl MemorySink {
    pub fn events(&self) -> Vec<ProcessedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<ProcessedEvent> {
        for _ in 0..200 {
            if self.events.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.events()
    }
}

pub struct FailingSink {}

#[async_trait]
impl Event for FailingSink {
    async fn send(&self, _event: ProcessedEvent) -> Result<(), PublishError> {
        Err(PublishError::RetryableSinkError)
    }
}

pub struct TestOptions {
    pub queue_capacity: usize,
    pub store: MemoryDedupStore,
    pub ttl: Duration,
    pub dedup_timeout: Duration,
    pub mark_stage: DedupMarkStage,
    pub max_body_bytes: usize,
    pub request_timeout: Option<Duration>,
}

impl Default for TestOptions {
    fn default() -> Self {
        TestOptions {
            queue_capacity: 100,
            store: MemoryDedupStore::new(),
            ttl: Duration::from_secs(3600),
            dedup_timeout: Duration::from_millis(50),
            mark_stage: DedupMarkStage::Enqueued,
            max_body_bytes: 1024 * 1024,
            request_timeout: Some(Duration::from_secs(5)),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub queue: IntakeQueue,
    pub store: MemoryDedupStore,
    pub dedup: Deduplicator,
    pub stats: Arc<IntakeStats>,
    pub liveness: HealthRegistry,
}

impl TestApp {
    pub fn new(options: TestOptions) -> Self {
        let liveness = HealthRegistry::new("integration_tests");
        let stats = Arc::new(IntakeStats::default());
        let queue = IntakeQueue::new(NonZeroUsize::new(options.queue_capacity).unwrap());
        let dedup = Deduplicator::new(
            Arc::new(options.store.clone()),
            options.ttl,
            options.dedup_timeout,
            options.mark_stage,
            stats.clone(),
        );

        let router = router(
            FixedTime {},
            liveness.clone(),
            queue.clone(),
            dedup.clone(),
            stats.clone(),
            "ingestion".to_string(),
            false,
            RequestLimits {
                max_body_bytes: options.max_body_bytes,
                concurrency_limit: None,
                request_timeout: options.request_timeout,
            },
        );

        TestApp {
            router,
            queue,
            store: options.store,
            dedup,
            stats,
            liveness,
        }
    }

    pub fn start_workers(
        &self,
        count: usize,
        sink: Arc<dyn Event + Send + Sync>,
        shutdown: CancellationToken,
    ) -> PublishWorkerPool {
        PublishWorkerPool::start(
            count,
            self.queue.clone(),
            sink,
            self.dedup.clone(),
            self.stats.clone(),
            &self.liveness,
            shutdown,
        )
    }
}
