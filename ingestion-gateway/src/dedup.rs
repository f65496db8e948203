use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{DedupConfig, DedupMarkStage};
use crate::fingerprint::EventId;
use crate::stats::IntakeStats;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("dedup store did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("dedup store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store holding the "already processed" records.
#[async_trait]
pub trait DedupStore {
    async fn exists(&self, key: &str) -> Result<bool, DedupError>;
    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), DedupError>;
    async fn ping(&self) -> Result<(), DedupError>;
}

pub struct RedisDedupStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisDedupStore {
    /// Only validates the URL: the connection is opened on first use, so the
    /// gateway starts even while Redis is down.
    pub fn new(addr: String) -> Result<RedisDedupStore, DedupError> {
        let client = redis::Client::open(addr)?;
        Ok(RedisDedupStore {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, DedupError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!("opening dedup store connection");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn exists(&self, key: &str) -> Result<bool, DedupError> {
        let mut conn = self.connection().await?;
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), DedupError> {
        let mut conn = self.connection().await?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let () = conn.pset_ex(key, "1", millis).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), DedupError> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process store with expiring keys, for local runs and tests.
#[derive(Clone, Default)]
pub struct MemoryDedupStore {
    records: Arc<Mutex<HashMap<String, Instant>>>,
    unavailable: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails, as if the server was down.
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_available(false);
        store
    }

    /// A store that answers only after `delay`.
    pub fn slow(delay: Duration) -> Self {
        MemoryDedupStore {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    async fn before_call(&self) -> Result<(), DedupError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DedupError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn exists(&self, key: &str) -> Result<bool, DedupError> {
        self.before_call().await?;
        Ok(self.contains(key))
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), DedupError> {
        self.before_call().await?;
        let now = Instant::now();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.retain(|_, expires_at| *expires_at > now);
        records.insert(key.to_string(), now + ttl);
        Ok(())
    }

    async fn ping(&self) -> Result<(), DedupError> {
        self.before_call().await
    }
}

/// Checks and records processed fingerprints. Every store round-trip is
/// bounded by the configured timeout, and a failed or slow lookup counts as
/// "not a duplicate" so a store outage never blocks intake.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn DedupStore + Send + Sync>,
    ttl: Duration,
    timeout: Duration,
    mark_stage: DedupMarkStage,
    stats: Arc<IntakeStats>,
}

impl Deduplicator {
    pub fn new(
        store: Arc<dyn DedupStore + Send + Sync>,
        ttl: Duration,
        timeout: Duration,
        mark_stage: DedupMarkStage,
        stats: Arc<IntakeStats>,
    ) -> Self {
        Deduplicator {
            store,
            ttl,
            timeout,
            mark_stage,
            stats,
        }
    }

    pub fn from_config(
        store: Arc<dyn DedupStore + Send + Sync>,
        config: &DedupConfig,
        stats: Arc<IntakeStats>,
    ) -> Self {
        Self::new(
            store,
            config.ttl(),
            config.timeout(),
            config.dedup_mark_stage,
            stats,
        )
    }

    pub fn mark_stage(&self) -> DedupMarkStage {
        self.mark_stage
    }

    pub async fn is_duplicate(&self, event_id: &EventId) -> bool {
        let key = event_id.dedup_key();
        match tokio::time::timeout(self.timeout, self.store.exists(&key)).await {
            Ok(Ok(true)) => {
                self.stats.record_cache_hit();
                true
            }
            Ok(Ok(false)) => {
                self.stats.record_cache_miss(false);
                false
            }
            Ok(Err(err)) => {
                warn!("dedup lookup failed, accepting event {event_id}: {err}");
                self.stats.record_cache_miss(true);
                false
            }
            Err(_) => {
                warn!(
                    "dedup lookup timed out after {:?}, accepting event {event_id}",
                    self.timeout
                );
                self.stats.record_cache_miss(true);
                false
            }
        }
    }

    /// Failures only mean a later resubmission may get through again.
    pub async fn mark_processed(&self, event_id: &EventId) {
        let key = event_id.dedup_key();
        let result =
            match tokio::time::timeout(self.timeout, self.store.set_with_ttl(&key, self.ttl)).await
            {
                Ok(result) => result,
                Err(_) => Err(DedupError::Timeout(self.timeout)),
            };
        if let Err(err) = result {
            warn!("failed to record event {event_id} as processed: {err}");
            self.stats.record_dedup_write_failure();
        }
    }

    pub async fn ping(&self) -> Result<(), DedupError> {
        match tokio::time::timeout(self.timeout, self.store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(DedupError::Timeout(self.timeout)),
        }
    }
}
