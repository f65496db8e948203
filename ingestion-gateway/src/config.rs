use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::Level;

/// When the dedup record for an accepted event gets written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DedupMarkStage {
    /// Right after the event made it into the intake queue. A crash before the
    /// publish completes loses the event for the length of the TTL.
    Enqueued,
    /// After the broker acknowledged the write. Resubmissions racing the
    /// publish can slip through as duplicates.
    Published,
}

impl std::str::FromStr for DedupMarkStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "enqueued" => Ok(DedupMarkStage::Enqueued),
            "published" => Ok(DedupMarkStage::Published),
            _ => Err(format!("Unknown dedup mark stage: {s}")),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:8081")]
    pub address: SocketAddr,

    // Tags every published event, and names the service in traces
    #[envconfig(default = "ingestion")]
    pub service_name: String,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "1000")]
    pub queue_capacity: NonZeroUsize,

    #[envconfig(default = "10")]
    pub worker_count: usize,

    #[envconfig(default = "1048576")]
    pub max_body_bytes: usize,

    pub concurrency_limit: Option<usize>,

    #[envconfig(default = "5000")]
    pub request_timeout_ms: u64, // 0 disables the timeout middleware

    #[envconfig(default = "30000")]
    pub shutdown_drain_timeout_ms: u64,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(nested = true)]
    pub dedup: DedupConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_timeout_ms)
    }
}

#[derive(Envconfig, Clone)]
pub struct DedupConfig {
    #[envconfig(default = "redis://127.0.0.1:6379/")]
    pub redis_url: String,
    #[envconfig(default = "3600")]
    pub dedup_ttl_seconds: u64,
    #[envconfig(default = "50")]
    pub dedup_timeout_ms: u64, // Upper bound for every dedup store round-trip
    #[envconfig(default = "enqueued")]
    pub dedup_mark_stage: DedupMarkStage,
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.dedup_timeout_ms)
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "10")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic
    #[envconfig(default = "100")]
    pub kafka_producer_batch_messages: u32, // Maximum number of messages per producer batch
    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
    #[envconfig(default = "gzip")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
    #[envconfig(default = "1")]
    pub kafka_producer_acks: String, // 0, 1 (leader only) or all
    #[envconfig(default = "kafka:9092")]
    pub kafka_hosts: String,
    #[envconfig(default = "raw-events")]
    pub kafka_topic: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
    #[envconfig(default = "")]
    pub kafka_client_id: String,
}
