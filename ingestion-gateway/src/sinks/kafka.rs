use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info, info_span, instrument, Instrument};

use crate::api::PublishError;
use crate::config::KafkaConfig;
use crate::event::ProcessedEvent;
use crate::health::HealthHandle;
use crate::sinks::Event;

struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // The rdkafka main loop is alive if it is calling us
        self.liveness.report_healthy();

        gauge!("ingestion_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("ingestion_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("ingestion_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("ingestion_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("ingestion_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (topic, stats) in stats.topics {
            gauge!("ingestion_kafka_produce_avg_batch_size_events", "topic" => topic)
                .set(stats.batchcnt.avg as f64);
        }

        for (_, stats) in stats.brokers {
            let broker = stats.nodeid.to_string();
            if let Some(rtt) = stats.rtt {
                gauge!("ingestion_kafka_produce_rtt_latency_us", "broker" => broker.clone())
                    .set(rtt.p95 as f64);
            }
            gauge!("ingestion_kafka_broker_requests_pending", "broker" => broker.clone())
                .set(stats.outbuf_cnt as f64);
            counter!("ingestion_kafka_broker_tx_errors_total", "broker" => broker)
                .absolute(stats.txerrs);
        }
    }
}

/// Publishes events one by one to a single topic, keyed by event id.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    flush_timeout: Duration,
}

impl KafkaSink {
    pub fn new(config: KafkaConfig, liveness: HealthHandle) -> anyhow::Result<KafkaSink> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "batch.num.messages",
                config.kafka_producer_batch_messages.to_string(),
            )
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec)
            .set("acks", &config.kafka_producer_acks)
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if !config.kafka_client_id.is_empty() {
            client_config.set("client.id", &config.kafka_client_id);
        }

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        // Make sure the brokers are reachable before taking traffic
        drop(producer.client().fetch_metadata(
            Some(config.kafka_topic.as_str()),
            Timeout::After(Duration::from_secs(10)),
        )?);
        info!("connected to Kafka brokers");

        Ok(KafkaSink {
            producer,
            topic: config.kafka_topic,
            flush_timeout: Duration::from_millis(config.kafka_message_timeout_ms.into()),
        })
    }

    fn kafka_send(&self, event: &ProcessedEvent) -> Result<DeliveryFuture, PublishError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            error!("failed to serialize event: {}", e);
            PublishError::NonRetryableSinkError
        })?;

        match self.producer.send_result(FutureRecord {
            topic: &self.topic,
            payload: Some(&payload),
            partition: None,
            key: Some(event.key()),
            timestamp: None,
            headers: None,
        }) {
            Ok(ack) => Ok(ack),
            Err((e, _)) => match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::MessageSizeTooLarge) => Err(PublishError::EventTooBig),
                _ => {
                    error!("failed to produce event: {}", e);
                    Err(PublishError::RetryableSinkError)
                }
            },
        }
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<(), PublishError> {
        match delivery.await {
            Err(_) => {
                // Cancelled, the message timed out while retrying
                counter!("ingestion_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka before write timeout");
                Err(PublishError::RetryableSinkError)
            }
            Ok(Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _))) => {
                Err(PublishError::EventTooBig)
            }
            Ok(Err((err, _))) => {
                counter!("ingestion_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", err);
                Err(PublishError::RetryableSinkError)
            }
            Ok(Ok(_)) => Ok(()),
        }
    }
}

#[async_trait]
impl Event for KafkaSink {
    #[instrument(skip_all)]
    async fn send(&self, event: ProcessedEvent) -> Result<(), PublishError> {
        let start = Instant::now();
        let ack = self.kafka_send(&event)?;
        let result = Self::process_ack(ack)
            .instrument(info_span!("ack_wait_one"))
            .await;
        histogram!("ingestion_kafka_publish_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn flush(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                error!("failed to flush Kafka producer: {}", err);
                Err(PublishError::RetryableSinkError)
            }
            Err(err) => {
                error!("join error while flushing Kafka producer: {:?}", err);
                Err(PublishError::RetryableSinkError)
            }
        }
    }
}
