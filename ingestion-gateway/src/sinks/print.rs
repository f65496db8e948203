use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::api::PublishError;
use crate::event::ProcessedEvent;
use crate::sinks::Event;

/// Logs events instead of publishing them, for local debugging.
pub struct PrintSink {}

#[async_trait]
impl Event for PrintSink {
    async fn send(&self, event: ProcessedEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&event).map_err(|_| PublishError::NonRetryableSinkError)?;
        info!(key = event.key(), "event: {payload}");
        counter!("ingestion_print_sink_events_total").increment(1);
        Ok(())
    }
}
