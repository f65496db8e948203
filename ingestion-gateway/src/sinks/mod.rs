use std::time::Duration;

use async_trait::async_trait;

use crate::api::PublishError;
use crate::event::ProcessedEvent;

pub mod kafka;
pub mod print;

#[async_trait]
pub trait Event {
    /// Resolves once the broker acknowledged the write, or failed to.
    async fn send(&self, event: ProcessedEvent) -> Result<(), PublishError>;

    /// Pushes out anything still buffered. Called once, during shutdown.
    async fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Stands in for a slow broker.
pub struct SleepSink {
    pub delay: Duration,
}

#[async_trait]
impl Event for SleepSink {
    async fn send(&self, event: ProcessedEvent) -> Result<(), PublishError> {
        drop(event);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
