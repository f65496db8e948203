use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::IngestError;
use crate::fingerprint::EventId;

/// Fields owned by the gateway. Payload keys with these names are replaced
/// during enrichment.
pub const RESERVED_FIELDS: [&str; 3] = ["event_id", "ingested_at", "service"];

/// An inbound event as submitted: any JSON object, no schema enforced.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent(Map<String, Value>);

impl RawEvent {
    /// Decodes one event from a request body, which must hold a JSON object.
    pub fn from_bytes(bytes: &[u8]) -> Result<RawEvent, IngestError> {
        tracing::debug!(len = bytes.len(), "decoding new event");
        let properties: Map<String, Value> = serde_json::from_slice(bytes)?;
        Ok(RawEvent(properties))
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RawEvent {
    fn from(properties: Map<String, Value>) -> Self {
        RawEvent(properties)
    }
}

/// An accepted event, as it sits in the intake queue and lands on the topic:
/// the original payload plus the gateway's enrichment fields at the top level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: EventId,
    pub ingested_at: String,
    pub service: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl ProcessedEvent {
    pub fn enrich(raw: RawEvent, event_id: EventId, ingested_at: String, service: &str) -> Self {
        let mut properties = raw.0;
        for field in RESERVED_FIELDS {
            properties.remove(field);
        }

        ProcessedEvent {
            event_id,
            ingested_at,
            service: service.to_string(),
            properties,
        }
    }

    /// Partition key on the broker.
    pub fn key(&self) -> &str {
        self.event_id.as_str()
    }
}
