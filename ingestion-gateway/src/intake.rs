use std::io::Read;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use flate2::read::GzDecoder;
use tracing::{debug, instrument, warn, Span};

use crate::api::{IngestError, IngestResponse};
use crate::config::DedupMarkStage;
use crate::event::{ProcessedEvent, RawEvent};
use crate::fingerprint::fingerprint;
use crate::queue::EnqueueError;
use crate::router;

/// Accepts one event: fingerprint, duplicate check, enrichment, then a
/// non-blocking enqueue. Never waits on the broker.
#[instrument(
    skip_all,
    fields(
        event_id = tracing::field::Empty,
        body_len = body.len(),
    )
)]
pub async fn event(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<IngestResponse, IngestError> {
    let result = match decode_body(&headers, body, state.max_body_bytes) {
        Ok(body) => handle_event(&state, &body).await,
        Err(err) => Err(err),
    };
    if let Err(err) = &result {
        debug!("rejected event: {err}");
        state.stats.record_rejected(err.to_metric_tag());
    }
    result
}

fn decode_body(headers: &HeaderMap, body: Bytes, max_bytes: usize) -> Result<Bytes, IngestError> {
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());

    match encoding.as_deref() {
        None | Some("") | Some("identity") => Ok(body),
        Some("gzip") => decompress_gzip(&body, max_bytes),
        Some(other) => Err(IngestError::RequestDecodingError(format!(
            "unsupported content encoding: {other}"
        ))),
    }
}

fn decompress_gzip(compressed: &[u8], max_bytes: usize) -> Result<Bytes, IngestError> {
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut decoder = GzDecoder::new(compressed).take(limit);
    let mut decompressed = Vec::new();

    decoder.read_to_end(&mut decompressed).map_err(|e| {
        warn!("failed to decompress gzip body: {}", e);
        IngestError::RequestDecodingError(format!("failed to decompress gzip body: {e}"))
    })?;
    if decompressed.len() > max_bytes {
        return Err(IngestError::PayloadTooLarge);
    }

    Ok(Bytes::from(decompressed))
}

async fn handle_event(state: &router::State, body: &[u8]) -> Result<IngestResponse, IngestError> {
    let raw = RawEvent::from_bytes(body)?;
    let event_id = fingerprint(&raw)?;
    Span::current().record("event_id", event_id.as_str());

    if state.dedup.is_duplicate(&event_id).await {
        state.stats.record_duplicate();
        return Ok(IngestResponse::duplicate());
    }

    let event = ProcessedEvent::enrich(
        raw,
        event_id.clone(),
        state.timesource.current_time(),
        &state.service_name,
    );

    match state.queue.try_enqueue(event) {
        Ok(()) => {}
        Err(EnqueueError::Full(_)) => {
            warn!("intake queue is full, shedding event");
            return Err(IngestError::QueueFull);
        }
        Err(EnqueueError::Closed(_)) => return Err(IngestError::ShuttingDown),
    }
    state.stats.record_accepted();

    if state.dedup.mark_stage() == DedupMarkStage::Enqueued {
        state.dedup.mark_processed(&event_id).await;
    }

    Ok(IngestResponse::accepted(&event_id))
}
