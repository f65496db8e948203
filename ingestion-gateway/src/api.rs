use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::EventId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub status: IngestStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl IngestResponse {
    pub fn accepted(event_id: &EventId) -> Self {
        IngestResponse {
            status: IngestStatus::Accepted,
            message: "Event queued for processing".to_string(),
            event_id: Some(event_id.to_string()),
        }
    }

    pub fn duplicate() -> Self {
        IngestResponse {
            status: IngestStatus::Duplicate,
            message: "Event already processed".to_string(),
            event_id: None,
        }
    }
}

impl IntoResponse for IngestResponse {
    fn into_response(self) -> Response {
        match self.status {
            IngestStatus::Accepted => (StatusCode::ACCEPTED, Json(self)).into_response(),
            IngestStatus::Duplicate => (StatusCode::OK, Json(self)).into_response(),
        }
    }
}

/// Errors surfaced to the HTTP caller. Only client mistakes and immediate
/// overload make it here: anything failing after the event is queued is
/// reported through logs and metrics instead.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("request body too large")]
    PayloadTooLarge,

    #[error("service overloaded, try again later")]
    QueueFull,
    #[error("service is shutting down, try again later")]
    ShuttingDown,

    #[error("request timed out")]
    RequestTimeout,
}

impl IngestError {
    pub fn to_metric_tag(&self) -> &'static str {
        match self {
            IngestError::RequestParsingError(_) => "req_parsing",
            IngestError::RequestDecodingError(_) => "req_decoding",
            IngestError::PayloadTooLarge => "payload_too_large",
            IngestError::QueueFull => "queue_full",
            IngestError::ShuttingDown => "shutting_down",
            IngestError::RequestTimeout => "req_timeout",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::RequestParsingError(_) | IngestError::RequestDecodingError(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            IngestError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),

            IngestError::QueueFull | IngestError::ShuttingDown => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }

            IngestError::RequestTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
        }
        .into_response()
    }
}

/// Errors from the broker publisher, only ever seen by the publish workers.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("transient error, please retry")]
    RetryableSinkError,
    #[error("maximum event size exceeded")]
    EventTooBig,
    #[error("invalid event could not be processed")]
    NonRetryableSinkError,
}

impl PublishError {
    pub fn to_metric_tag(&self) -> &'static str {
        match self {
            PublishError::RetryableSinkError => "retryable_sink",
            PublishError::EventTooBig => "event_too_big",
            PublishError::NonRetryableSinkError => "non_retryable_sink",
        }
    }
}
