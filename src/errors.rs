//! Error taxonomy of the archival pipeline.
//!
//! Per-message errors (`DecodeError`, `CopyError`) are absorbed by the
//! pipeline and only logged. `SubscriptionError` during startup and
//! `PipelineError::Receive` are returned to the caller. `ApiError` is what
//! HTTP handlers answer with.

use crate::{messaging::MessagingError, stores::StoreError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// A notification payload that cannot become an `ArchiveRequest`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("malformed location: {0}")]
    MalformedLocation(String),
    #[error("empty labels field")]
    EmptyLabels,
}

/// Failure copying one object into the archive.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("reading `{bucket}/{key}` from source failed: {source}")]
    SourceRead {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("writing `{bucket}/{key}` to archive failed: {source}")]
    DestinationWrite {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
}

/// Subscription lifecycle failures.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("cannot determine if subscription `{name}` exists: {source}")]
    Lookup {
        name: String,
        #[source]
        source: MessagingError,
    },
    #[error("cannot create subscription `{name}` on topic `{topic}`: {source}")]
    Create {
        name: String,
        topic: String,
        #[source]
        source: MessagingError,
    },
    #[error("unable to delete subscription `{name}`: {source}")]
    Teardown {
        name: String,
        #[source]
        source: MessagingError,
    },
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline startup failed: {0}")]
    Startup(#[from] SubscriptionError),
    #[error("receive loop failed: {0}")]
    Receive(#[source] MessagingError),
}

/// Handler error rendered as a JSON body.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 503 Service Unavailable
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        ApiError::unavailable(err.to_string())
    }
}
