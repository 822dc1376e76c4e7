//! `POST /topics/{topic}/messages`: publishes a notification to every
//! subscription bound to `topic` on the local broker. The labeling side
//! posts `{"location": "...", "labels": [...]}` here.

use crate::{errors::ApiError, messaging::sqlite_broker::SqliteBroker};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub message_id: String,
    /// Number of subscriptions the message was queued for.
    pub fanout: u64,
}

pub async fn publish_message(
    State(broker): State<Arc<SqliteBroker>>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("message body is empty"));
    }

    let (message_id, fanout) = broker.publish(&topic, &body).await?;
    info!(topic = %topic, message_id = %message_id, fanout, "published notification");

    Ok((StatusCode::OK, Json(PublishResponse { message_id, fanout })))
}
