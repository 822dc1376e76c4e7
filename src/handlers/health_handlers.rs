//! Liveness, readiness and pre-stop probes.
//!
//! - GET /_alive          -> always 200
//! - GET /_ready          -> 200 with the current pipeline state
//! - GET|POST /_prestop   -> cancels the pipeline, 200

use crate::services::archive_pipeline::PipelineState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared by all probe handlers.
#[derive(Clone)]
pub struct ProbeState {
    pub shutdown: CancellationToken,
    pub pipeline: watch::Receiver<PipelineState>,
}

/// `GET /_alive`
///
/// Cheap liveness probe, never performs I/O.
pub async fn alive() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(ProbeResponse {
            status: "ok",
            pipeline: None,
        }),
    )
}

/// `GET /_ready`
pub async fn ready(State(state): State<ProbeState>) -> impl IntoResponse {
    let pipeline = *state.pipeline.borrow();
    (
        StatusCode::OK,
        Json(ProbeResponse {
            status: "ok",
            pipeline: Some(pipeline),
        }),
    )
}

/// `GET|POST /_prestop`
///
/// Called by the orchestrator before the container is stopped. Cancelling
/// twice is harmless.
pub async fn prestop(State(state): State<ProbeState>) -> impl IntoResponse {
    if !state.shutdown.is_cancelled() {
        info!("pre-stop hook received, stopping pipeline");
        state.shutdown.cancel();
    }
    (
        StatusCode::OK,
        Json(ProbeResponse {
            status: "stopping",
            pipeline: None,
        }),
    )
}

#[derive(Serialize)]
struct ProbeResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<PipelineState>,
}
