//! Routes served next to the pipeline.
//!
//! - `GET      /_alive`                 : liveness
//! - `GET      /_ready`                 : readiness, reports the pipeline state
//! - `GET|POST /_prestop`               : stop receiving before the container is killed
//! - `POST     /topics/{topic}/messages`: publish a notification to the local broker

use crate::handlers::{
    AppState,
    health_handlers::{alive, prestop, ready},
    publish_handlers::publish_message,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. Handlers extract their part of `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/_alive", get(alive))
        .route("/_ready", get(ready))
        .route("/_prestop", get(prestop).post(prestop))
        .route("/topics/{topic}/messages", post(publish_message))
}
