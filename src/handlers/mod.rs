use crate::messaging::sqlite_broker::SqliteBroker;
use axum::extract::FromRef;
use health_handlers::ProbeState;
use std::sync::Arc;

pub mod health_handlers;
pub mod publish_handlers;

/// Router state; each handler extracts the part it needs.
#[derive(Clone)]
pub struct AppState {
    pub probes: ProbeState,
    pub broker: Arc<SqliteBroker>,
}

impl FromRef<AppState> for ProbeState {
    fn from_ref(state: &AppState) -> Self {
        state.probes.clone()
    }
}

impl FromRef<AppState> for Arc<SqliteBroker> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.broker)
    }
}
