//! Raw control event API.
//!
//! Carries the same `ControlEnvelope` the task manager routes in-process.

use axum::{extract::State, Json};
use cartrunner_core::ControlEnvelope;
use serde::Serialize;
use std::sync::Arc;

use super::tasks::{manager_error, TaskError};
use crate::state::AppState;

/// How many runners received the event
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub event: &'static str,
    pub delivered: usize,
}

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<ControlEnvelope>,
) -> Result<Json<DispatchResponse>, TaskError> {
    let event = envelope.event.name();
    let delivered = state
        .manager()
        .dispatch(envelope)
        .await
        .map_err(manager_error)?;
    Ok(Json(DispatchResponse { event, delivered }))
}
