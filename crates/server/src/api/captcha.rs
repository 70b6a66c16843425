//! CAPTCHA harvest API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;

/// A solved token posted by the external solver
#[derive(Debug, Deserialize)]
pub struct HarvestBody {
    pub token: String,
    pub site_key: String,
}

/// Who received the token
#[derive(Debug, Serialize)]
pub struct HarvestResponse {
    pub delivered: bool,
    pub runner_id: Option<String>,
}

/// Runners queued for a site key, head first
#[derive(Debug, Serialize)]
pub struct WaitingResponse {
    pub site_key: String,
    pub runners: Vec<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct CaptchaErrorResponse {
    pub error: String,
}

/// Hand a solved token to the head waiter for its site key
///
/// A token nobody is waiting for is dropped, not stored.
pub async fn harvest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HarvestBody>,
) -> Result<Json<HarvestResponse>, (StatusCode, Json<CaptchaErrorResponse>)> {
    if body.token.is_empty() || body.site_key.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(CaptchaErrorResponse {
                error: "token and site_key are required".to_string(),
            }),
        ));
    }

    let runner_id = state.manager().harvest(body.token, &body.site_key).await;
    debug!("Harvested token for {} went to {:?}", body.site_key, runner_id);
    Ok(Json(HarvestResponse {
        delivered: runner_id.is_some(),
        runner_id,
    }))
}

pub async fn waiting(
    State(state): State<Arc<AppState>>,
    Path(site_key): Path<String>,
) -> Json<WaitingResponse> {
    let runners = state
        .manager()
        .collaborators()
        .broker
        .waiting(&site_key)
        .await;
    Json(WaitingResponse { site_key, runners })
}
