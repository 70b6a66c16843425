//! Proxy pool API handlers.

use axum::{extract::State, http::StatusCode, Json};
use cartrunner_core::{ProxyPool, ProxySummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

/// Request body for registering or removing proxies
#[derive(Debug, Deserialize)]
pub struct ProxiesBody {
    /// Proxies in any accepted textual form (`host:port`, `host:port:user:pass`, URL)
    pub proxies: Vec<String>,
}

/// Response for register/deregister
#[derive(Debug, Serialize)]
pub struct ProxyCountResponse {
    pub count: usize,
    /// Entries that could not be parsed as a proxy
    pub rejected: Vec<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ProxyErrorResponse {
    pub error: String,
}

fn rejected(proxies: &[String]) -> Vec<String> {
    proxies
        .iter()
        .filter(|raw| ProxyPool::format(raw).is_none())
        .cloned()
        .collect()
}

fn require_entries(
    body: &ProxiesBody,
) -> Result<(), (StatusCode, Json<ProxyErrorResponse>)> {
    if body.proxies.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ProxyErrorResponse {
                error: "no proxies given".to_string(),
            }),
        ));
    }
    Ok(())
}

/// Add proxies to the pool
pub async fn register_proxies(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProxiesBody>,
) -> Result<Json<ProxyCountResponse>, (StatusCode, Json<ProxyErrorResponse>)> {
    require_entries(&body)?;
    let count = state.manager().register_proxies(&body.proxies[..]).await;
    Ok(Json(ProxyCountResponse {
        count,
        rejected: rejected(&body.proxies),
    }))
}

/// Remove proxies from the pool, moving their holders elsewhere
pub async fn deregister_proxies(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProxiesBody>,
) -> Result<Json<ProxyCountResponse>, (StatusCode, Json<ProxyErrorResponse>)> {
    require_entries(&body)?;
    let count = state.manager().deregister_proxies(&body.proxies[..]).await;
    Ok(Json(ProxyCountResponse {
        count,
        rejected: rejected(&body.proxies),
    }))
}

/// List the pool with holders and bans
pub async fn list_proxies(State(state): State<Arc<AppState>>) -> Json<Vec<ProxySummary>> {
    Json(state.manager().proxies().await)
}
