use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{captcha, events, handlers, middleware::metrics_middleware, proxies, tasks, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and status
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        // Tasks
        .route("/tasks", post(tasks::start_task).get(tasks::list_tasks))
        .route("/tasks/{id}", put(tasks::restart_task).delete(tasks::stop_task))
        .route("/tasks/{id}/peers", get(tasks::monitor_peers))
        // Proxy pool
        .route(
            "/proxies",
            post(proxies::register_proxies)
                .get(proxies::list_proxies)
                .delete(proxies::deregister_proxies),
        )
        // CAPTCHA harvesting
        .route("/captcha/harvest", post(captcha::harvest))
        .route("/captcha/waiting/{site_key}", get(captcha::waiting))
        // Raw control events
        .route("/events", post(events::dispatch))
        // Live status stream
        .route("/ws", get(ws::ws_handler))
        .route("/metrics", get(handlers::get_metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
