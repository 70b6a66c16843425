//! Task API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use cartrunner_core::{ManagerError, Task, TaskId, TaskSummary};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Response for a started task
#[derive(Debug, Serialize)]
pub struct StartTaskResponse {
    pub task_id: TaskId,
    pub runner_id: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Response for listing tasks
#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<TaskSummary>,
    pub total: usize,
}

/// Subscribers sharing a task's monitor
#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub task_id: TaskId,
    pub peers: Vec<TaskId>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TaskErrorResponse {
    pub error: String,
}

pub type TaskError = (StatusCode, Json<TaskErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> TaskError {
    (
        status,
        Json(TaskErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map a task manager error onto an HTTP status.
pub fn manager_error(e: ManagerError) -> TaskError {
    let status = match e {
        ManagerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        ManagerError::AlreadyRunning(_) => StatusCode::CONFLICT,
        ManagerError::Channel(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    error(status, e.to_string())
}

fn check_task(task: &Task) -> Result<(), TaskError> {
    if task.id.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "task id must not be empty"));
    }
    if task.site.url.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "site url must not be empty"));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a task
pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Json(mut task): Json<Task>,
) -> Result<(StatusCode, Json<StartTaskResponse>), TaskError> {
    check_task(&task)?;
    state.config().fill_site(&mut task.site);

    let task_id = task.id.clone();
    let runner_id = state.manager().start(task).await.map_err(manager_error)?;
    info!("Started task {} as {}", task_id, runner_id);

    Ok((
        StatusCode::CREATED,
        Json(StartTaskResponse { task_id, runner_id }),
    ))
}

/// List running tasks
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<ListTasksResponse> {
    let tasks = state.manager().tasks().await;
    let total = tasks.len();
    Json(ListTasksResponse { tasks, total })
}

/// Stop a task
pub async fn stop_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, TaskError> {
    state.manager().stop(&id).await.map_err(manager_error)?;
    Ok(Json(MessageResponse {
        message: format!("Task {} stopping", id),
    }))
}

/// Restart a running task with edited settings
///
/// The path id wins over any id in the body.
pub async fn restart_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut task): Json<Task>,
) -> Result<Json<MessageResponse>, TaskError> {
    task.id = id.clone();
    check_task(&task)?;
    state.config().fill_site(&mut task.site);

    state.manager().restart(task).await.map_err(manager_error)?;
    Ok(Json(MessageResponse {
        message: format!("Task {} restarted", id),
    }))
}

/// Tasks sharing this task's monitor
pub async fn monitor_peers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PeersResponse>, TaskError> {
    let peers = state
        .manager()
        .monitor_peers(&id)
        .await
        .ok_or_else(|| manager_error(ManagerError::TaskNotFound(id.clone())))?;
    Ok(Json(PeersResponse { task_id: id, peers }))
}
