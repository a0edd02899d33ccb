use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentrt_shared::{StoreError, Task, TaskKind, TaskStatus};
use agentrt_store::TaskListFilter;

use crate::error::ApiError;
use crate::state::AppState;

fn unix_or_zero(t: Option<DateTime<Utc>>) -> i64 {
    t.map(|t| t.timestamp()).unwrap_or(0)
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub kind: String,
    pub title: String,
    pub prompt: String,
    pub status: String,
    pub attempts: i32,
    pub worker_id: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub result_summary: Option<String>,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub route_class: Option<String>,
    pub run_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Task> for TaskResponse {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            workspace_id: t.workspace_id.clone(),
            context_id: t.context_id.clone(),
            kind: t.kind.as_str().to_string(),
            title: t.title.clone(),
            prompt: t.prompt.clone(),
            status: t.status.as_str().to_string(),
            attempts: t.attempts,
            worker_id: t.worker_id,
            started_at: unix_or_zero(t.started_at),
            finished_at: unix_or_zero(t.finished_at),
            result_summary: t.result_summary.clone(),
            result_path: t.result_path.clone(),
            error_message: t.error_message.clone(),
            route_class: t.routing.route_class.clone(),
            run_key: t.run_key.clone(),
            created_at: unix_or_zero(Some(t.created_at)),
            updated_at: unix_or_zero(Some(t.updated_at)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub workspace_id: String,
    pub context_id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub route_class: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub assigned_lane: Option<String>,
    #[serde(default)]
    pub source_connector: Option<String>,
    #[serde(default)]
    pub source_external_id: Option<String>,
    #[serde(default)]
    pub source_user_id: Option<String>,
    #[serde(default)]
    pub source_text: Option<String>,
    #[serde(default)]
    pub run_key: Option<String>,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.workspace_id.trim().is_empty() {
        return Err(ApiError::from(StoreError::EmptyWorkspace));
    }
    if req.prompt.trim().is_empty() {
        return Err(ApiError::from(StoreError::EmptyPrompt));
    }
    let kind = match req.kind.as_deref() {
        Some(raw) => raw.parse::<TaskKind>().map_err(ApiError::bad_request)?,
        None => TaskKind::General,
    };

    let mut task = Task::new(req.workspace_id, req.context_id, kind, req.title, req.prompt);
    task.routing.route_class = req.route_class;
    task.routing.priority = req.priority;
    task.routing.assigned_lane = req.assigned_lane;
    task.source.source_connector = req.source_connector;
    task.source.source_external_id = req.source_external_id;
    task.source.source_user_id = req.source_user_id;
    task.source.source_text = req.source_text;
    task.run_key = req.run_key;

    let task = state.store.insert_task(task).await?;
    state.engine.enqueue(task.clone()).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "task_id": task.id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub id: Option<String>,
    pub workspace_id: Option<String>,
    pub context_id: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(id) = query.id {
        let task = state.store.get_task(&id).await?;
        return Ok(Json(serde_json::json!(TaskResponse::from(&task))));
    }

    let Some(workspace_id) = query.workspace_id else {
        return Err(ApiError::bad_request("either id or workspace_id is required"));
    };
    let kind = query
        .kind
        .map(|k| k.parse::<TaskKind>())
        .transpose()
        .map_err(ApiError::bad_request)?;
    let status = query
        .status
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .map_err(ApiError::bad_request)?;
    let limit = query
        .limit
        .unwrap_or(state.max_task_list_limit)
        .min(state.max_task_list_limit)
        .max(1);

    let tasks = state
        .store
        .list_tasks(TaskListFilter {
            workspace_id: Some(workspace_id),
            context_id: query.context_id,
            kind,
            status,
            limit,
        })
        .await?;

    let body: Vec<TaskResponse> = tasks.iter().map(TaskResponse::from).collect();
    Ok(Json(serde_json::json!(body)))
}

#[derive(Debug, Deserialize)]
pub struct RetryTaskRequest {
    pub task_id: String,
}

pub async fn retry_task(
    State(state): State<AppState>,
    Json(req): Json<RetryTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let original = state.store.get_task(&req.task_id).await?;
    if original.status != TaskStatus::Failed {
        return Err(ApiError::bad_request("only failed tasks can be retried"));
    }

    let mut retry = Task::new(
        original.workspace_id.clone(),
        original.context_id.clone(),
        original.kind,
        original.title.clone(),
        original.prompt.clone(),
    );
    retry.routing = original.routing.clone();
    retry.source = original.source.clone();

    let retry = state.store.insert_task(retry).await?;
    state.engine.enqueue(retry.clone()).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "task_id": retry.id, "retry_of_task": original.id })),
    ))
}
