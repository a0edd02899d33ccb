use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use agentrt_shared::{Objective, TriggerType};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateObjectiveRequest {
    pub workspace_id: String,
    pub context_id: String,
    pub title: String,
    pub prompt: String,
    pub trigger_type: String,
    #[serde(default)]
    pub cron_expr: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub event_key: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create_objective(
    State(state): State<AppState>,
    Json(req): Json<CreateObjectiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let trigger_type = req
        .trigger_type
        .parse::<TriggerType>()
        .map_err(ApiError::bad_request)?;

    let now = Utc::now();
    let mut objective = Objective {
        id: format!("obj-{}", uuid::Uuid::new_v4()),
        workspace_id: req.workspace_id,
        context_id: req.context_id,
        title: req.title,
        prompt: req.prompt,
        trigger_type,
        cron_expr: req.cron_expr,
        timezone: req.timezone,
        event_key: req.event_key,
        next_run_at: None,
        run_count: 0,
        success_count: 0,
        failure_count: 0,
        consecutive_failures: 0,
        last_error: None,
        last_success_at: None,
        last_failure_at: None,
        active: req.active,
        auto_paused_reason: None,
        created_at: now,
        updated_at: now,
    };

    if trigger_type == TriggerType::Schedule {
        objective.next_run_at = Some(
            agentrt_scheduler::compute_next_run(&objective).map_err(ApiError::bad_request)?,
        );
    }

    let created = state.store.create_objective(objective).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(created))))
}

#[derive(Debug, Deserialize)]
pub struct ListObjectivesQuery {
    pub workspace_id: Option<String>,
    pub id: Option<String>,
}

pub async fn get_objectives(
    State(state): State<AppState>,
    Query(query): Query<ListObjectivesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(id) = query.id {
        let objective = state.store.get_objective(&id).await?;
        return Ok(Json(serde_json::json!(objective)));
    }
    let Some(workspace_id) = query.workspace_id else {
        return Err(ApiError::bad_request("either id or workspace_id is required"));
    };
    let objectives = state.store.list_objectives(&workspace_id).await?;
    Ok(Json(serde_json::json!(objectives)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateObjectiveRequest {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub cron_expr: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub event_key: Option<String>,
}

pub async fn update_objective(
    State(state): State<AppState>,
    Json(req): Json<UpdateObjectiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut objective = state.store.get_objective(&req.id).await?;
    if let Some(title) = req.title {
        objective.title = title;
    }
    if let Some(prompt) = req.prompt {
        objective.prompt = prompt;
    }
    if req.cron_expr.is_some() {
        objective.cron_expr = req.cron_expr;
    }
    if req.timezone.is_some() {
        objective.timezone = req.timezone;
    }
    if req.event_key.is_some() {
        objective.event_key = req.event_key;
    }
    if objective.trigger_type == TriggerType::Schedule {
        objective.next_run_at = Some(
            agentrt_scheduler::compute_next_run(&objective).map_err(ApiError::bad_request)?,
        );
    }
    objective.updated_at = Utc::now();

    let updated = state.store.update_objective(objective).await?;
    Ok(Json(serde_json::json!(updated)))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub id: String,
    pub active: bool,
}

pub async fn set_objective_active(
    State(state): State<AppState>,
    Json(req): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let objective = state.store.set_objective_active(&req.id, req.active).await?;
    Ok(Json(serde_json::json!(objective)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteObjectiveRequest {
    pub id: String,
}

pub async fn delete_objective(
    State(state): State<AppState>,
    Json(req): Json<DeleteObjectiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_objective(&req.id).await?;
    Ok(Json(serde_json::json!({ "deleted": req.id })))
}
