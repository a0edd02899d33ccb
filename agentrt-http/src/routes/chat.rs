use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use agentrt_notifier::chatlog::{self, Direction};

use crate::error::ApiError;
use crate::state::{AppState, ChatTurn};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub connector: String,
    pub external_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub from_user_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub handled: bool,
    pub reply: String,
}

pub async fn post_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("text is required"));
    }
    let Some(gateway) = state.gateway.clone() else {
        return Err(ApiError::service_unavailable("message gateway is not configured"));
    };

    let context = match state
        .store
        .find_context_by_channel(&req.connector, &req.external_id)
        .await?
    {
        Some(ctx) => ctx,
        None => {
            let context_id = format!("chan-{}-{}", req.connector.to_lowercase(), req.external_id);
            state
                .store
                .ensure_context_for_external_channel(
                    &req.connector,
                    &req.external_id,
                    &state.default_workspace_id,
                    &context_id,
                    false,
                )
                .await?
        }
    };

    chatlog::append(
        &state.workspace_root,
        &context.workspace_id,
        &req.connector,
        &req.external_id,
        Direction::Inbound,
        &req.text,
    )
    .await
    .map_err(|err| ApiError::Status(axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    let turn = ChatTurn {
        workspace_id: context.workspace_id.clone(),
        context_id: context.context_id.clone(),
        connector: req.connector.clone(),
        external_id: req.external_id.clone(),
        display_name: req.display_name,
        from_user_id: req.from_user_id,
        text: req.text,
    };

    let reply = gateway
        .handle(turn)
        .await
        .map_err(|err| ApiError::Status(axum::http::StatusCode::BAD_GATEWAY, err))?;

    chatlog::append(
        &state.workspace_root,
        &context.workspace_id,
        &req.connector,
        &req.external_id,
        Direction::Outbound,
        &reply,
    )
    .await
    .map_err(|err| ApiError::Status(axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    Ok(Json(ChatResponse { handled: true, reply }))
}
