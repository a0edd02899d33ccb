use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Serialize)]
struct HeartbeatResponse {
    #[serde(flatten)]
    snapshot: agentrt_shared::heartbeat::HeartbeatSnapshot,
    #[serde(rename = "staleAfter")]
    stale_after: u64,
}

pub async fn get_heartbeat(State(state): State<AppState>) -> impl IntoResponse {
    let Some(registry) = &state.heartbeat else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "heartbeat reporting is not enabled" })),
        )
            .into_response();
    };
    let snapshot = registry.snapshot(state.heartbeat_stale_after);
    let stale_after = state.heartbeat_stale_after.as_secs();
    Json(HeartbeatResponse { snapshot, stale_after }).into_response()
}
