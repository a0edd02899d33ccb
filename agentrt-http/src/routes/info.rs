use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn get_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.info.clone())
}
