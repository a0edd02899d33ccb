//! Uniform `{"error": "<msg>"}` error body, mapped from `StoreError` or a
//! route-local message with an explicit status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use agentrt_shared::StoreError;

pub enum ApiError {
    Store(StoreError),
    Status(StatusCode, String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Status(StatusCode::BAD_REQUEST, msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        ApiError::Status(StatusCode::SERVICE_UNAVAILABLE, msg.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(err) => {
                let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, err.to_string())
            }
            ApiError::Status(status, message) => (status, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
