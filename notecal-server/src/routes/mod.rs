pub mod admin;
pub mod health;
pub mod webhook;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notecal_core::SyncError;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Every route the server exposes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhook::router())
        .merge(admin::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error with the HTTP status it should be reported as.
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        AppError {
            status,
            error: anyhow::anyhow!(message.into()),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.error, "Request failed");
        }
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
        });
        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        let status = match error.downcast_ref::<SyncError>() {
            Some(SyncError::Config(_)) => StatusCode::BAD_REQUEST,
            Some(SyncError::CalendarNotInitialized) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError { status, error }
    }
}
