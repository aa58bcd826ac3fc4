//! HTTP surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use memoryhole_core::{CaptchaError, IntakeCoordinator, IntakeError, Submission};
use serde::Serialize;

/// Builds the application router.
pub fn router(coordinator: Arc<IntakeCoordinator>) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .route("/health", get(health))
        .with_state(coordinator)
}

async fn submit(
    State(coordinator): State<Arc<IntakeCoordinator>>,
    Json(submission): Json<Submission>,
) -> Result<&'static str, ApiError> {
    coordinator.submit(submission).await?;
    Ok("ok")
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// An [`IntakeError`] rendered as `{ "error": ... }` with a status code.
#[derive(Debug)]
struct ApiError(IntakeError);

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        Self(err)
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match &self.0 {
            IntakeError::Rejected(CaptchaError::Rejected { .. }) => StatusCode::FORBIDDEN,
            IntakeError::Rejected(CaptchaError::Transport(_)) => StatusCode::BAD_GATEWAY,
            IntakeError::SinkFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
