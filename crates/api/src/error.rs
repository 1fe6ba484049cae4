//! API errors and response envelope

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

/// Uniform response body: `{"status": "success" | "fail", "result": ...}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub result: T,
}

pub fn success<T: Serialize>(result: T) -> Json<Envelope<T>> {
    Json(Envelope {
        status: "success",
        result,
    })
}

/// Errors returned to API callers as the fail envelope with HTTP 417
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Intake(#[from] alerting::IntakeError),
    #[error(transparent)]
    Render(#[from] alerting::RenderError),
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    #[error(transparent)]
    Mute(#[from] mute::MuteError),
    #[error(transparent)]
    Dispatch(#[from] dispatch::DispatchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        warn!(error = %message, "Request failed");

        let body = Envelope {
            status: "fail",
            result: message,
        };
        (StatusCode::EXPECTATION_FAILED, Json(body)).into_response()
    }
}
