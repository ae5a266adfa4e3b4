use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Request-side failures the relay reports before touching the upstream.
/// Upstream failures never land here; they are normalized into a
/// `RelayResult` instead.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Missing or malformed bearer credential")]
    MissingCredential,

    #[error("Missing identifier for {0}")]
    MissingIdentifier(&'static str),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingCredential => StatusCode::UNAUTHORIZED,
            RelayError::MissingIdentifier(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
