use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use relay_core::SessionCredential;

use crate::error::RelayError;
use crate::AppState;

/// The forwarded header must be present and begin with the literal
/// `"Bearer "` prefix; anything else gets no credential.
fn validated_bearer(headers: &HeaderMap) -> Result<(), RelayError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(relay_core::bearer_token)
        .map(|_| ())
        .ok_or(RelayError::MissingCredential)
}

/// Answer a refresh request with a renewed credential. Without a live
/// credential issuer this hands out the locally-held long-lived stand-in
/// from configuration; a simulation path, not a security mechanism.
pub async fn refresh_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = validated_bearer(&headers) {
        return err.into_response();
    }
    let credential = SessionCredential::bearer(
        state.config.session_token.clone(),
        state.config.session_ttl_seconds,
    );
    Json(credential).into_response()
}

/// No server-side session table exists, so logout is a confirmation once the
/// same header-presence check passes.
pub async fn logout_handler(headers: HeaderMap) -> Response {
    if let Err(err) = validated_bearer(&headers) {
        return err.into_response();
    }
    Json(json!({ "message": "Logged out" })).into_response()
}
