use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::RelayConfig;
use crate::AppState;

/// Whether outbound calls are answered locally or forwarded upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Mock,
    Api,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Mock => "mock",
            Mode::Api => "api",
        }
    }
}

/// Per-process decision; pure function of configuration, safe to call at any
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDecision {
    pub mode: Mode,
    pub api_base_url: Option<String>,
}

/// Decision order: the force-mock flag wins, then a configured base URL
/// selects api mode, and absence of both is mock mode (not an error).
pub fn resolve_mode(config: &RelayConfig) -> ModeDecision {
    if config.force_mock {
        return ModeDecision {
            mode: Mode::Mock,
            api_base_url: None,
        };
    }
    match &config.api_base_url {
        Some(url) => ModeDecision {
            mode: Mode::Api,
            api_base_url: Some(url.clone()),
        },
        None => ModeDecision {
            mode: Mode::Mock,
            api_base_url: None,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeResponse {
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    pub message: String,
}

pub async fn mode_handler(State(state): State<AppState>) -> Json<ModeResponse> {
    let decision = resolve_mode(&state.config);
    let message = match decision.mode {
        Mode::Mock => "Responses are simulated locally".to_string(),
        Mode::Api => "Requests are forwarded to the configured backend".to_string(),
    };
    Json(ModeResponse {
        mode: decision.mode,
        api_url: decision.api_base_url,
        message,
    })
}
