//! Same-origin relay for the operations dashboard.
//!
//! The browser never talks to the upstream metrics API directly: every data
//! call lands here, gets its bearer credential validated, and is either
//! forwarded upstream (api mode) or answered by the local simulator (mock
//! mode). Upstream failure shapes are normalized before anything reaches the
//! browser.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, Method},
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod auth;
pub mod config;
pub mod error;
pub mod mock;
pub mod mode;
pub mod relay;

use config::RelayConfig;
use mode::resolve_mode;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: reqwest::Client::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/relay/user/:verb", post(relay::user_verb_handler))
        .route(
            "/relay/user/delete-user/:id",
            delete(relay::delete_user_handler),
        )
        .route(
            "/relay/auth/refresh",
            post(auth::refresh_handler).get(auth::refresh_handler),
        )
        .route("/relay/auth/logout", post(auth::logout_handler))
        .route("/auth/mode", get(mode::mode_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(config: RelayConfig) {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let decision = resolve_mode(&config);
    info!(mode = decision.mode.as_str(), "resolved relay mode");

    let address = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config);
    let app = router(state);

    let listener = TcpListener::bind(&address)
        .await
        .expect("bind relay address");
    info!("Relay listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("relay server failed");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
