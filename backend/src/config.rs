use std::env;
use std::time::Duration;

// Forces the resolver into mock mode regardless of any configured upstream.
pub const FORCE_MOCK_ENV: &str = "DASH_FORCE_MOCK";
// Upstream API base URL; absence is a valid state and resolves to mock mode.
pub const API_BASE_URL_ENV: &str = "DASH_API_BASE_URL";
// Path prefix applied between the base URL and each operation path.
pub const API_PATH_PREFIX_ENV: &str = "DASH_API_PATH_PREFIX";
// Stand-in credential handed out by the refresh endpoint when no live
// credential issuer exists. A simulation path, not a security mechanism.
pub const SESSION_TOKEN_ENV: &str = "DASH_SESSION_TOKEN";
pub const PORT_ENV: &str = "DASH_PORT";

const DEFAULT_PATH_PREFIX: &str = "/api";
const DEFAULT_SESSION_TOKEN: &str = "local-dev-session";
const DEFAULT_SESSION_TTL_SECONDS: u64 = 60 * 60 * 24 * 30;
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PORT: u16 = 8080;

/// Process configuration, read once at startup and passed into every
/// component. Handlers never touch the environment directly.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub force_mock: bool,
    pub api_base_url: Option<String>,
    pub api_path_prefix: String,
    pub session_token: String,
    pub session_ttl_seconds: u64,
    pub upstream_timeout: Duration,
    pub port: u16,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let force_mock = env::var(FORCE_MOCK_ENV)
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(false);
        let api_base_url = env::var(API_BASE_URL_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let api_path_prefix =
            env::var(API_PATH_PREFIX_ENV).unwrap_or_else(|_| DEFAULT_PATH_PREFIX.to_string());
        let session_token =
            env::var(SESSION_TOKEN_ENV).unwrap_or_else(|_| DEFAULT_SESSION_TOKEN.to_string());
        let port = env::var(PORT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            force_mock,
            api_base_url,
            api_path_prefix,
            session_token,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            port,
        }
    }

    pub fn with_force_mock(mut self, force_mock: bool) -> Self {
        self.force_mock = force_mock;
        self
    }

    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = Some(base_url.into());
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_path_prefix = prefix.into();
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = token.into();
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            force_mock: false,
            api_base_url: None,
            api_path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            session_token: DEFAULT_SESSION_TOKEN.to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            port: DEFAULT_PORT,
        }
    }
}
