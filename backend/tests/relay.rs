use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use backend::config::RelayConfig;
use backend::relay::{forward, ForwardedHeaders};
use backend::AppState;
use relay_core::RequestDescriptor;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

#[derive(Clone)]
struct StubState {
    status: u16,
    content_type: &'static str,
    body: &'static str,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

async fn stub_handler(State(stub): State<StubState>, req: Request) -> Response {
    stub.calls.fetch_add(1, Ordering::SeqCst);
    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    stub.requests.lock().unwrap().push(Recorded {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        headers,
    });

    (
        StatusCode::from_u16(stub.status).unwrap(),
        [("content-type", stub.content_type)],
        Body::from(stub.body),
    )
        .into_response()
}

/// Scripted upstream bound to an ephemeral local port, with a call counter
/// so tests can assert the relay never reached it.
struct StubUpstream {
    base_url: String,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubUpstream {
    async fn start(status: u16, content_type: &'static str, body: &'static str) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            status,
            content_type,
            body,
            calls: Arc::clone(&calls),
            requests: Arc::clone(&requests),
        };
        let app = Router::new().fallback(stub_handler).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            calls,
            requests,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> Recorded {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("stub upstream saw no request")
    }
}

async fn spawn_relay(config: RelayConfig) -> String {
    let app = backend::router(AppState::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn api_config(base_url: &str) -> RelayConfig {
    RelayConfig::default().with_api_base_url(base_url)
}

#[tokio::test]
async fn missing_authorization_never_reaches_upstream() {
    let upstream = StubUpstream::start(200, "application/json", r#"{"total":42}"#).await;
    let relay = spawn_relay(api_config(&upstream.base_url)).await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/relay/user/orders"))
        .json(&json!({ "fromDate": "2024-01-01", "toDate": "2024-01-31" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn successful_upstream_call_normalizes_to_relay_result() {
    let upstream = StubUpstream::start(200, "application/json", r#"{"total":42}"#).await;
    let config = api_config(&upstream.base_url);

    let result = forward(
        &config,
        &reqwest::Client::new(),
        &RequestDescriptor::post("orders"),
        &ForwardedHeaders::bearer("tok"),
        Some(&json!({ "fromDate": "2024-01-01", "toDate": "2024-01-31" })),
    )
    .await;

    assert_eq!(result.status_code, 200);
    assert!(!result.is_error);
    assert_eq!(result.body, json!({ "total": 42 }));
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn non_json_error_body_is_carried_as_raw_text() {
    let upstream = StubUpstream::start(503, "text/plain", "Service Unavailable").await;
    let config = api_config(&upstream.base_url);

    let result = forward(
        &config,
        &reqwest::Client::new(),
        &RequestDescriptor::post("orders"),
        &ForwardedHeaders::bearer("tok"),
        None,
    )
    .await;

    assert_eq!(result.status_code, 503);
    assert!(result.is_error);
    assert_eq!(result.body, Value::String("Service Unavailable".into()));
}

#[tokio::test]
async fn upstream_error_surfaces_as_json_error_shape_over_http() {
    let upstream = StubUpstream::start(503, "text/plain", "Service Unavailable").await;
    let relay = spawn_relay(api_config(&upstream.base_url)).await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/relay/user/orders"))
        .header("authorization", "Bearer tok")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Service Unavailable" }));
}

#[tokio::test]
async fn structured_upstream_error_passes_through() {
    let upstream = StubUpstream::start(404, "application/json", r#"{"error":"not found"}"#).await;
    let relay = spawn_relay(api_config(&upstream.base_url)).await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/relay/user/orders"))
        .header("authorization", "Bearer tok")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "not found" }));
}

#[tokio::test]
async fn unreachable_upstream_becomes_proxy_error() {
    // Bind then drop a listener so the port is known-dead.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = forward(
        &api_config(&dead),
        &reqwest::Client::new(),
        &RequestDescriptor::post("orders"),
        &ForwardedHeaders::bearer("tok"),
        None,
    )
    .await;

    assert_eq!(result.status_code, 500);
    assert!(result.is_error);
    let message = result.body["error"].as_str().unwrap();
    assert!(message.starts_with("Proxy Error: "), "got: {message}");
}

#[tokio::test]
async fn blank_delete_id_short_circuits_before_upstream() {
    let upstream = StubUpstream::start(200, "application/json", "{}").await;
    let relay = spawn_relay(api_config(&upstream.base_url)).await;

    let response = reqwest::Client::new()
        .delete(format!("{relay}/relay/user/delete-user/%20"))
        .header("authorization", "Bearer tok")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn delete_user_issues_upstream_patch() {
    let upstream = StubUpstream::start(200, "application/json", r#"{"message":"ok"}"#).await;
    let relay = spawn_relay(api_config(&upstream.base_url)).await;

    let response = reqwest::Client::new()
        .delete(format!("{relay}/relay/user/delete-user/abc"))
        .header("authorization", "Bearer tok")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(upstream.call_count(), 1);

    let recorded = upstream.last_request();
    assert_eq!(recorded.method, "PATCH");
    assert_eq!(recorded.path, "/api/delete-user/abc");
}

#[tokio::test]
async fn only_credential_headers_cross_to_upstream() {
    let upstream = StubUpstream::start(200, "application/json", "{}").await;
    let relay = spawn_relay(api_config(&upstream.base_url)).await;

    reqwest::Client::new()
        .post(format!("{relay}/relay/user/orders"))
        .header("authorization", "Bearer tok")
        .header("cookie", "session=1")
        .header("x-dashboard-build", "dev")
        .send()
        .await
        .unwrap();

    let recorded = upstream.last_request();
    let names: Vec<&str> = recorded.headers.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"authorization"));
    assert!(names.contains(&"cookie"));
    assert!(!names.contains(&"x-dashboard-build"));
}

#[tokio::test]
async fn refresh_hands_out_stand_in_credential() {
    let relay = spawn_relay(RelayConfig::default().with_session_token("stand-in")).await;
    let client = reqwest::Client::new();

    let denied = client
        .post(format!("{relay}/relay/auth/refresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let renewed = client
        .get(format!("{relay}/relay/auth/refresh"))
        .header("authorization", "Bearer old-token")
        .send()
        .await
        .unwrap();
    assert_eq!(renewed.status().as_u16(), 200);
    let body: Value = renewed.json().await.unwrap();
    assert_eq!(body["accessToken"], "stand-in");
    assert_eq!(body["tokenType"], "Bearer");
    assert!(body["expiresInSeconds"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn logout_confirms_when_credential_present() {
    let relay = spawn_relay(RelayConfig::default()).await;
    let client = reqwest::Client::new();

    let denied = client
        .post(format!("{relay}/relay/auth/logout"))
        .header("authorization", "Basic nope")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let confirmed = client
        .post(format!("{relay}/relay/auth/logout"))
        .header("authorization", "Bearer tok")
        .send()
        .await
        .unwrap();
    assert_eq!(confirmed.status().as_u16(), 200);
    let body: Value = confirmed.json().await.unwrap();
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn mode_endpoint_reports_decision() {
    let mock_relay = spawn_relay(RelayConfig::default()).await;
    let body: Value = reqwest::get(format!("{mock_relay}/auth/mode"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["mode"], "mock");
    assert!(body.get("apiUrl").is_none());
    assert!(body["message"].is_string());

    let api_relay = spawn_relay(api_config("https://api.example.com")).await;
    let body: Value = reqwest::get(format!("{api_relay}/auth/mode"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["mode"], "api");
    assert_eq!(body["apiUrl"], "https://api.example.com");
}

#[tokio::test]
async fn force_mock_answers_locally_even_with_base_url() {
    let upstream = StubUpstream::start(200, "application/json", "{}").await;
    let relay = spawn_relay(api_config(&upstream.base_url).with_force_mock(true)).await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/relay/user/orders"))
        .header("authorization", "Bearer tok")
        .json(&json!({ "fromDate": "2024-01-01", "toDate": "2024-01-07" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["series"].as_array().unwrap().len(), 7);
    assert_eq!(upstream.call_count(), 0);
}
