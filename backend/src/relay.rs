use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::header::{AUTHORIZATION, COOKIE};
use serde_json::{json, Value};
use tracing::{debug, warn};

use relay_core::{bearer_token, join_upstream_url, Method, RelayResult, RequestDescriptor};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::mock;
use crate::mode::{resolve_mode, Mode};
use crate::AppState;

/// The only client headers that cross to the upstream. Everything else the
/// browser sent stays on this side of the relay.
#[derive(Debug, Clone, Default)]
pub struct ForwardedHeaders {
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

impl ForwardedHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let pick = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        Self {
            authorization: pick("authorization"),
            cookie: pick("cookie"),
        }
    }

    pub fn bearer(token: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {token}")),
            cookie: None,
        }
    }
}

/// Execute one relay call: validate the credential, resolve the mode, issue
/// the upstream call and normalize whatever comes back. Every outcome is a
/// `RelayResult`; a raw transport failure never escapes to the caller.
pub async fn forward(
    config: &RelayConfig,
    client: &reqwest::Client,
    descriptor: &RequestDescriptor,
    headers: &ForwardedHeaders,
    body: Option<&Value>,
) -> RelayResult {
    if headers
        .authorization
        .as_deref()
        .and_then(bearer_token)
        .is_none()
    {
        return RelayResult::error(
            401,
            json!({ "error": RelayError::MissingCredential.to_string() }),
        );
    }

    let decision = resolve_mode(config);
    let base = match (decision.mode, decision.api_base_url) {
        (Mode::Api, Some(base)) => base,
        _ => return mock::respond(descriptor, body),
    };

    let url = join_upstream_url(&base, &config.api_path_prefix, &descriptor.endpoint);
    debug!(method = %descriptor.method, %url, "relaying upstream");

    let method = match descriptor.method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
    };

    let mut request = client
        .request(method, &url)
        .timeout(config.upstream_timeout);
    if let Some(auth) = &headers.authorization {
        request = request.header(AUTHORIZATION, auth);
    }
    if let Some(cookie) = &headers.cookie {
        request = request.header(COOKIE, cookie);
    }
    if !descriptor.params.is_empty() {
        request = request.query(&descriptor.params);
    }
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return proxy_error(err),
    };

    let status = response.status().as_u16();
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) => return proxy_error(err),
    };

    let body = decode_body(&text);
    if (200..300).contains(&status) {
        RelayResult::ok(status, body)
    } else {
        warn!(status, %url, "upstream returned an error");
        RelayResult::error(status, body)
    }
}

/// Structured decode with raw-text fallback: a non-JSON body is carried
/// unchanged, never thrown away.
fn decode_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn proxy_error(err: reqwest::Error) -> RelayResult {
    warn!(error = %err, "upstream unreachable");
    RelayResult::error(500, json!({ "error": format!("Proxy Error: {err}") }))
}

/// Render a normalized result back to the browser. Errors always come out as
/// `{ "error": ... }`, with the upstream payload under `details` when it was
/// structured but not already in that shape.
pub fn into_http(result: RelayResult) -> Response {
    let status =
        StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !result.is_error {
        return (status, Json(result.body)).into_response();
    }
    let payload = match &result.body {
        Value::String(text) => json!({ "error": text }),
        Value::Null => json!({ "error": "Upstream error" }),
        Value::Object(obj) if obj.contains_key("error") => result.body.clone(),
        other => json!({ "error": "Upstream error", "details": other }),
    };
    (status, Json(payload)).into_response()
}

pub async fn user_verb_handler(
    State(state): State<AppState>,
    Path(verb): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    let mut descriptor = RequestDescriptor::post(verb);
    descriptor.params = params;

    let forwarded = ForwardedHeaders::from_headers(&headers);
    let body = body.map(|Json(value)| value);
    let result = forward(
        &state.config,
        &state.client,
        &descriptor,
        &forwarded,
        body.as_ref(),
    )
    .await;
    into_http(result)
}

/// Browser-facing DELETE, issued upstream as PATCH. The identifying path
/// parameter is validated before any upstream call is constructed.
pub async fn delete_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if id.trim().is_empty() {
        return RelayError::MissingIdentifier("delete-user").into_response();
    }

    let descriptor = RequestDescriptor {
        endpoint: format!("delete-user/{}", id.trim()),
        method: Method::Patch,
        params: BTreeMap::new(),
        priority: 0,
    };

    let forwarded = ForwardedHeaders::from_headers(&headers);
    let result = forward(&state.config, &state.client, &descriptor, &forwarded, None).await;
    into_http(result)
}
