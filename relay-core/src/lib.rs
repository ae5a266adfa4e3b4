use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

/// Quiescence window applied to each date filter before it is treated as
/// settled, in milliseconds.
pub const DEBOUNCE_WINDOW_MS: u64 = 300;
/// Additional issue delay per priority step, in milliseconds.
pub const STAGGER_STEP_MS: u64 = 100;
/// Path prefix the relay serves data operations under. Feed endpoints are
/// normalized against it so the relay always sees a prefix-free path.
pub const RELAY_USER_PREFIX: &str = "/relay/user";

/// HTTP verbs the relay knows how to issue upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }

    pub fn from_str(value: &str) -> Option<Method> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "DELETE" => Some(Method::Delete),
            "PATCH" => Some(Method::Patch),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical data need, constructed fresh per cycle and discarded once the
/// corresponding fetch settles. `priority` is a staggering hint, not an
/// ordering guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub endpoint: String,
    pub method: Method,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: u32,
}

impl RequestDescriptor {
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::Post,
            params: BTreeMap::new(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// The only credential scheme the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

/// A bearer credential as issued to the browser. Opaque to this layer beyond
/// shape validation; never parsed or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    pub access_token: String,
    pub token_type: TokenType,
    pub expires_in_seconds: u64,
}

impl SessionCredential {
    pub fn bearer(access_token: impl Into<String>, expires_in_seconds: u64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: TokenType::Bearer,
            expires_in_seconds,
        }
    }
}

/// Normalized outcome of one relay call. Always this shape: a reachable but
/// erroring upstream and an unreachable upstream both land here, never as a
/// raw transport failure to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResult {
    pub status_code: u16,
    pub body: Value,
    pub is_error: bool,
}

impl RelayResult {
    pub fn ok(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            body,
            is_error: false,
        }
    }

    pub fn error(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            body,
            is_error: true,
        }
    }
}

/// Three-state result of a feed cycle. Exactly one of `loading = true` or a
/// terminal (`data` set xor `error` set) state holds at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> FetchState<T> {
    /// State before the first cycle settles.
    pub fn initial() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }

    /// A new cycle starting: prior data is retained until the new result
    /// settles, the prior error is cleared.
    pub fn begin_cycle(&self) -> Self
    where
        T: Clone,
    {
        Self {
            data: self.data.clone(),
            loading: true,
            error: None,
        }
    }

    pub fn settled_ok(data: T) -> Self {
        Self {
            data: Some(data),
            loading: false,
            error: None,
        }
    }

    /// A failed cycle: the error message is surfaced, prior data is kept.
    pub fn settled_err(&self, message: impl Into<String>) -> Self
    where
        T: Clone,
    {
        Self {
            data: self.data.clone(),
            loading: false,
            error: Some(message.into()),
        }
    }
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self::initial()
    }
}

/// A calendar date as the filter layer sees it: plain fields, no timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    /// `None` for field combinations that do not name a real date.
    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for CalendarDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self::from_naive)
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(date: NaiveDate) -> Self {
        Self::from_naive(date)
    }
}

/// A filter value as produced by the UI layer. Producers declare date-ness
/// here so downstream persistence branches on the tag instead of probing
/// shape; `Generic` carries anything else verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Date(CalendarDate),
    Generic(Value),
}

impl FilterValue {
    pub fn as_date(&self) -> Option<CalendarDate> {
        match self {
            FilterValue::Date(d) => Some(*d),
            FilterValue::Generic(_) => None,
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, FilterValue::Date(_))
    }
}

/// Structural probe for untagged values: an object exposing numeric `year`,
/// `month`, `day` fields counts as date-shaped regardless of extra fields.
pub fn is_date_shaped(value: &Value) -> bool {
    date_fields(value).is_some()
}

/// Extract the three calendar fields from a date-shaped value, ignoring
/// anything else present.
pub fn date_fields(value: &Value) -> Option<CalendarDate> {
    let obj = value.as_object()?;
    let year = obj.get("year")?.as_i64()?;
    let month = obj.get("month")?.as_u64()?;
    let day = obj.get("day")?.as_u64()?;
    Some(CalendarDate {
        year: year as i32,
        month: month as u32,
        day: day as u32,
    })
}

/// Build the upstream URL from a configured base, a configured path prefix
/// and the operation path. The base loses any trailing slash; the prefix is
/// applied exactly once even when the path already carries it.
pub fn join_upstream_url(base: &str, prefix: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let prefix = normalize_segment(prefix);
    let path = normalize_segment(path);

    if prefix.is_empty() || path == prefix || path.starts_with(&format!("{prefix}/")) {
        format!("{base}{path}")
    } else {
        format!("{base}{prefix}{path}")
    }
}

/// Leading slash, no trailing slash, empty stays empty.
fn normalize_segment(segment: &str) -> String {
    let trimmed = segment.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Normalize a caller-phrased endpoint to the stable, prefix-free operation
/// path the relay expects: `/relay/user/orders`, `relay/user/orders` and
/// `orders` all resolve to `orders`.
pub fn strip_relay_prefix(endpoint: &str) -> &str {
    let trimmed = endpoint.trim().trim_start_matches('/');
    let prefix = RELAY_USER_PREFIX.trim_start_matches('/');
    match trimmed.strip_prefix(prefix) {
        // Only strip on a segment boundary; "relay/userland" is not ours.
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => trimmed,
    }
}

/// Extract the token from an `Authorization` header value. The scheme check
/// is a literal `"Bearer "` prefix match; an empty token does not count.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let token = header_value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
