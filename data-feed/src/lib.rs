//! Fetch orchestration for dashboard widgets.
//!
//! Each widget owns a `DataFeed`: date-range changes are debounced per field,
//! cycle starts are staggered by priority so a page full of widgets does not
//! stampede the relay, and the latest `FetchState` snapshot is published over
//! a watch channel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

use relay_core::{
    strip_relay_prefix, FetchState, RelayResult, RequestDescriptor, DEBOUNCE_WINDOW_MS,
    STAGGER_STEP_MS,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Transport seam between feeds and the relay. Concrete implementations are
/// the reqwest-backed `RelayTransport` and test doubles.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        body: &Value,
    ) -> Result<RelayResult, FeedError>;
}

/// Same-origin relay transport. Every feed call is a single POST carrying
/// `{fromDate, toDate}`, whatever the logical semantics of the operation.
pub struct RelayTransport {
    origin: String,
    client: reqwest::Client,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl RelayTransport {
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into().trim_end_matches('/').to_string();
        Self {
            origin,
            client: reqwest::Client::new(),
            bearer_token: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FeedTransport for RelayTransport {
    async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        body: &Value,
    ) -> Result<RelayResult, FeedError> {
        let url = format!("{}/relay/user/{}", self.origin, descriptor.endpoint);
        let mut request = self.client.post(&url).timeout(self.timeout).json(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
        };

        Ok(if (200..300).contains(&status) {
            RelayResult::ok(status, body)
        } else {
            RelayResult::error(status, body)
        })
    }
}

/// Everything a cycle depends on. Dates are debounced before they count;
/// endpoint and priority count immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FeedInputs {
    endpoint: String,
    from_date: NaiveDate,
    to_date: NaiveDate,
    priority: u32,
}

/// A live feed subscription. Dropping the handle stops the worker task.
pub struct DataFeed<T> {
    inputs: watch::Sender<FeedInputs>,
    state: watch::Receiver<FetchState<T>>,
    task: JoinHandle<()>,
}

impl<T> DataFeed<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn spawn(
        transport: Arc<dyn FeedTransport>,
        endpoint: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
        priority: u32,
    ) -> Self {
        let inputs = FeedInputs {
            endpoint: strip_relay_prefix(endpoint).to_string(),
            from_date,
            to_date,
            priority,
        };
        let (input_tx, input_rx) = watch::channel(inputs);
        let (state_tx, state_rx) = watch::channel(FetchState::initial());
        let task = tokio::spawn(run_feed::<T>(transport, input_rx, state_tx));

        Self {
            inputs: input_tx,
            state: state_rx,
            task,
        }
    }

    pub fn set_from_date(&self, from_date: NaiveDate) {
        self.inputs.send_if_modified(|inputs| {
            let changed = inputs.from_date != from_date;
            inputs.from_date = from_date;
            changed
        });
    }

    pub fn set_to_date(&self, to_date: NaiveDate) {
        self.inputs.send_if_modified(|inputs| {
            let changed = inputs.to_date != to_date;
            inputs.to_date = to_date;
            changed
        });
    }

    pub fn set_endpoint(&self, endpoint: &str) {
        let endpoint = strip_relay_prefix(endpoint).to_string();
        self.inputs.send_if_modified(|inputs| {
            let changed = inputs.endpoint != endpoint;
            inputs.endpoint = endpoint;
            changed
        });
    }

    pub fn set_priority(&self, priority: u32) {
        self.inputs.send_if_modified(|inputs| {
            let changed = inputs.priority != priority;
            inputs.priority = priority;
            changed
        });
    }

    /// Subscribe to state snapshots; the receiver always holds the latest.
    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.state.clone()
    }

    /// Current snapshot.
    pub fn state(&self) -> FetchState<T> {
        self.state.borrow().clone()
    }
}

impl<T> Drop for DataFeed<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn stagger_delay(priority: u32) -> Duration {
    Duration::from_millis(priority as u64 * STAGGER_STEP_MS)
}

/// The worker loop. Three cancellable deadlines (one debounce per date
/// field, one stagger for the pending cycle) are recomputed on every
/// dependency change; at most one of each is live at a time. The network
/// call is awaited inline, so cycles are strictly sequential.
async fn run_feed<T>(
    transport: Arc<dyn FeedTransport>,
    mut inputs_rx: watch::Receiver<FeedInputs>,
    state_tx: watch::Sender<FetchState<T>>,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let debounce = Duration::from_millis(DEBOUNCE_WINDOW_MS);

    let mut raw = inputs_rx.borrow().clone();
    let mut settled = raw.clone();

    let mut from_deadline: Option<Instant> = None;
    let mut to_deadline: Option<Instant> = None;
    // Construction counts as the first dependency change: the mount cycle
    // goes out after the stagger delay alone.
    let mut stagger_deadline: Option<Instant> = Some(Instant::now() + stagger_delay(raw.priority));

    loop {
        let next = [from_deadline, to_deadline, stagger_deadline]
            .into_iter()
            .flatten()
            .min();

        tokio::select! {
            changed = inputs_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = inputs_rx.borrow_and_update().clone();
                if current.from_date != raw.from_date {
                    from_deadline = Some(Instant::now() + debounce);
                }
                if current.to_date != raw.to_date {
                    to_deadline = Some(Instant::now() + debounce);
                }
                if current.endpoint != settled.endpoint || current.priority != settled.priority {
                    settled.endpoint = current.endpoint.clone();
                    settled.priority = current.priority;
                    stagger_deadline = Some(Instant::now() + stagger_delay(settled.priority));
                }
                raw = current;
            }
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let now = Instant::now();
                let mut dates_settled = false;

                if from_deadline.is_some_and(|deadline| deadline <= now) {
                    from_deadline = None;
                    if settled.from_date != raw.from_date {
                        settled.from_date = raw.from_date;
                        dates_settled = true;
                    }
                }
                if to_deadline.is_some_and(|deadline| deadline <= now) {
                    to_deadline = None;
                    if settled.to_date != raw.to_date {
                        settled.to_date = raw.to_date;
                        dates_settled = true;
                    }
                }
                if dates_settled {
                    stagger_deadline = Some(now + stagger_delay(settled.priority));
                }
                if stagger_deadline.is_some_and(|deadline| deadline <= now) {
                    stagger_deadline = None;
                    run_cycle(transport.as_ref(), &settled, &state_tx).await;
                }
            }
        }
    }
}

async fn run_cycle<T>(
    transport: &dyn FeedTransport,
    inputs: &FeedInputs,
    state_tx: &watch::Sender<FetchState<T>>,
) where
    T: DeserializeOwned + Clone,
{
    state_tx.send_modify(|state| *state = state.begin_cycle());

    let descriptor =
        RequestDescriptor::post(inputs.endpoint.clone()).with_priority(inputs.priority);
    let body = json!({
        "fromDate": inputs.from_date.format("%Y-%m-%d").to_string(),
        "toDate": inputs.to_date.format("%Y-%m-%d").to_string(),
    });
    debug!(endpoint = %inputs.endpoint, priority = inputs.priority, "issuing feed cycle");

    match transport.execute(&descriptor, &body).await {
        Ok(result) if !result.is_error => match serde_json::from_value::<T>(result.body) {
            Ok(data) => state_tx.send_modify(|state| *state = FetchState::settled_ok(data)),
            Err(err) => {
                let message = format!("Failed to decode response: {err}");
                state_tx.send_modify(|state| *state = state.settled_err(message.clone()));
            }
        },
        Ok(result) => {
            let message = result.body["error"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Request failed with status {}", result.status_code));
            state_tx.send_modify(|state| *state = state.settled_err(message.clone()));
        }
        Err(err) => {
            let message = err.to_string();
            state_tx.send_modify(|state| *state = state.settled_err(message.clone()));
        }
    }
}
