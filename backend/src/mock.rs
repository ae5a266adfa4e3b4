use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use relay_core::{RelayResult, RequestDescriptor};

// Bounds a runaway date range; a year of daily points is plenty for charts.
const MAX_SERIES_POINTS: i64 = 366;

/// Answer a relay call locally. Same response shape as a live upstream so
/// clients cannot tell mock mode apart from api mode.
pub fn respond(descriptor: &RequestDescriptor, body: Option<&Value>) -> RelayResult {
    if let Some(id) = descriptor.endpoint.strip_prefix("delete-user/") {
        return RelayResult::ok(200, json!({ "message": "User deleted", "id": id }));
    }

    let (from, to) = date_range(body);
    let series = simulated_series(&descriptor.endpoint, from, to);
    let total: f64 = series.iter().map(|(_, v)| v).sum();

    RelayResult::ok(
        200,
        json!({
            "total": round_two(total),
            "series": series
                .iter()
                .map(|(date, value)| json!({ "date": date.format("%Y-%m-%d").to_string(), "value": value }))
                .collect::<Vec<_>>(),
        }),
    )
}

fn date_range(body: Option<&Value>) -> (NaiveDate, NaiveDate) {
    let today = Utc::now().date_naive();
    let parse = |key: &str| {
        body.and_then(|b| b.get(key))
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    };
    let to = parse("toDate").unwrap_or(today);
    let from = parse("fromDate").unwrap_or_else(|| to - Duration::days(29));
    if from > to {
        (to, to)
    } else {
        (from, to)
    }
}

/// Deterministic per endpoint and range so reloads render stable charts.
fn simulated_series(endpoint: &str, from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDate, f64)> {
    let mut hasher = DefaultHasher::new();
    endpoint.hash(&mut hasher);
    from.hash(&mut hasher);
    to.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());

    let base: f64 = rng.gen_range(50.0..500.0);
    let days = (to - from).num_days().min(MAX_SERIES_POINTS - 1);

    let mut points = Vec::with_capacity(days as usize + 1);
    let mut level = base;
    for offset in 0..=days {
        let delta: f64 = rng.gen_range(-0.1..0.1);
        level = (level * (1.0 + delta)).max(0.0);
        points.push((from + Duration::days(offset), round_two(level)));
    }
    points
}

fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
