//! Cross-session diff (spec section 4.6): `compareSessions(a, b)`
//! produces per-metric deltas classified as regression, improvement, or
//! unchanged.
//!
//! No teacher equivalent exists for this computation; it is implemented
//! as plain functions over `rts-core`/`rts-session` types, following the
//! classification rules of spec section 4.6 verbatim.

use std::collections::HashSet;

use rts_core::VitalRating;
use serde::{Deserialize, Serialize};

use crate::aggregate::SessionAggregate;
use crate::snapshot::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Regression,
    Improvement,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDelta {
    pub key: String,
    pub before: f64,
    pub after: f64,
    pub delta: f64,
    pub percent_change: f64,
    pub classification: Classification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDiffResult {
    pub endpoint_deltas: Vec<MetricDelta>,
    pub component_deltas: Vec<MetricDelta>,
    pub store_deltas: Vec<MetricDelta>,
    pub web_vital_deltas: Vec<MetricDelta>,
    pub query_deltas: Vec<MetricDelta>,
    pub error_count_delta: i64,
    pub total_events_delta: i64,
}

#[derive(Debug, Clone, Copy)]
enum MetricFamily {
    Latency,
    ErrorRate,
    CallCount,
}

fn percent_change(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        if after == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        ((after - before) / before) * 100.0
    }
}

fn classify(before: f64, after: f64, family: MetricFamily) -> MetricDelta {
    classify_named(String::new(), before, after, family)
}

fn classify_named(key: String, before: f64, after: f64, family: MetricFamily) -> MetricDelta {
    let delta = after - before;
    let pct = percent_change(before, after);

    let classification = if pct.abs() < 5.0 {
        Classification::Unchanged
    } else {
        match family {
            MetricFamily::Latency => {
                if delta > 0.0 && pct.abs() >= 10.0 {
                    Classification::Regression
                } else if delta < 0.0 {
                    Classification::Improvement
                } else {
                    Classification::Unchanged
                }
            }
            MetricFamily::ErrorRate => {
                if delta > 0.0 {
                    Classification::Regression
                } else if delta < 0.0 {
                    Classification::Improvement
                } else {
                    Classification::Unchanged
                }
            }
            MetricFamily::CallCount => {
                if delta > 0.0 && pct >= 25.0 {
                    Classification::Regression
                } else if delta < 0.0 {
                    Classification::Improvement
                } else {
                    Classification::Unchanged
                }
            }
        }
    };

    MetricDelta { key, before, after, delta, percent_change: pct, classification }
}

fn classify_web_vital(metric_name: &str, before: f64, after: f64) -> MetricDelta {
    let pct = percent_change(before, after);
    let delta = after - before;

    let classification = if pct.abs() < 5.0 {
        Classification::Unchanged
    } else {
        let before_rating = rts_core::normalize::rate_web_vital(metric_name, before);
        let after_rating = rts_core::normalize::rate_web_vital(metric_name, after);
        rating_classification(before_rating, after_rating)
    };

    MetricDelta {
        key: metric_name.to_string(),
        before,
        after,
        delta,
        percent_change: pct,
        classification,
    }
}

fn rating_rank(rating: VitalRating) -> u8 {
    match rating {
        VitalRating::Good => 0,
        VitalRating::NeedsImprovement => 1,
        VitalRating::Poor => 2,
    }
}

fn rating_classification(before: VitalRating, after: VitalRating) -> Classification {
    match rating_rank(after).cmp(&rating_rank(before)) {
        std::cmp::Ordering::Greater => Classification::Regression,
        std::cmp::Ordering::Less => Classification::Improvement,
        std::cmp::Ordering::Equal => Classification::Unchanged,
    }
}

fn keys_union<V>(a: &std::collections::HashMap<String, V>, b: &std::collections::HashMap<String, V>) -> Vec<String> {
    let mut keys: HashSet<&String> = a.keys().collect();
    keys.extend(b.keys());
    let mut sorted: Vec<String> = keys.into_iter().cloned().collect();
    sorted.sort();
    sorted
}

/// Computes the diff between two session snapshots, per spec section
/// 4.6. Deterministic given the final aggregates (testable property 7):
/// no ordering of the underlying event streams affects the result,
/// since the aggregates are already fully reduced by the time this runs.
pub fn compare_sessions(a: &SessionSnapshot, b: &SessionSnapshot) -> SessionDiffResult {
    let agg_a = &a.aggregate;
    let agg_b = &b.aggregate;

    let endpoint_deltas = keys_union(&agg_a.endpoints, &agg_b.endpoints)
        .into_iter()
        .flat_map(|key| endpoint_deltas_for(&key, agg_a, agg_b))
        .collect();

    let component_deltas = keys_union(&agg_a.components, &agg_b.components)
        .into_iter()
        .map(|key| {
            let before = agg_a.components.get(&key).map(|m| m.avg_duration).unwrap_or(0.0);
            let after = agg_b.components.get(&key).map(|m| m.avg_duration).unwrap_or(0.0);
            classify_named(format!("{key} avgDuration"), before, after, MetricFamily::Latency)
        })
        .collect();

    let store_deltas = keys_union(&agg_a.stores, &agg_b.stores)
        .into_iter()
        .map(|key| {
            let before = agg_a.stores.get(&key).map(|m| m.update_count as f64).unwrap_or(0.0);
            let after = agg_b.stores.get(&key).map(|m| m.update_count as f64).unwrap_or(0.0);
            classify_named(format!("{key} updateCount"), before, after, MetricFamily::CallCount)
        })
        .collect();

    let web_vital_deltas = keys_union(&agg_a.web_vitals, &agg_b.web_vitals)
        .into_iter()
        .map(|key| {
            let before = agg_a.web_vitals.get(&key).map(|m| m.value).unwrap_or(0.0);
            let after = agg_b.web_vitals.get(&key).map(|m| m.value).unwrap_or(0.0);
            classify_web_vital(&key, before, after)
        })
        .collect();

    let query_deltas = keys_union(&agg_a.queries, &agg_b.queries)
        .into_iter()
        .map(|key| {
            let before = agg_a.queries.get(&key).map(|m| m.avg_duration).unwrap_or(0.0);
            let after = agg_b.queries.get(&key).map(|m| m.avg_duration).unwrap_or(0.0);
            classify_named(format!("{key} avgDuration"), before, after, MetricFamily::Latency)
        })
        .collect();

    SessionDiffResult {
        endpoint_deltas,
        component_deltas,
        store_deltas,
        web_vital_deltas,
        query_deltas,
        error_count_delta: agg_b.error_count as i64 - agg_a.error_count as i64,
        total_events_delta: agg_b.total_events as i64 - agg_a.total_events as i64,
    }
}

fn endpoint_deltas_for(key: &str, a: &SessionAggregate, b: &SessionAggregate) -> Vec<MetricDelta> {
    let before = a.endpoints.get(key);
    let after = b.endpoints.get(key);

    let latency = classify_named(
        format!("{key} avgLatency"),
        before.map(|m| m.avg_latency).unwrap_or(0.0),
        after.map(|m| m.avg_latency).unwrap_or(0.0),
        MetricFamily::Latency,
    );
    let error_rate = classify_named(
        format!("{key} errorRate"),
        before.map(|m| m.error_rate).unwrap_or(0.0),
        after.map(|m| m.error_rate).unwrap_or(0.0),
        MetricFamily::ErrorRate,
    );
    let call_count = classify_named(
        format!("{key} callCount"),
        before.map(|m| m.call_count as f64).unwrap_or(0.0),
        after.map(|m| m.call_count as f64).unwrap_or(0.0),
        MetricFamily::CallCount,
    );

    vec![latency, error_rate, call_count]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::EndpointMetrics;

    fn snapshot_with_endpoint(session_id: &str, key: &str, avg_latency: f64, error_rate: f64, call_count: u64) -> SessionSnapshot {
        let mut aggregate = SessionAggregate::new();
        aggregate.endpoints.insert(
            key.to_string(),
            EndpointMetrics {
                avg_latency,
                error_rate,
                call_count,
                ..Default::default()
            },
        );
        SessionSnapshot { session_id: session_id.to_string(), created_at: 0, aggregate }
    }

    #[test]
    fn latency_regression_matches_scenario_4() {
        let a = snapshot_with_endpoint("A", "GET /api/users", 100.0, 0.0, 10);
        let b = snapshot_with_endpoint("B", "GET /api/users", 250.0, 0.0, 10);

        let diff = compare_sessions(&a, &b);
        let latency = diff
            .endpoint_deltas
            .iter()
            .find(|d| d.key == "GET /api/users avgLatency")
            .unwrap();

        assert_eq!(latency.before, 100.0);
        assert_eq!(latency.after, 250.0);
        assert_eq!(latency.delta, 150.0);
        assert_eq!(latency.percent_change, 150.0);
        assert_eq!(latency.classification, Classification::Regression);
    }

    #[test]
    fn small_percent_change_is_unchanged() {
        let delta = classify(100.0, 102.0, MetricFamily::Latency);
        assert_eq!(delta.classification, Classification::Unchanged);
    }

    #[test]
    fn error_rate_regression_on_any_increase() {
        let delta = classify(0.0, 0.01, MetricFamily::ErrorRate);
        assert_eq!(delta.classification, Classification::Regression);
    }

    #[test]
    fn call_count_needs_25_percent_increase_to_regress() {
        let noisy = classify(100.0, 130.0, MetricFamily::CallCount);
        assert_eq!(noisy.classification, Classification::Regression);

        let mild = classify(100.0, 110.0, MetricFamily::CallCount);
        assert_eq!(mild.classification, Classification::Unchanged);
    }

    #[test]
    fn web_vital_regression_on_rating_downgrade() {
        let delta = classify_web_vital("LCP", 2000.0, 4500.0);
        assert_eq!(delta.classification, Classification::Regression);
    }

    #[test]
    fn web_vital_unchanged_within_same_rating_band() {
        let delta = classify_web_vital("LCP", 2000.0, 2100.0);
        assert_eq!(delta.classification, Classification::Unchanged);
    }
}
