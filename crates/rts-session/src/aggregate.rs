//! Per-session running aggregate (spec section 4.6): endpoint, component,
//! store, Web Vital, and query roll-ups updated incrementally as events
//! arrive.
//!
//! Grounded on the teacher's `UserPresenceInfo`/metrics-struct shape in
//! `presence.rs` (entry-or-insert into a `HashMap`, a small struct
//! recomputed on each update) generalized from presence counters to five
//! independent roll-up maps.

use std::collections::HashMap;

use rts_core::{normalize, Event, EventBody};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub avg_latency: f64,
    pub error_rate: f64,
    pub call_count: u64,
    #[serde(skip)]
    total_latency: f64,
    #[serde(skip)]
    error_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentMetrics {
    pub render_count: u64,
    pub avg_duration: f64,
    #[serde(skip)]
    total_duration: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub update_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebVitalMetric {
    pub value: f64,
    pub rating: rts_core::VitalRating,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub avg_duration: f64,
    pub call_count: u64,
    #[serde(skip)]
    total_duration: f64,
}

/// The running aggregate for one session. Mutated by [`SessionAggregate::apply`]
/// as events arrive; frozen into a [`crate::snapshot::SessionSnapshot`] on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub endpoints: HashMap<String, EndpointMetrics>,
    pub components: HashMap<String, ComponentMetrics>,
    pub stores: HashMap<String, StoreMetrics>,
    pub web_vitals: HashMap<String, WebVitalMetric>,
    pub queries: HashMap<String, QueryMetrics>,
    pub total_events: u64,
    pub error_count: u64,
}

impl SessionAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the aggregate. Kinds with no roll-up
    /// (`session`, `dom_snapshot`) only affect `total_events`.
    pub fn apply(&mut self, event: &Event) {
        self.total_events += 1;

        match &event.body {
            EventBody::Network(n) => {
                let key = normalize::endpoint_key(&n.method, &n.url);
                let entry = self.endpoints.entry(key).or_default();
                entry.call_count += 1;
                entry.total_latency += n.duration;
                entry.avg_latency = entry.total_latency / entry.call_count as f64;
                if n.status >= 500 {
                    entry.error_count += 1;
                    self.error_count += 1;
                }
                entry.error_rate = entry.error_count as f64 / entry.call_count as f64;
            }
            EventBody::Console(c) => {
                if matches!(c.level, rts_core::ConsoleLevel::Error) {
                    self.error_count += 1;
                }
            }
            EventBody::State(s) => {
                let entry = self.stores.entry(s.store_id.clone()).or_default();
                entry.update_count += 1;
            }
            EventBody::Render(r) => {
                for profile in &r.profiles {
                    let entry = self.components.entry(profile.component_name.clone()).or_default();
                    entry.render_count += profile.render_count.max(1) as u64;
                    entry.total_duration += profile.duration;
                    entry.avg_duration = entry.total_duration / entry.render_count as f64;
                }
            }
            EventBody::Performance(p) => {
                self.web_vitals.insert(
                    p.metric_name.clone(),
                    WebVitalMetric { value: p.value, rating: p.rating },
                );
            }
            EventBody::Database(d) => {
                let entry = self.queries.entry(d.normalized_query.clone()).or_default();
                entry.call_count += 1;
                entry.total_duration += d.duration;
                entry.avg_duration = entry.total_duration / entry.call_count as f64;
            }
            EventBody::Session(_) | EventBody::DomSnapshot(_) | EventBody::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rts_core::{ConsoleEvent, ConsoleLevel, NetworkEvent};

    fn network_event(url: &str, method: &str, status: u16, duration: f64) -> Event {
        Event::new(
            "S1",
            0,
            EventBody::Network(NetworkEvent {
                url: url.to_string(),
                method: method.to_string(),
                status,
                request_headers: Default::default(),
                response_headers: Default::default(),
                request_body_size: None,
                response_body_size: None,
                duration,
                ttfb: duration,
                graphql_operation: None,
                request_body: None,
                response_body: None,
                error_phase: None,
                error_message: None,
                source: None,
            }),
        )
    }

    #[test]
    fn network_events_roll_up_into_endpoint_metrics() {
        let mut agg = SessionAggregate::new();
        agg.apply(&network_event("/api/users/1", "GET", 200, 100.0));
        agg.apply(&network_event("/api/users/2", "GET", 200, 200.0));

        let entry = agg.endpoints.get("GET /api/users/:id").unwrap();
        assert_eq!(entry.call_count, 2);
        assert_eq!(entry.avg_latency, 150.0);
        assert_eq!(entry.error_rate, 0.0);
    }

    #[test]
    fn server_error_status_counts_toward_error_rate() {
        let mut agg = SessionAggregate::new();
        agg.apply(&network_event("/api/x", "GET", 500, 10.0));
        let entry = agg.endpoints.get("GET /api/x").unwrap();
        assert_eq!(entry.error_rate, 1.0);
        assert_eq!(agg.error_count, 1);
    }

    #[test]
    fn console_error_increments_error_count() {
        let mut agg = SessionAggregate::new();
        agg.apply(&Event::new(
            "S1",
            0,
            EventBody::Console(ConsoleEvent {
                level: ConsoleLevel::Error,
                message: "boom".to_string(),
                args: vec![],
                stack_trace: None,
                source_file: None,
            }),
        ));
        assert_eq!(agg.error_count, 1);
        assert_eq!(agg.total_events, 1);
    }
}
