//! The event domain type: a tagged variant with a shared header and a
//! kind-specific body, per spec section 3.1 and the wire shapes of
//! section 6.1.
//!
//! Storage and reads pattern-match on `kind`; schema evolution is additive
//! (unknown fields on read are ignored via `serde`'s default field
//! skipping, unknown `kind` values are accepted and stored opaquely via
//! [`EventBody::Unknown`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One of the eight event kinds the collector understands, used as the
/// discriminator for storage indexes and typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Network,
    Console,
    Session,
    State,
    Render,
    DomSnapshot,
    Performance,
    Database,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Network => "network",
            EventKind::Console => "console",
            EventKind::Session => "session",
            EventKind::State => "state",
            EventKind::Render => "render",
            EventKind::DomSnapshot => "dom_snapshot",
            EventKind::Performance => "performance",
            EventKind::Database => "database",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A short, unique-enough-for-dedup identifier minted at ingest time.
/// Not globally unique across process restarts by design — uniqueness is
/// only required for the `(event_id, session_id)` pair, per invariant 3.2.
pub fn new_event_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// An immutable runtime record. Once accepted by [`crate::error::Result`]
/// returning `add`, an `Event` is never mutated.
///
/// The body is flattened into the same JSON object as the header fields
/// (`#[serde(flatten)]` over an internally-tagged `EventBody`), so a
/// serialized event is a single flat object discriminated by `kind`, per
/// spec section 6.1, rather than a header wrapping a nested `body` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub session_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    pub fn new(session_id: impl Into<String>, timestamp: i64, body: EventBody) -> Self {
        Self { event_id: new_event_id(), session_id: session_id.into(), timestamp, body }
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}

/// Kind-specific event body. Field shapes follow spec section 6.1
/// verbatim. `Unknown` stores a payload whose `kind` was not one of the
/// eight recognized values; the collector keeps these opaque rather than
/// rejecting them, per the additive-schema design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    Network(NetworkEvent),
    Console(ConsoleEvent),
    Session(SessionEvent),
    State(StateEvent),
    Render(RenderEvent),
    DomSnapshot(DomSnapshotEvent),
    Performance(PerformanceEvent),
    Database(DatabaseEvent),
    #[serde(other)]
    Unknown,
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Network(_) => EventKind::Network,
            EventBody::Console(_) => EventKind::Console,
            EventBody::Session(_) => EventKind::Session,
            EventBody::State(_) => EventKind::State,
            EventBody::Render(_) => EventKind::Render,
            EventBody::DomSnapshot(_) => EventKind::DomSnapshot,
            EventBody::Performance(_) => EventKind::Performance,
            EventBody::Database(_) => EventKind::Database,
            // Unknown kinds are stored under no particular index; callers
            // that need the original string should read the raw JSON blob.
            EventBody::Unknown => EventKind::Session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub url: String,
    pub method: String,
    pub status: u16,
    #[serde(default)]
    pub request_headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub response_headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub request_body_size: Option<u64>,
    #[serde(default)]
    pub response_body_size: Option<u64>,
    pub duration: f64,
    pub ttfb: f64,
    #[serde(default)]
    pub graphql_operation: Option<String>,
    #[serde(default)]
    pub request_body: Option<Value>,
    #[serde(default)]
    pub response_body: Option<Value>,
    #[serde(default)]
    pub error_phase: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEvent {
    pub level: ConsoleLevel,
    pub message: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMeta {
    #[serde(default)]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub build_time: Option<String>,
    #[serde(default)]
    pub deploy_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub app_name: String,
    pub connected_at: i64,
    pub sdk_version: String,
    #[serde(default)]
    pub build_meta: Option<BuildMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatePhase {
    Init,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    pub store_id: String,
    pub library: String,
    pub phase: StatePhase,
    pub state: Value,
    #[serde(default)]
    pub previous_state: Option<Value>,
    #[serde(default)]
    pub diff: Option<Value>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderProfile {
    pub component_name: String,
    pub duration: f64,
    #[serde(default)]
    pub render_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEvent {
    pub profiles: Vec<RenderProfile>,
    pub snapshot_window_ms: u64,
    pub total_renders: u32,
    #[serde(default)]
    pub suspicious_components: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshotEvent {
    pub html: String,
    pub url: String,
    pub viewport: Viewport,
    pub scroll_position: ScrollPosition,
    pub element_count: u32,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VitalRating {
    Good,
    NeedsImprovement,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEvent {
    pub metric_name: String,
    pub value: f64,
    pub rating: VitalRating,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub entries: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbOperation {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbSource {
    Prisma,
    Drizzle,
    Knex,
    Pg,
    Mysql2,
    BetterSqlite3,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseEvent {
    pub query: String,
    pub normalized_query: String,
    pub duration: f64,
    #[serde(default)]
    pub rows_returned: Option<u64>,
    #[serde(default)]
    pub rows_affected: Option<u64>,
    #[serde(default)]
    pub tables_accessed: Vec<String>,
    pub operation: DbOperation,
    pub source: DbSource,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_unique_enough() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, b);
    }

    #[test]
    fn network_event_round_trips() {
        let body = EventBody::Network(NetworkEvent {
            url: "http://x/a".into(),
            method: "GET".into(),
            status: 200,
            request_headers: Default::default(),
            response_headers: Default::default(),
            request_body_size: None,
            response_body_size: None,
            duration: 10.0,
            ttfb: 5.0,
            graphql_operation: None,
            request_body: None,
            response_body: None,
            error_phase: None,
            error_message: None,
            source: None,
        });
        let event = Event::new("S1", 1000, body);
        assert_eq!(event.kind(), EventKind::Network);

        let json = serde_json::to_string(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["url"], "http://x/a");
        assert!(value.get("body").is_none(), "body must not be nested");

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, "S1");
        assert_eq!(parsed.kind(), EventKind::Network);
        match parsed.body {
            EventBody::Network(n) => {
                assert_eq!(n.url, "http://x/a");
                assert_eq!(n.status, 200);
            }
            _ => panic!("wrong body variant"),
        }
    }

    #[test]
    fn unknown_kind_is_accepted_opaquely() {
        let json = r#"{"event_id":"e1","session_id":"S1","timestamp":1,"kind":"from_the_future","foo":"bar"}"#;
        let parsed: Event = serde_json::from_str(json).unwrap();
        matches!(parsed.body, EventBody::Unknown);
    }

    #[test]
    fn console_level_serializes_lowercase() {
        let level = ConsoleLevel::Error;
        let json = serde_json::to_string(&level).unwrap();
        assert_eq!(json, "\"error\"");
    }
}
