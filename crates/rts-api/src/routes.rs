//! Historical query API (spec section 6.2). Every handler extracts
//! filters from a raw `HashMap<String, String>` query map rather than a
//! typed `web::Query<T>` so a malformed value (`since_seconds=abc`)
//! parses to an omitted filter instead of a 400, per the spec's explicit
//! parsing contract.

use std::collections::HashMap;
use std::str::FromStr;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use rts_core::EventKind;
use rts_store::{sanitize_app_name, MemoryFilter};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health))
            .route("/sessions", web::get().to(sessions))
            .route("/projects", web::get().to(projects))
            .route("/events/network", web::get().to(events_network))
            .route("/events/console", web::get().to(events_console))
            .route("/events/state", web::get().to(events_state))
            .route("/events/renders", web::get().to(events_renders))
            .route("/events/performance", web::get().to(events_performance))
            .route("/events/database", web::get().to(events_database))
            .route("/events/timeline", web::get().to(events_timeline))
            .route("/events", web::delete().to(clear_events))
            .route("/ws/events", web::get().to(crate::ws::ws_events)),
    )
    .default_service(web::route().to(not_found));
}

fn parse_opt<T: FromStr>(query: &HashMap<String, String>, key: &str) -> Option<T> {
    query.get(key).and_then(|v| v.parse::<T>().ok())
}

fn parse_kind(token: &str) -> Option<EventKind> {
    match token {
        "network" => Some(EventKind::Network),
        "console" => Some(EventKind::Console),
        "session" => Some(EventKind::Session),
        "state" => Some(EventKind::State),
        "render" => Some(EventKind::Render),
        "dom_snapshot" => Some(EventKind::DomSnapshot),
        "performance" => Some(EventKind::Performance),
        "database" => Some(EventKind::Database),
        _ => None,
    }
}

fn parse_kinds(query: &HashMap<String, String>) -> Option<Vec<EventKind>> {
    let raw = query.get("event_types")?;
    let kinds: Vec<EventKind> = raw.split(',').filter_map(|s| parse_kind(s.trim())).collect();
    if kinds.is_empty() {
        None
    } else {
        Some(kinds)
    }
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now().timestamp_millis(),
        "uptimeSeconds": state.uptime_seconds(),
    }))
}

async fn sessions(state: web::Data<AppState>) -> HttpResponse {
    let data = state.memory.session_info();
    let count = data.len();
    HttpResponse::Ok().json(json!({ "data": data, "count": count }))
}

async fn projects(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    #[derive(Default, serde::Serialize)]
    struct ProjectSummary {
        #[serde(rename = "appName")]
        app_name: String,
        sessions: Vec<String>,
        #[serde(rename = "isConnected")]
        is_connected: bool,
        #[serde(rename = "eventCount")]
        event_count: u64,
    }

    let mut by_project: HashMap<String, ProjectSummary> = HashMap::new();
    for name in state.registry.list_projects().await.map_err(ApiError)? {
        by_project.entry(name.clone()).or_insert(ProjectSummary { app_name: name, ..Default::default() });
    }

    for info in state.memory.session_info() {
        let project = sanitize_app_name(&info.app_name);
        let entry = by_project
            .entry(project.clone())
            .or_insert(ProjectSummary { app_name: project, ..Default::default() });
        entry.sessions.push(info.session_id);
        entry.is_connected |= info.is_connected;
        entry.event_count += info.event_count;
    }

    let mut data: Vec<ProjectSummary> = by_project.into_values().collect();
    data.sort_by(|a, b| a.app_name.cmp(&b.app_name));
    let count = data.len();
    Ok(HttpResponse::Ok().json(json!({ "data": data, "count": count })))
}

async fn events_network(state: web::Data<AppState>, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let q = query.into_inner();
    let filter = MemoryFilter {
        since_seconds: parse_opt(&q, "since_seconds"),
        session_id: q.get("session_id").cloned(),
        url_pattern: q.get("url_pattern").cloned(),
        method: q.get("method").cloned(),
        status: parse_opt(&q, "status"),
        ..Default::default()
    };
    respond_events(state.memory.events_of_kind(EventKind::Network, &filter, now_ms()))
}

async fn events_console(state: web::Data<AppState>, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let q = query.into_inner();
    let filter = MemoryFilter {
        since_seconds: parse_opt(&q, "since_seconds"),
        session_id: q.get("session_id").cloned(),
        level: q.get("level").cloned(),
        search: q.get("search").cloned(),
        ..Default::default()
    };
    respond_events(state.memory.events_of_kind(EventKind::Console, &filter, now_ms()))
}

async fn events_state(state: web::Data<AppState>, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let q = query.into_inner();
    let filter = MemoryFilter {
        since_seconds: parse_opt(&q, "since_seconds"),
        session_id: q.get("session_id").cloned(),
        store_id: q.get("store_id").cloned(),
        ..Default::default()
    };
    respond_events(state.memory.events_of_kind(EventKind::State, &filter, now_ms()))
}

async fn events_renders(state: web::Data<AppState>, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let q = query.into_inner();
    let filter = MemoryFilter {
        since_seconds: parse_opt(&q, "since_seconds"),
        session_id: q.get("session_id").cloned(),
        component_name: q.get("component").cloned(),
        ..Default::default()
    };
    respond_events(state.memory.events_of_kind(EventKind::Render, &filter, now_ms()))
}

async fn events_performance(state: web::Data<AppState>, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let q = query.into_inner();
    let filter = MemoryFilter {
        since_seconds: parse_opt(&q, "since_seconds"),
        session_id: q.get("session_id").cloned(),
        metric_name: q.get("metric").cloned(),
        ..Default::default()
    };
    respond_events(state.memory.events_of_kind(EventKind::Performance, &filter, now_ms()))
}

async fn events_database(state: web::Data<AppState>, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let q = query.into_inner();
    let filter = MemoryFilter {
        since_seconds: parse_opt(&q, "since_seconds"),
        session_id: q.get("session_id").cloned(),
        table: q.get("table").cloned(),
        min_duration_ms: parse_opt(&q, "min_duration_ms"),
        search: q.get("search").cloned(),
        ..Default::default()
    };
    respond_events(state.memory.events_of_kind(EventKind::Database, &filter, now_ms()))
}

async fn events_timeline(state: web::Data<AppState>, query: web::Query<HashMap<String, String>>) -> HttpResponse {
    let q = query.into_inner();
    let since_seconds = parse_opt(&q, "since_seconds");
    let kinds = parse_kinds(&q);
    let session_id = q.get("session_id");

    let data: Vec<_> = state
        .memory
        .timeline(since_seconds, kinds.as_deref(), now_ms())
        .into_iter()
        .filter(|e| session_id.map_or(true, |sid| &e.session_id == sid))
        .collect();

    respond_events(data)
}

async fn clear_events(state: web::Data<AppState>) -> HttpResponse {
    let cleared = state.memory.clear();
    HttpResponse::Ok().json(json!({ "cleared": cleared }))
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": "not found", "path": req.path() }))
}

fn respond_events(data: Vec<rts_core::Event>) -> HttpResponse {
    let count = data.len();
    HttpResponse::Ok().json(json!({ "data": data, "count": count }))
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_opt_returns_none_for_malformed_value() {
        let mut q = HashMap::new();
        q.insert("since_seconds".to_string(), "not-a-number".to_string());
        let parsed: Option<u64> = parse_opt(&q, "since_seconds");
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_kinds_drops_unknown_tokens_and_keeps_recognized() {
        let mut q = HashMap::new();
        q.insert("event_types".to_string(), "network,bogus,console".to_string());
        let kinds = parse_kinds(&q).unwrap();
        assert_eq!(kinds, vec![EventKind::Network, EventKind::Console]);
    }

    #[test]
    fn parse_kinds_is_none_when_nothing_recognized() {
        let mut q = HashMap::new();
        q.insert("event_types".to_string(), "bogus,also-bogus".to_string());
        assert!(parse_kinds(&q).is_none());
    }
}
