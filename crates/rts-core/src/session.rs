//! Session and session-summary types, per spec sections 3.1 and 6.2.

use serde::{Deserialize, Serialize};

use crate::event::BuildMeta;

/// A single continuous connection from one instrumented application.
///
/// Mutated in place by the owning project's session table as events and
/// lifecycle transitions arrive; never shared across projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project: String,
    pub app_name: String,
    pub sdk_version: String,
    pub connected_at: i64,
    #[serde(default)]
    pub disconnected_at: Option<i64>,
    #[serde(default)]
    pub event_count: u64,
    pub is_connected: bool,
    #[serde(default)]
    pub build_meta: Option<BuildMeta>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        project: impl Into<String>,
        app_name: impl Into<String>,
        sdk_version: impl Into<String>,
        connected_at: i64,
        build_meta: Option<BuildMeta>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project: project.into(),
            app_name: app_name.into(),
            sdk_version: sdk_version.into(),
            connected_at,
            disconnected_at: None,
            event_count: 0,
            is_connected: true,
            build_meta,
        }
    }

    pub fn record_event(&mut self) {
        self.event_count += 1;
    }

    pub fn disconnect(&mut self, at: i64) {
        self.is_connected = false;
        self.disconnected_at = Some(at);
    }
}

/// Row shape returned by `GET /api/sessions` and C3's `session_info()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub app_name: String,
    pub connected_at: i64,
    pub sdk_version: String,
    pub event_count: u64,
    pub is_connected: bool,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        SessionInfo {
            session_id: s.session_id.clone(),
            app_name: s.app_name.clone(),
            connected_at: s.connected_at,
            sdk_version: s.sdk_version.clone(),
            event_count: s.event_count,
            is_connected: s.is_connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_sets_flag_and_timestamp() {
        let mut s = Session::new("S1", "app", "app", "0.3", 1000, None);
        assert!(s.is_connected);
        s.record_event();
        s.record_event();
        s.disconnect(2000);
        assert!(!s.is_connected);
        assert_eq!(s.disconnected_at, Some(2000));
        assert_eq!(s.event_count, 2);
    }

    #[test]
    fn session_info_projects_fields() {
        let s = Session::new("S1", "app", "app", "0.3", 1000, None);
        let info: SessionInfo = (&s).into();
        assert_eq!(info.session_id, "S1");
        assert!(info.is_connected);
    }
}
