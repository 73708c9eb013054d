//! Server-to-client commands and the pending-command correlation record,
//! per spec sections 3.1 and 4.4.2.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A command the collector can dispatch to a specific connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    CaptureDomSnapshot {
        #[serde(default, rename = "maxSize")]
        max_size: Option<u32>,
    },
    CapturePerformanceMetrics,
    ClearRenders,
}

/// Generate a fresh `request_id` for a dispatched command. The format is
/// opaque to clients; it only needs to be unique for the lifetime of the
/// pending-command table, per spec section 5.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// The outcome of waiting on a dispatched command. Every pending command
/// resolves to exactly one of these, per testable property 5.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Response(Value),
    Timeout,
    Disconnected,
    Shutdown,
}

/// A command awaiting its `command_response`, held in the ingest
/// connection's per-session pending table.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub request_id: String,
    pub session_id: String,
    pub command: Command,
    pub dispatched_at: i64,
}

impl PendingCommand {
    pub fn new(session_id: impl Into<String>, command: Command, dispatched_at: i64) -> Self {
        Self {
            request_id: new_request_id(),
            session_id: session_id.into(),
            command,
            dispatched_at,
        }
    }

    pub fn is_expired(&self, now: i64, timeout_ms: i64) -> bool {
        now - self.dispatched_at >= timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }

    #[test]
    fn command_tags_round_trip() {
        let cmd = Command::CaptureDomSnapshot { max_size: Some(500) };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "capture_dom_snapshot");
        assert_eq!(json["maxSize"], 500);

        let parsed: Command = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn pending_command_expires_after_timeout() {
        let pending = PendingCommand::new("S1", Command::ClearRenders, 1_000);
        assert!(!pending.is_expired(5_000, 10_000));
        assert!(pending.is_expired(11_000, 10_000));
    }
}
