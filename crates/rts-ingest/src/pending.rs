//! Pending-command correlation table (spec section 4.4.2): one entry per
//! in-flight command, keyed by `request_id`, completed exactly once by
//! response, timeout, disconnect, or shutdown.

use std::time::Duration;

use dashmap::DashMap;
use rts_core::{Command, CommandOutcome, PendingCommand};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout as tokio_timeout;
use tracing::warn;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

struct Entry {
    pending: PendingCommand,
    completion: oneshot::Sender<CommandOutcome>,
}

/// Per-session pending-command table. Spec section 5 calls for a
/// per-session mutex; `DashMap` keyed by `request_id` gives the same
/// per-entry isolation without a coarse lock, matching the teacher's
/// `DashMap`-based connection table in `connection.rs`.
#[derive(Default)]
pub struct PendingCommandTable {
    entries: DashMap<String, Entry>,
    by_session: DashMap<String, Vec<String>>,
}

impl PendingCommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dispatched command and returns its `request_id`
    /// alongside a future that resolves to the eventual outcome.
    pub fn dispatch(
        &self,
        session_id: &str,
        command: Command,
        dispatched_at: i64,
    ) -> (String, oneshot::Receiver<CommandOutcome>) {
        let pending = PendingCommand::new(session_id, command, dispatched_at);
        let request_id = pending.request_id.clone();
        let (tx, rx) = oneshot::channel();

        self.entries.insert(request_id.clone(), Entry { pending, completion: tx });
        self.by_session
            .entry(session_id.to_string())
            .or_default()
            .push(request_id.clone());

        (request_id, rx)
    }

    /// Completes the pending entry for `request_id` with the response
    /// payload. Duplicate or unknown `request_id`s are ignored, per spec
    /// section 4.4.2 "at most one command per request_id in flight;
    /// duplicate responses are ignored".
    pub fn complete(&self, request_id: &str, payload: Value) {
        if let Some((_, entry)) = self.entries.remove(request_id) {
            self.forget(&entry.pending.session_id, request_id);
            let _ = entry.completion.send(CommandOutcome::Response(payload));
        }
    }

    /// Completes every pending entry for `session_id` with
    /// `CommandOutcome::Disconnected`, called on connection loss.
    pub fn fail_session(&self, session_id: &str) {
        let request_ids = self.by_session.remove(session_id).map(|(_, v)| v).unwrap_or_default();
        for request_id in request_ids {
            if let Some((_, entry)) = self.entries.remove(&request_id) {
                let _ = entry.completion.send(CommandOutcome::Disconnected);
            }
        }
    }

    /// Completes every outstanding entry across all sessions with
    /// `CommandOutcome::Shutdown`, called once during graceful shutdown.
    pub fn fail_all_for_shutdown(&self) {
        let request_ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for request_id in request_ids {
            if let Some((_, entry)) = self.entries.remove(&request_id) {
                let _ = entry.completion.send(CommandOutcome::Shutdown);
            }
        }
        self.by_session.clear();
    }

    fn forget(&self, session_id: &str, request_id: &str) {
        if let Some(mut list) = self.by_session.get_mut(session_id) {
            list.retain(|id| id != request_id);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}

/// Awaits `rx` up to the default command-response timeout (10 s per
/// spec section 5), returning `CommandOutcome::Timeout` on expiry. The
/// table entry itself is left for the caller to remove, since a
/// late-arriving response after timeout must still be ignored rather
/// than resurrecting a completed wait.
pub async fn await_with_timeout(rx: oneshot::Receiver<CommandOutcome>) -> CommandOutcome {
    match tokio_timeout(DEFAULT_COMMAND_TIMEOUT, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => CommandOutcome::Disconnected,
        Err(_) => {
            warn!("command timed out waiting for response");
            CommandOutcome::Timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn response_completes_pending_entry() {
        let table = PendingCommandTable::new();
        let (request_id, rx) = table.dispatch("S1", Command::ClearRenders, 0);
        table.complete(&request_id, serde_json::json!({"ok": true}));

        let outcome = rx.await.unwrap();
        matches!(outcome, CommandOutcome::Response(_));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_response_is_ignored() {
        let table = PendingCommandTable::new();
        let (request_id, rx) = table.dispatch("S1", Command::ClearRenders, 0);
        table.complete(&request_id, serde_json::json!({"first": true}));
        // Second completion for the same (now-removed) request_id is a no-op.
        table.complete(&request_id, serde_json::json!({"second": true}));

        let outcome = rx.await.unwrap();
        match outcome {
            CommandOutcome::Response(v) => assert_eq!(v, serde_json::json!({"first": true})),
            _ => panic!("expected response"),
        }
    }

    #[tokio::test]
    async fn disconnect_fails_only_that_sessions_entries() {
        let table = PendingCommandTable::new();
        let (_id_a, rx_a) = table.dispatch("S1", Command::ClearRenders, 0);
        let (_id_b, rx_b) = table.dispatch("S2", Command::ClearRenders, 0);

        table.fail_session("S1");

        matches!(rx_a.await.unwrap(), CommandOutcome::Disconnected);
        assert_eq!(table.pending_count(), 1);
        drop(rx_b);
    }

    #[tokio::test]
    async fn shutdown_fails_every_pending_entry() {
        let table = PendingCommandTable::new();
        let (_id_a, rx_a) = table.dispatch("S1", Command::ClearRenders, 0);
        let (_id_b, rx_b) = table.dispatch("S2", Command::CapturePerformanceMetrics, 0);

        table.fail_all_for_shutdown();

        matches!(rx_a.await.unwrap(), CommandOutcome::Shutdown);
        matches!(rx_b.await.unwrap(), CommandOutcome::Shutdown);
        assert_eq!(table.pending_count(), 0);
    }
}
