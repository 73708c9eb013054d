//! Shared application state injected into every handler via `web::Data`.

use std::sync::Arc;
use std::time::Instant;

use rts_core::{Command, CommandOutcome};
use rts_ingest::IngestServer;
use rts_session::SessionManager;
use rts_store::{MemoryStore, Registry};

/// Everything a route needs: the query/stream facade (C5) owns no state
/// of its own, it only reaches into C1/C3/C4/C6.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub memory: Arc<MemoryStore>,
    pub ingest: Arc<IngestServer>,
    pub sessions: Arc<SessionManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        memory: Arc<MemoryStore>,
        ingest: Arc<IngestServer>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self { registry, memory, ingest, sessions, started_at: Instant::now() }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Pure pass-through to the ingest server's command dispatch. No HTTP
    /// route calls this yet, but a future dashboard action (e.g. "capture
    /// a DOM snapshot now") reaches the ingest server through here rather
    /// than bypassing the facade.
    pub async fn send_command(&self, session_id: &str, command: Command) -> CommandOutcome {
        self.ingest.send_command(session_id, command).await
    }
}
