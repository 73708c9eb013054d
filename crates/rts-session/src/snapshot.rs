//! Immutable session snapshots (spec section 3.1) and the idempotent
//! snapshot cache (spec section 4.6: "calling `createSnapshot` twice
//! within 1 s for the same session returns the cached value").

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::aggregate::SessionAggregate;

const IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(1);

/// An immutable roll-up of a finished (or current) session, keyed by
/// `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: i64,
    pub aggregate: SessionAggregate,
}

struct CacheEntry {
    snapshot: SessionSnapshot,
    created_instant: Instant,
}

/// Caches the most recent snapshot per session so a burst of
/// `createSnapshot` calls within the idempotency window returns the same
/// value rather than recomputing (and re-persisting) one per call.
#[derive(Default)]
pub struct SnapshotCache {
    entries: DashMap<String, CacheEntry>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached snapshot for `session_id` if one was created
    /// within the last second; otherwise `None`.
    pub fn recent(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.entries.get(session_id).and_then(|entry| {
            if entry.created_instant.elapsed() < IDEMPOTENCY_WINDOW {
                Some(entry.snapshot.clone())
            } else {
                None
            }
        })
    }

    pub fn store(&self, snapshot: SessionSnapshot) {
        self.entries.insert(
            snapshot.session_id.clone(),
            CacheEntry { snapshot, created_instant: Instant::now() },
        );
    }
}

/// Per-project snapshot history, most recent first. Persisted copies
/// live in the durable log's `session_metrics` table; this in-memory
/// index backs `getSessionHistory` without a round trip for the common
/// case of a small recent window.
#[derive(Default)]
pub struct SnapshotHistory {
    by_project: DashMap<String, Vec<SessionSnapshot>>,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, project: &str, snapshot: SessionSnapshot) {
        let mut entries = self.by_project.entry(project.to_string()).or_default();
        entries.insert(0, snapshot);
    }

    pub fn recent(&self, project: &str, limit: usize) -> Vec<SessionSnapshot> {
        self.by_project
            .get(project)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}
