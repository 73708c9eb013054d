//! In-Memory Event Store (C3): a single global ring buffer shared across
//! all projects/sessions, plus a publish/subscribe bus for live
//! listeners, per spec section 4.3.
//!
//! The lock is a synchronous `parking_lot::Mutex` rather than an async
//! `tokio::sync::RwLock`: spec section 5 requires the lock be released
//! *before* subscriber callbacks run, which a plain mutex models more
//! directly than holding an async guard across an await point.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use rts_core::{Event, EventBody, EventKind, SessionInfo};
use tokio::sync::mpsc;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Filters accepted by the typed accessors. Every field is optional;
/// absent fields impose no constraint. Not every field applies to every
/// event kind — callers pass only the fields relevant to the kind they
/// are querying.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub since_seconds: Option<u64>,
    pub session_id: Option<String>,
    pub url_pattern: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
    pub level: Option<String>,
    pub search: Option<String>,
    pub store_id: Option<String>,
    pub component_name: Option<String>,
    pub metric_name: Option<String>,
    pub table: Option<String>,
    pub min_duration_ms: Option<f64>,
}

/// Bounded ring buffer of capacity *N*, default 10,000, with typed
/// accessors and a drop-on-slow subscriber bus.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    capacity: usize,
    events: VecDeque<Event>,
    sessions: HashMap<String, SessionInfo>,
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
    drop_counts: HashMap<u64, u64>,
    next_subscriber_id: u64,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                events: VecDeque::with_capacity(capacity.min(4096)),
                sessions: HashMap::new(),
                subscribers: HashMap::new(),
                drop_counts: HashMap::new(),
                next_subscriber_id: 0,
            }),
        }
    }

    /// Appends `event`, evicting the oldest event on overflow regardless
    /// of kind (capacity 0 evicts immediately, per testable boundary
    /// behavior). Notifies subscribers synchronously, after the append
    /// and lock release, with a non-blocking send — a subscriber whose
    /// queue is full is skipped for this event and its drop counter
    /// increments.
    pub fn add(&self, event: Event) {
        let subscribers = {
            let mut inner = self.inner.lock();
            inner.events.push_back(event.clone());
            while inner.events.len() > inner.capacity {
                inner.events.pop_front();
            }
            inner.subscribers.clone()
        };

        for (id, sender) in subscribers.iter() {
            if sender.try_send(event.clone()).is_err() {
                let mut inner = self.inner.lock();
                if let Some(count) = inner.drop_counts.get_mut(id) {
                    *count += 1;
                }
            }
        }
    }

    pub fn upsert_session(&self, info: SessionInfo) {
        let mut inner = self.inner.lock();
        inner.sessions.insert(info.session_id.clone(), info);
    }

    pub fn mark_disconnected(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(info) = inner.sessions.get_mut(session_id) {
            info.is_connected = false;
        }
    }

    pub fn record_session_event(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(info) = inner.sessions.get_mut(session_id) {
            info.event_count += 1;
        }
    }

    /// Current running `event_count` for a single session, as tracked by
    /// [`MemoryStore::record_session_event`]. Used at disconnect time to
    /// bring the durable session row's `event_count` in line with what
    /// was actually processed, per spec section 3.1's "running
    /// `event_count`" field.
    pub fn session_event_count(&self, session_id: &str) -> Option<u64> {
        self.inner.lock().sessions.get(session_id).map(|info| info.event_count)
    }

    pub fn session_info(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock();
        let mut infos: Vec<SessionInfo> = inner.sessions.values().cloned().collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    /// Registers a live listener and returns the receiving half of its
    /// bounded channel. The sender is dropped from the internal list
    /// when the receiver is dropped and a subsequent `add` notices the
    /// send failing permanently — callers that need prompt cleanup
    /// should call [`MemoryStore::unsubscribe`] explicitly via the
    /// returned token.
    pub fn subscribe(&self) -> (SubscriptionToken, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.insert(id, tx);
        inner.drop_counts.insert(id, 0);
        (SubscriptionToken { id }, rx)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut inner = self.inner.lock();
        inner.subscribers.remove(&token.id);
        inner.drop_counts.remove(&token.id);
    }

    /// Takes a stable point-in-time snapshot and releases the lock
    /// before the caller iterates, per spec section 4.3's concurrency
    /// contract.
    fn snapshot(&self) -> Vec<Event> {
        self.inner.lock().events.iter().cloned().collect()
    }

    /// All events within `since_seconds` of `now_ms`, optionally
    /// restricted by kind.
    pub fn timeline(&self, since_seconds: Option<u64>, kinds: Option<&[EventKind]>, now_ms: i64) -> Vec<Event> {
        let cutoff = since_seconds.map(|s| now_ms - (s as i64) * 1000);
        self.snapshot()
            .into_iter()
            .filter(|e| cutoff.map_or(true, |c| e.timestamp >= c))
            .filter(|e| kinds.map_or(true, |ks| ks.contains(&e.kind())))
            .collect()
    }

    pub fn events_of_kind(&self, kind: EventKind, filter: &MemoryFilter, now_ms: i64) -> Vec<Event> {
        let cutoff = filter.since_seconds.map(|s| now_ms - (s as i64) * 1000);
        self.snapshot()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .filter(|e| cutoff.map_or(true, |c| e.timestamp >= c))
            .filter(|e| filter.session_id.as_deref().map_or(true, |sid| e.session_id == sid))
            .filter(|e| matches_body_filter(&e.body, filter))
            .collect()
    }

    /// Truncates the ring and returns the number of cleared events.
    pub fn clear(&self) -> u64 {
        let mut inner = self.inner.lock();
        let cleared = inner.events.len() as u64;
        inner.events.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SubscriptionToken {
    id: u64,
}

fn matches_body_filter(body: &EventBody, filter: &MemoryFilter) -> bool {
    match body {
        EventBody::Network(n) => {
            filter.url_pattern.as_deref().map_or(true, |p| n.url.contains(p))
                && filter.method.as_deref().map_or(true, |m| n.method.eq_ignore_ascii_case(m))
                && filter.status.map_or(true, |s| n.status == s)
        }
        EventBody::Console(c) => {
            let level_str = format!("{:?}", c.level).to_lowercase();
            filter.level.as_deref().map_or(true, |l| level_str == l.to_lowercase())
                && filter.search.as_deref().map_or(true, |s| c.message.contains(s))
        }
        EventBody::State(s) => filter.store_id.as_deref().map_or(true, |id| s.store_id == id),
        EventBody::Render(r) => filter.component_name.as_deref().map_or(true, |name| {
            r.profiles.iter().any(|p| p.component_name == name)
        }),
        EventBody::Performance(p) => {
            filter.metric_name.as_deref().map_or(true, |name| p.metric_name.eq_ignore_ascii_case(name))
        }
        EventBody::Database(d) => {
            filter.table.as_deref().map_or(true, |t| d.tables_accessed.iter().any(|tbl| tbl == t))
                && filter.search.as_deref().map_or(true, |s| d.query.contains(s) || d.normalized_query.contains(s))
                && filter.min_duration_ms.map_or(true, |min| d.duration >= min)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rts_core::{ConsoleEvent, ConsoleLevel, EventBody};

    fn console_event(session_id: &str, ts: i64, message: &str) -> Event {
        Event::new(
            session_id,
            ts,
            EventBody::Console(ConsoleEvent {
                level: ConsoleLevel::Log,
                message: message.to_string(),
                args: vec![],
                stack_trace: None,
                source_file: None,
            }),
        )
    }

    #[test]
    fn ring_evicts_oldest_on_overflow() {
        let store = MemoryStore::new(3);
        for msg in ["m1", "m2", "m3", "m4"] {
            store.add(console_event("S1", 1, msg));
        }
        assert_eq!(store.len(), 3);
        let messages: Vec<String> = store
            .timeline(None, None, 1_000_000)
            .into_iter()
            .map(|e| match e.body {
                EventBody::Console(c) => c.message,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn session_event_count_tracks_record_session_event() {
        let store = MemoryStore::new(10);
        store.upsert_session(rts_core::SessionInfo {
            session_id: "S1".to_string(),
            app_name: "app".to_string(),
            connected_at: 0,
            sdk_version: "0.1".to_string(),
            event_count: 0,
            is_connected: true,
        });

        assert_eq!(store.session_event_count("S1"), Some(0));
        store.record_session_event("S1");
        store.record_session_event("S1");
        assert_eq!(store.session_event_count("S1"), Some(2));
        assert_eq!(store.session_event_count("unknown"), None);
    }

    #[test]
    fn capacity_zero_evicts_immediately() {
        let store = MemoryStore::new(0);
        store.add(console_event("S1", 1, "m1"));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn clear_returns_count_and_empties_ring() {
        let store = MemoryStore::new(10);
        store.add(console_event("S1", 1, "m1"));
        store.add(console_event("S1", 2, "m2"));
        assert_eq!(store.clear(), 2);
        assert_eq!(store.len(), 0);
        assert!(store.timeline(None, None, 1_000_000).is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_added_events() {
        let store = MemoryStore::new(10);
        let (_token, mut rx) = store.subscribe();
        store.add(console_event("S1", 1, "m1"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id, "S1");
    }

    #[tokio::test]
    async fn full_subscriber_queue_is_skipped_not_blocking() {
        let store = MemoryStore::new(10);
        let (_token, _rx) = store.subscribe();
        // Fill the bounded channel without draining it.
        for i in 0..SUBSCRIBER_QUEUE_CAPACITY as i64 + 5 {
            store.add(console_event("S1", i, "m"));
        }
        // add() must return promptly regardless of the full queue.
        assert_eq!(store.len(), 10);
    }
}
