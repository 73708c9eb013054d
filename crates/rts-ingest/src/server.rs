//! Ingest server (C4): accepts inbound connections on a loopback TCP
//! port, demultiplexes framed messages, and drives the per-connection
//! state machine of spec section 4.4.
//!
//! Grounded on the teacher's `WebSocketServer::start` (bind, spawn
//! background tasks, serve) generalized from `HttpServer::bind` to a raw
//! `tokio::net::TcpListener::bind` retry loop, since the wire transport
//! here is a bespoke framed TCP protocol rather than HTTP/WebSocket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rts_core::{
    BuildMeta, Command, CommandOutcome, Event, EventBody, Result as CollectorResult, Session,
    SessionEvent, SessionInfo,
};
use rts_store::{DurableLog, MemoryStore, Registry};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::codec::{Frame, FrameCodec, FrameType};
use crate::connection::{ConnectionHandle, ConnectionState, ConnectionTable};
use crate::pending::PendingCommandTable;

const MAX_RETRIES: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_PARSE_ERRORS: u32 = 3;

pub struct IngestServer {
    pub registry: Arc<Registry>,
    pub memory: Arc<MemoryStore>,
    pub durable_logs: Arc<dashmap::DashMap<String, Arc<DurableLog>>>,
    pub connections: Arc<ConnectionTable>,
    pub pending: Arc<PendingCommandTable>,
}

impl IngestServer {
    pub fn new(registry: Arc<Registry>, memory: Arc<MemoryStore>) -> Self {
        Self {
            registry,
            memory,
            durable_logs: Arc::new(dashmap::DashMap::new()),
            connections: Arc::new(ConnectionTable::new()),
            pending: Arc::new(PendingCommandTable::new()),
        }
    }

    /// Binds `port`, retrying up to `MAX_RETRIES` times with
    /// `RETRY_DELAY` between attempts (spec section 4.4.4), then serves
    /// connections until `shutdown` fires.
    pub async fn run(self: Arc<Self>, port: u16, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = bind_with_retry(port).await?;
        info!(port, "ingest server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("ingest server shutting down, no longer accepting connections");
                    self.pending.fail_all_for_shutdown();
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let server = self.clone();
                            let conn_shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, conn_shutdown).await;
                            }.instrument(info_span!("ingest_connection", peer = %addr)));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }

    async fn durable_log_for(&self, project: &str) -> CollectorResult<Arc<DurableLog>> {
        if let Some(log) = self.durable_logs.get(project) {
            return Ok(log.clone());
        }
        self.registry.ensure_project_dir(project, now_ms()).await?;
        let path = self.registry.project_events_db_path(project);
        let log = Arc::new(
            DurableLog::open(path.to_string_lossy().as_ref(), project, Default::default()).await?,
        );
        self.durable_logs.insert(project.to_string(), log.clone());
        Ok(log)
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, shutdown: CancellationToken) {
        let mut framed = Framed::new(stream, FrameCodec::default());
        let mut parse_errors: u32 = 0;

        let handshake = match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(frame))) if frame.frame_type == FrameType::Handshake => frame,
            _ => {
                warn!("connection closed: no valid handshake within timeout");
                return;
            }
        };

        let (session_id, project, session) = match self.accept_handshake(&handshake).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "handshake rejected");
                return;
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(64);
        let this_connection = outbound_tx.clone();
        let (displace_tx, displace_rx) = oneshot::channel();
        let displaced_previous = self.connections.register(
            &session_id,
            ConnectionHandle { outbound: outbound_tx, displace: displace_tx },
        );
        if displaced_previous {
            info!(session_id, "displaced prior connection for this session");
        }

        self.memory.upsert_session(SessionInfo::from(&session));
        info!(session_id, project, "session connected");

        let last_activity = Arc::new(AsyncMutex::new(Instant::now()));
        tokio::pin!(displace_rx);
        let mut displaced = false;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.pending.fail_session(&session_id);
                    break;
                }
                _ = &mut displace_rx => {
                    // A newer connection for this session_id has already
                    // overwritten our entry in the connection table; this
                    // connection must not touch that entry or the session's
                    // connected/disconnected bookkeeping on its way out.
                    displaced = true;
                    break;
                }
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(frame) => { let _ = framed.send(frame).await; }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                    let elapsed = last_activity.lock().await.elapsed();
                    if elapsed >= IDLE_TIMEOUT {
                        warn!(session_id, "connection idle-dead, closing");
                        break;
                    }
                }
                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            *last_activity.lock().await = Instant::now();
                            parse_errors = 0;
                            if let Err(e) = self.dispatch_frame(&session_id, &project, frame).await {
                                warn!(session_id, error = %e, "frame dispatch failed");
                            }
                        }
                        Some(Err(e)) => {
                            parse_errors += 1;
                            warn!(session_id, error = %e, parse_errors, "frame parse error");
                            if parse_errors >= MAX_PARSE_ERRORS {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        if displaced {
            info!(session_id, "connection closed after displacement by a newer handshake");
            return;
        }

        self.connections.set_state(&session_id, ConnectionState::Closed);
        self.connections
            .remove_if_current(&session_id, |h| h.outbound.same_channel(&this_connection));
        self.pending.fail_session(&session_id);
        self.memory.mark_disconnected(&session_id);
        if let Ok(log) = self.durable_log_for(&project).await {
            let mut disconnected = session;
            if let Some(count) = self.memory.session_event_count(&session_id) {
                disconnected.event_count = count;
            }
            disconnected.disconnect(now_ms());
            let _ = log.upsert_session(&disconnected).await;
        }
        info!(session_id, "session disconnected");
    }

    async fn accept_handshake(&self, frame: &Frame) -> CollectorResult<(String, String, Session)> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct HandshakePayload {
            app_name: String,
            sdk_version: String,
            session_id: String,
            #[serde(default)]
            build_meta: Option<BuildMeta>,
        }

        let payload: HandshakePayload = serde_json::from_value(frame.payload.clone())?;
        let project = self.registry.resolve_project(&payload.app_name);
        self.registry.ensure_project_dir(&project, now_ms()).await?;

        let session = Session::new(
            payload.session_id.clone(),
            project.clone(),
            payload.app_name.clone(),
            payload.sdk_version.clone(),
            now_ms(),
            payload.build_meta.clone(),
        );

        let log = self.durable_log_for(&project).await?;
        log.upsert_session(&session).await?;

        let synthetic = Event::new(
            session.session_id.clone(),
            session.connected_at,
            EventBody::Session(SessionEvent {
                app_name: payload.app_name,
                connected_at: session.connected_at,
                sdk_version: payload.sdk_version,
                build_meta: payload.build_meta,
            }),
        );
        self.memory.add(synthetic.clone());
        log.add(synthetic).await?;

        Ok((session.session_id.clone(), project, session))
    }

    async fn dispatch_frame(&self, session_id: &str, project: &str, frame: Frame) -> CollectorResult<()> {
        match frame.frame_type {
            FrameType::Handshake => {
                // A second handshake on an already-CONNECTED connection is a
                // protocol violation; the displacement path for a *new*
                // connection is handled by `accept_handshake` + `register`.
                Err(rts_core::CollectorError::protocol(
                    "handshake received after connection already established",
                ))
            }
            FrameType::Event => {
                #[derive(serde::Deserialize)]
                struct EventsPayload {
                    events: Vec<rts_core::Event>,
                }
                let payload: EventsPayload = serde_json::from_value(frame.payload)?;
                let log = self.durable_log_for(project).await?;
                for mut event in payload.events {
                    if event.session_id.is_empty() {
                        event.session_id = session_id.to_string();
                    }
                    self.memory.add(event.clone());
                    self.memory.record_session_event(session_id);
                    log.add(event).await?;
                }
                Ok(())
            }
            FrameType::Heartbeat => Ok(()),
            FrameType::CommandResponse => {
                #[derive(serde::Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct CommandResponsePayload {
                    request_id: String,
                    payload: serde_json::Value,
                }
                let payload: CommandResponsePayload = serde_json::from_value(frame.payload)?;
                self.pending.complete(&payload.request_id, payload.payload);
                Ok(())
            }
            FrameType::Command => Err(rts_core::CollectorError::protocol(
                "command frames are server-to-client only",
            )),
        }
    }

    /// Dispatches `command` to `session_id`'s active connection and
    /// waits (bounded) for the matching `command_response`, per spec
    /// section 4.4.2.
    pub async fn send_command(&self, session_id: &str, command: Command) -> CommandOutcome {
        let (request_id, rx) = self.pending.dispatch(session_id, command.clone(), now_ms());

        // `Command` already serializes as `{"command": "<name>", ...params}`
        // (its `#[serde(tag = "command")]`); `requestId` is spliced into
        // that same object to match the flat `command` frame payload of
        // spec section 6.1, rather than nesting it under another key.
        let mut payload = serde_json::to_value(&command).unwrap_or(serde_json::json!({}));
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("requestId".to_string(), serde_json::json!(request_id));
        }

        let frame = Frame {
            frame_type: FrameType::Command,
            payload,
            timestamp: now_ms(),
            session_id: Some(session_id.to_string()),
        };

        if !self.connections.send_frame(session_id, frame).await {
            return CommandOutcome::Disconnected;
        }

        crate::pending::await_with_timeout(rx).await
    }
}

async fn bind_with_retry(port: u16) -> std::io::Result<TcpListener> {
    let addr = format!("127.0.0.1:{port}");
    let mut attempt = 0;
    loop {
        match TcpListener::bind(&addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(attempt, error = %e, "bind failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => {
                error!(error = %e, "bind failed after max retries");
                return Err(e);
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_with_retry_succeeds_on_free_port() {
        let listener = bind_with_retry(0).await.unwrap();
        assert!(listener.local_addr().is_ok());
    }
}
