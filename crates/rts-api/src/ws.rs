//! Live event stream (`GET /api/ws/events`): on connect, subscribes to
//! the in-memory event bus and relays every event as a best-effort
//! `{type:"event", data:<Event>}` frame. A client that can't keep up is
//! dropped rather than allowed to back-pressure the bus.
//!
//! Grounded on the teacher's `server.rs::websocket_handler` /
//! `actor.rs`'s message loop (`actix_ws::handle`, a `Session` handle plus
//! a polled `MessageStream`), generalized from a bidirectional chat
//! protocol to a one-way relay.

use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{debug, info};

use crate::state::AppState;

pub async fn ws_events(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let (token, mut rx) = state.memory.subscribe();
    info!("live event stream connected");

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                incoming = msg_stream.next() => {
                    match incoming {
                        Some(Ok(actix_ws::Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!(error = %e, "live event stream protocol error");
                            break;
                        }
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let frame = json!({ "type": "event", "data": event });
                    if session.text(frame.to_string()).await.is_err() {
                        break;
                    }
                }
            }
        }

        state.memory.unsubscribe(token);
        let _ = session.close(None).await;
        info!("live event stream disconnected");
    });

    Ok(response)
}
