// =============================================================================
// WebSocket Handler — subscriber fanout for match-set deltas
// =============================================================================
//
// Clients connect to `/api/v1/ws?channels=<a,b,...>&user=<uid>` and receive:
//   1. One synthetic `initial` event per subscribed channel carrying its
//      full current match set.
//   2. Incremental `delta` events as evaluation cycles move memberships.
//
// An empty or absent `channels` parameter subscribes to every channel. The
// optional `user` parameter registers the connection in the active-user set
// read by the rule manager for logging.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::publish::ChannelDelta;

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Deserialize)]
pub struct WsQuery {
    channels: Option<String>,
    user: Option<String>,
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let channels: Vec<String> = query
        .channels
        .unwrap_or_default()
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    info!(channels = ?channels, user = ?query.user, "WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, channels, query.user))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single subscriber connection lifecycle.
///
/// Runs two concurrent arms via `tokio::select!`:
///   1. **Push arm** — forward broadcast deltas matching the subscription.
///   2. **Recv arm** — process incoming frames (Ping/Pong, Close).
async fn handle_ws_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    channels: Vec<String>,
    user: Option<String>,
) {
    use futures_util::{SinkExt, StreamExt};

    if let Some(user_id) = &user {
        state.rete.add_active_user(user_id);
        state.increment_version();
    }

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before sending the initial sets so no cycle falls into the
    // gap between snapshot and stream.
    let mut deltas = state.publisher.subscribe();

    // Initial full match sets.
    let initial_channels = if channels.is_empty() {
        // All system channels; user channels stream in as deltas.
        crate::rete::system_rules::all()
            .iter()
            .map(|r| crate::rete::system_rules::channel_for(&r.id).to_string())
            .collect()
    } else {
        channels.clone()
    };
    for event in state.publisher.initial_events(&initial_channels) {
        if send_delta(&mut sender, &event).await.is_err() {
            warn!("failed to send initial WebSocket event — disconnecting");
            cleanup(&state, &user);
            return;
        }
    }

    loop {
        tokio::select! {
            // ── Push arm: forward matching deltas ───────────────────────
            delta = deltas.recv() => {
                match delta {
                    Ok(delta) => {
                        if !channels.is_empty() && !channels.contains(&delta.channel) {
                            continue;
                        }
                        if let Err(e) = send_delta(&mut sender, &delta).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "subscriber lagged behind delta stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("delta stream closed — disconnecting subscriber");
                        break;
                    }
                }
            }

            // ── Recv arm: process incoming frames ───────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat any text message as a heartbeat.
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    cleanup(&state, &user);
}

// =============================================================================
// Helpers
// =============================================================================

/// Serialize and send one delta event over the WebSocket.
async fn send_delta<S>(sender: &mut S, delta: &ChannelDelta) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    use futures_util::SinkExt;

    match serde_json::to_string(delta) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "failed to serialize channel delta");
            Ok(())
        }
    }
}

/// Detach the subscriber from shared state when the connection closes.
fn cleanup(state: &Arc<AppState>, user: &Option<String>) {
    if let Some(user_id) = user {
        state.rete.remove_active_user(user_id);
        state.increment_version();
    }
    info!("WebSocket connection closed — cleanup complete");
}
