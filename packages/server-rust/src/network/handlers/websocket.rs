//! WebSocket endpoint for real-time rooms.
//!
//! Each connection gets a write task fed by its bounded outbound channel;
//! the read loop parses client frames and drives the fan-out adapter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use gatehouse_core::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ApiState;
use crate::fanout::now_millis;
use crate::network::client_addr::RemoteAddr;
use crate::network::{ConnectionHandle, OutboundMessage};

/// Longest accepted event name, matching the HTTP publish endpoint.
pub const MAX_EVENT_LEN: usize = 64;

/// Upgrades an HTTP connection to a WebSocket connection.
pub async fn ws_upgrade_handler(
    State(state): State<ApiState>,
    RemoteAddr(remote): RemoteAddr,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.write_buffer_size(state.connection.ws_write_buffer_size)
        .max_write_buffer_size(state.connection.ws_max_write_buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, state, remote))
}

async fn handle_socket(socket: WebSocket, state: ApiState, remote: Option<SocketAddr>) {
    let (handle, rx) = state.registry.register(&state.connection, remote);
    let conn_id = handle.id;
    info!(conn = %conn_id, remote = ?remote, "websocket connected");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, rx));

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn = %conn_id, error = %e, "websocket read failed");
                break;
            }
        };
        match frame {
            Message::Text(text) => handle_text(&state, &handle, text.as_str()).await,
            Message::Binary(_) => reply(
                &handle,
                &ServerFrame::Error {
                    message: "binary frames are not supported".to_string(),
                },
            ),
            Message::Close(_) => break,
            // Ping/pong are answered by the protocol layer.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.fanout.leave_all(&handle).await;
    state.registry.remove(conn_id);
    writer.abort();
    info!(conn = %conn_id, "websocket disconnected");
}

async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            OutboundMessage::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutboundMessage::Close(reason) => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: reason.unwrap_or_default().into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

fn reply(handle: &Arc<ConnectionHandle>, frame: &ServerFrame) {
    match frame.to_text() {
        Ok(text) => {
            if !handle.try_send(OutboundMessage::Text(text)) {
                debug!(conn = %handle.id, "reply dropped; connection backlogged");
            }
        }
        Err(e) => warn!(conn = %handle.id, error = %e, "failed to encode server frame"),
    }
}

async fn handle_text(state: &ApiState, handle: &Arc<ConnectionHandle>, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            reply(
                handle,
                &ServerFrame::Error {
                    message: format!("invalid frame: {e}"),
                },
            );
            return;
        }
    };

    match frame {
        ClientFrame::Join { room } => {
            state.fanout.join(handle, &room).await;
            reply(handle, &ServerFrame::Joined { room });
        }
        ClientFrame::Leave { room } => {
            state.fanout.leave(handle, &room).await;
            reply(handle, &ServerFrame::Left { room });
        }
        ClientFrame::Publish { room, event, data } => {
            if event.is_empty() || event.chars().count() > MAX_EVENT_LEN {
                reply(
                    handle,
                    &ServerFrame::Error {
                        message: format!("event must contain 1 to {MAX_EVENT_LEN} characters"),
                    },
                );
                return;
            }
            state.fanout.publish(&room, &event, data).await;
        }
        ClientFrame::Ping { timestamp } => reply(
            handle,
            &ServerFrame::Pong {
                timestamp,
                server_time: now_millis(),
            },
        ),
    }
}
