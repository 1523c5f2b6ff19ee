pub mod broadcast;
pub mod messages;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::StreamExt;
use futures::SinkExt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;
use crate::transition;
use messages::{ClientMessage, ServerMessage};

/// WebSocket upgrade handler for the duplex channel at `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.broadcast.subscribe();
    state.broadcast.client_connected();

    // Fresh client: re-anchor the session, then send the current window.
    let initial = {
        let mut session = state.session.lock().await;
        session.reset_for_new_client(&state.candles);
        transition::snapshot_locked(&state, &session)
    };
    match initial {
        Ok(msg) => {
            if send_message(&mut sender, &msg).await.is_err() {
                state.broadcast.client_disconnected();
                return;
            }
        }
        Err(e) => tracing::warn!("initial snapshot unavailable: {e}"),
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("client fell behind, {n} updates dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::RecreationAck) => state.broadcast.record_ack(),
                        Ok(ClientMessage::Ping) => {
                            if send_message(&mut sender, &ServerMessage::Pong).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    state.broadcast.client_disconnected();
}

async fn send_message(
    sender: &mut (impl SinkExt<Message> + Unpin),
    msg: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(msg).map_err(|_| ())?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
