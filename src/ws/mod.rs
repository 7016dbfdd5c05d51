pub mod handlers;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::catalog;
use crate::identity::IdentityProvider;
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::session::RoomSession;
use crate::state::AppState;
use crate::types::RoomId;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Resume token from an earlier `welcome`
    pub token: Option<String>,
}

/// WebSocket upgrade handler for `/rooms/{room_id}/ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<RoomId>,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(
        "WebSocket connection request for room {} (resuming: {})",
        room_id,
        params.token.is_some()
    );

    ws.on_upgrade(move |socket| handle_socket(socket, room_id, params, state))
}

/// Handle individual WebSocket connection
///
/// Every connection gets its own session. The identity is new unless the
/// client presents a resume token.
async fn handle_socket(socket: WebSocket, room_id: RoomId, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (auth, resume_token) = state.connect_identity(params.token.as_deref()).await;
    let identity = auth.sign_in().await;
    let session = RoomSession::open(
        room_id.clone(),
        state.store.clone(),
        auth.clone(),
        state.session_config.clone(),
    )
    .await;

    tracing::info!("WebSocket connected to room {} as {}", room_id, identity.uid);

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        room_id: room_id.clone(),
        resume_token,
        deck: catalog::deck(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send_message(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        session.close().await;
        return;
    }

    let mut room_rx = session.subscribe_room();
    let mut players_rx = session.subscribe_players();
    let mut selected_rx = session.subscribe_selected_card();
    let mut messages_rx = session.subscribe_messages();
    let mut booted_rx = session.subscribe_booted();

    // Initial snapshot of every view
    room_rx.borrow_and_update();
    players_rx.borrow_and_update();
    selected_rx.borrow_and_update();
    messages_rx.borrow_and_update();
    booted_rx.borrow_and_update();
    let initial = [
        room_state_message(&session),
        Some(players_message(&session)),
        Some(ServerMessage::SelectedCard {
            value: session.selected_card(),
        }),
        Some(ServerMessage::Messages {
            list: session.messages(),
        }),
    ];
    for msg in initial.iter().flatten() {
        if !send_message(&mut sender, msg).await {
            session.close().await;
            return;
        }
    }

    let evicted = session.wait_evicted();
    tokio::pin!(evicted);

    loop {
        tokio::select! {
            changed = room_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                room_rx.borrow_and_update();
                if let Some(msg) = room_state_message(&session) {
                    if !send_message(&mut sender, &msg).await {
                        break;
                    }
                }
            }

            changed = players_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                players_rx.borrow_and_update();
                if !send_message(&mut sender, &players_message(&session)).await {
                    break;
                }
            }

            changed = selected_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = selected_rx.borrow_and_update().clone();
                if !send_message(&mut sender, &ServerMessage::SelectedCard { value }).await {
                    break;
                }
            }

            changed = messages_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let list = messages_rx.borrow_and_update().clone();
                if !send_message(&mut sender, &ServerMessage::Messages { list }).await {
                    break;
                }
            }

            changed = booted_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let booted = *booted_rx.borrow_and_update();
                if booted {
                    tracing::info!("Client {} was booted from room {}", identity.uid, room_id);
                    let msg = ServerMessage::Booted {
                        redirect_in_ms: duration_ms(session.config().eviction_delay),
                    };
                    if !send_message(&mut sender, &msg).await {
                        break;
                    }
                }
            }

            // Send the booted client away once the redirect delay has passed
            _ = &mut evicted => {
                let frame = CloseFrame {
                    code: close_code::POLICY,
                    reason: "booted".into(),
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                break;
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &session, auth.as_ref()).await
                                {
                                    if !send_message(&mut sender, &response).await {
                                        tracing::error!("Failed to send response");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                let _ = send_message(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    session.close().await;
    tracing::info!(
        "WebSocket connection closed for {} in room {}",
        identity.uid,
        room_id
    );
}

/// Serialize and send; `false` once the client is gone
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

fn room_state_message(session: &RoomSession) -> Option<ServerMessage> {
    session.room().map(|room| ServerMessage::RoomState {
        game_state: room.game_state,
        admin_id: room.admin_id,
    })
}

fn players_message(session: &RoomSession) -> ServerMessage {
    ServerMessage::Players {
        players: session.players(),
        summary: session.round_summary(),
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
