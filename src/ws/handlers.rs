//! WebSocket message dispatch
//!
//! Client messages map onto [`RoomSession`] operations. Most operations answer
//! through the session's live views, so a successful call usually returns no
//! direct response.

use crate::identity::IdentityProvider;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{RoomSession, SessionError};
use crate::store::StoreError;

/// Sender name used for chat before the client has joined
const ANONYMOUS_SENDER: &str = "Anonymous";

/// Handle a client message and return an optional direct response
pub async fn handle_message(
    msg: ClientMessage,
    session: &RoomSession,
    identity: &dyn IdentityProvider,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Join { name, avatar } => {
            identity.sign_in().await;

            let joined = match avatar {
                Some(avatar) => session.join_with_avatar(&name, avatar).await,
                None => session.join(&name).await,
            };
            match joined {
                Ok(player) => Some(ServerMessage::Joined { player }),
                Err(e) => error_response("join", e),
            }
        }

        ClientMessage::Leave => respond("leave", session.leave().await),

        ClientMessage::SelectCard { value } => {
            respond("select a card", session.select_card(&value).await)
        }

        ClientMessage::StartVoting => respond("start voting", session.start_voting().await),

        ClientMessage::RevealCards => respond("reveal cards", session.reveal_cards().await),

        ClientMessage::ResetGame => respond("reset the game", session.reset_game().await),

        ClientMessage::BootPlayer { player_id } => {
            tracing::info!("Boot request for player {}", player_id);
            respond("boot a player", session.boot_player(&player_id).await)
        }

        ClientMessage::SendMessage { text } => {
            let sender = sender_name(session).await;
            respond("send a message", session.send_message(&sender, &text).await)
        }

        ClientMessage::SendReaction { message_id, emoji } => {
            let sender = sender_name(session).await;
            respond(
                "react to a message",
                session.send_reaction(&sender, &emoji, &message_id).await,
            )
        }

        ClientMessage::UpdateAvatar { avatar } => {
            respond("update avatar", session.update_avatar(avatar).await)
        }
    }
}

async fn sender_name(session: &RoomSession) -> String {
    session
        .display_name()
        .await
        .unwrap_or_else(|| ANONYMOUS_SENDER.to_string())
}

fn respond<T>(action: &str, result: Result<T, SessionError>) -> Option<ServerMessage> {
    match result {
        Ok(_) => None,
        Err(e) => error_response(action, e),
    }
}

/// Map a session error onto the wire
///
/// Booted and signed-out clients are ignored without a reply.
fn error_response(action: &str, err: SessionError) -> Option<ServerMessage> {
    let code = match &err {
        SessionError::IdentityNotReady | SessionError::Booted => {
            tracing::debug!("Dropping request to {}: {}", action, err);
            return None;
        }
        SessionError::NotAdmin(_) => "NOT_ADMIN",
        SessionError::InvalidInput(_) => "INVALID_INPUT",
        SessionError::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
        SessionError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
        SessionError::Store(_) => "STORE_ERROR",
    };

    tracing::warn!("Failed to {}: {}", action, err);
    Some(ServerMessage::Error {
        code: code.to_string(),
        msg: err.to_string(),
    })
}
