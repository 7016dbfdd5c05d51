use crate::session::RoundSummary;
use crate::types::*;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        name: String,
        #[serde(default)]
        avatar: Option<CatAvatar>,
    },
    Leave,
    SelectCard {
        value: CardValue,
    },
    StartVoting,
    RevealCards,
    ResetGame,
    /// Remove a player from the room (admin only)
    BootPlayer {
        player_id: PlayerId,
    },
    SendMessage {
        text: String,
    },
    SendReaction {
        message_id: MessageId,
        emoji: String,
    },
    UpdateAvatar {
        avatar: CatAvatar,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        room_id: RoomId,
        /// Pass back as `?token=` when reconnecting to keep the same identity
        resume_token: String,
        deck: Vec<Card>,
        server_now: String,
    },
    /// Sent to the joining client once its player document is written
    Joined {
        player: Player,
    },
    RoomState {
        game_state: GameState,
        admin_id: Option<PlayerId>,
    },
    Players {
        players: Vec<Player>,
        summary: RoundSummary,
    },
    SelectedCard {
        value: Option<CardValue>,
    },
    Messages {
        list: Vec<Message>,
    },
    /// This client was removed by the admin; the connection closes after `redirect_in_ms`
    Booted {
        redirect_in_ms: u64,
    },
    Error {
        code: String,
        msg: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tagging() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"t":"select_card","value":"5"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SelectCard { value } if value == "5"));

        let msg: ClientMessage = serde_json::from_str(r#"{"t":"join","name":"Alice"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Join { avatar: None, .. }));
    }

    #[test]
    fn test_server_message_tagging() {
        let json = serde_json::to_value(ServerMessage::Booted {
            redirect_in_ms: 3000,
        })
        .unwrap();
        assert_eq!(json["t"], "booted");
        assert_eq!(json["redirect_in_ms"], 3000);
    }
}
