use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type RoomId = String;
pub type PlayerId = String;
pub type MessageId = String;
pub type CardValue = String;

/// Epoch milliseconds as assigned by the store clock
pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    #[default]
    Voting,
    Revealed,
}

impl GameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::Voting => "voting",
            GameState::Revealed => "revealed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(default)]
    pub game_state: GameState,
    /// Missing on rooms created before admins were tracked
    #[serde(default)]
    pub admin_id: Option<PlayerId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Avatar options picked in the customizer; values come from `catalog`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CatAvatar {
    pub color: String,
    pub accessory: String,
    pub mood: String,
}

impl Default for CatAvatar {
    fn default() -> Self {
        Self {
            color: "orange".to_string(),
            accessory: "none".to_string(),
            mood: "happy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub avatar: CatAvatar,
    #[serde(default)]
    pub vote: Option<CardValue>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub uid: PlayerId,
    pub value: CardValue,
    #[serde(default)]
    pub voted_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub sender: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub text: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

/// One estimation card of the deck
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub value: CardValue,
    pub description: String,
}

/// Signed-in identity issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: PlayerId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_document_defaults() {
        let player: Player =
            serde_json::from_value(serde_json::json!({"id": "u1", "name": "Alice"})).unwrap();

        assert_eq!(player.vote, None);
        assert!(!player.is_admin);
        assert_eq!(player.avatar, CatAvatar::default());
    }

    #[test]
    fn test_room_uses_camel_case_fields() {
        let room = Room {
            game_state: GameState::Revealed,
            admin_id: Some("u1".to_string()),
            created_at: Some(42),
        };
        let json = serde_json::to_value(&room).unwrap();

        assert_eq!(json["gameState"], "revealed");
        assert_eq!(json["adminId"], "u1");
        assert_eq!(json["createdAt"], 42);
    }
}
