use super::{RoomSession, SessionError, SessionResult};
use crate::store::{Fields, WriteBatch};
use crate::types::*;
use serde_json::json;

const MAX_MESSAGE_CHARS: usize = 1000;

impl RoomSession {
    /// Append a chat message; the store clock orders it among the others
    pub async fn send_message(&self, sender: &str, text: &str) -> SessionResult<MessageId> {
        self.ensure_active("send messages")?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::InvalidInput(
                "message must not be blank".to_string(),
            ));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(SessionError::InvalidInput(format!(
                "message is longer than {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let id = ulid::Ulid::new().to_string();
        let fields = Fields::new()
            .value("id", json!(id))
            .value("sender", json!(sender))
            .value("text", json!(text))
            .server_timestamp("timestamp")
            .value("reactions", json!([]));
        if let Err(e) = self
            .store
            .commit(WriteBatch::new().create(self.chat_col().doc(&id), fields))
            .await
        {
            tracing::error!("Failed to send message in room {}: {}", self.room_id, e);
            return Err(e.into());
        }

        Ok(id)
    }

    /// Append a reaction to a message
    ///
    /// The append happens inside the store, so concurrent reactions to the
    /// same message never overwrite each other.
    pub async fn send_reaction(
        &self,
        sender: &str,
        emoji: &str,
        message_id: &str,
    ) -> SessionResult<()> {
        self.ensure_active("react to messages")?;

        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(SessionError::InvalidInput(
                "reaction must not be blank".to_string(),
            ));
        }

        let reaction = Reaction {
            sender: sender.to_string(),
            emoji: emoji.to_string(),
        };
        let fields = Fields::new().append("reactions", vec![json!(reaction)]);
        if let Err(e) = self
            .store
            .update(&self.chat_col().doc(message_id), fields)
            .await
        {
            tracing::error!(
                "Failed to react to message {} in room {}: {}",
                message_id,
                self.room_id,
                e
            );
            return Err(e.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn wait_messages<F>(session: &RoomSession, pred: F) -> Vec<Message>
    where
        F: FnMut(&Vec<Message>) -> bool,
    {
        let mut rx = session.subscribe_messages();
        let messages = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for messages")
            .expect("messages channel closed")
            .clone();
        messages
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let store = MemoryStore::new();
        let alice = signed_in(&store, "r1").await;
        let bob = signed_in(&store, "r1").await;

        alice.send_message("Alice", "first").await.unwrap();
        bob.send_message("Bob", "second").await.unwrap();
        alice.send_message("Alice", "third").await.unwrap();

        let messages = wait_messages(&bob, |m| m.len() == 3).await;
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(messages.iter().all(|m| m.reactions.is_empty()));
        assert_eq!(messages[1].sender, "Bob");
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let store = MemoryStore::new();
        let alice = signed_in(&store, "r1").await;

        assert!(matches!(
            alice.send_message("Alice", "  \n ").await,
            Err(SessionError::InvalidInput(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_overlong_message_is_rejected() {
        let store = MemoryStore::new();
        let alice = signed_in(&store, "r1").await;
        let text = "m".repeat(MAX_MESSAGE_CHARS + 1);

        assert!(matches!(
            alice.send_message("Alice", &text).await,
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reactions_all_land() {
        let store = MemoryStore::new();
        let alice = signed_in(&store, "r1").await;
        let bob = signed_in(&store, "r1").await;
        let id = alice.send_message("Alice", "estimate?").await.unwrap();

        let (a, b) = tokio::join!(
            alice.send_reaction("Alice", "😺", &id),
            bob.send_reaction("Bob", "🙀", &id),
        );
        a.unwrap();
        b.unwrap();

        let messages = wait_messages(&alice, |m| m.len() == 1 && m[0].reactions.len() == 2).await;
        let senders: Vec<_> = messages[0].reactions.iter().map(|r| r.sender.as_str()).collect();
        assert!(senders.contains(&"Alice"));
        assert!(senders.contains(&"Bob"));
    }

    #[tokio::test]
    async fn test_reaction_to_unknown_message_fails() {
        let store = MemoryStore::new();
        let alice = signed_in(&store, "r1").await;

        assert!(matches!(
            alice.send_reaction("Alice", "👍", "missing").await,
            Err(SessionError::Store(_))
        ));
    }
}
