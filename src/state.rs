use crate::config::AppConfig;
use crate::identity::{AnonymousAuth, IdentityProvider};
use crate::session::SessionConfig;
use crate::store::{MemoryStore, RoomStore};
use crate::types::Identity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared server state handed to every connection
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RoomStore>,
    pub session_config: SessionConfig,
    /// Resume tokens handed out to connections, by token
    identities: Arc<RwLock<HashMap<String, Identity>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn RoomStore>, session_config: SessionConfig) -> Self {
        Self {
            store,
            session_config,
            identities: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// In-memory store configured from `config`
    pub fn from_config(config: &AppConfig) -> Self {
        let store = MemoryStore::with_propagation_delay(config.store_propagation_delay);
        Self::new(Arc::new(store), config.session.clone())
    }

    /// Identity for a new connection, plus the token that brings it back
    ///
    /// A known `resume_token` restores the identity it was issued for, so a
    /// reconnecting client keeps its player and admin role. Unknown or missing
    /// tokens get a fresh anonymous identity and a new token.
    pub async fn connect_identity(
        &self,
        resume_token: Option<&str>,
    ) -> (Arc<AnonymousAuth>, String) {
        if let Some(token) = resume_token {
            if let Some(identity) = self.identities.read().await.get(token).cloned() {
                tracing::info!("Resumed identity {}", identity.uid);
                return (Arc::new(AnonymousAuth::resumed(identity)), token.to_string());
            }
            tracing::debug!("Unknown resume token, issuing a new identity");
        }

        let auth = Arc::new(AnonymousAuth::new());
        let identity = auth.sign_in().await;
        let token = ulid::Ulid::new().to_string();
        self.identities.write().await.insert(token.clone(), identity);
        (auth, token)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RoomSession;
    use crate::store::{CollectionPath, Query};

    async fn open(state: &AppState, auth: Arc<AnonymousAuth>) -> RoomSession {
        RoomSession::open(
            "r1",
            state.store.clone(),
            auth,
            state.session_config.clone(),
        )
        .await
    }

    #[tokio::test]
    async fn test_reconnect_with_token_keeps_player() {
        let state = AppState::default();

        let (auth, token) = state.connect_identity(None).await;
        let first = open(&state, auth).await;
        let player = first.join("Alice").await.unwrap();
        assert!(player.is_admin);
        first.close().await;

        let (auth, resumed_token) = state.connect_identity(Some(&token)).await;
        assert_eq!(resumed_token, token);
        let second = open(&state, auth).await;
        let again = second.join("Alice").await.unwrap();

        assert_eq!(again.id, player.id);
        assert!(again.is_admin);
        let players = state
            .store
            .query(&Query::collection(CollectionPath::new("rooms/r1/players")))
            .await
            .unwrap();
        assert_eq!(players.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_gets_fresh_identity() {
        let state = AppState::default();
        let (first, first_token) = state.connect_identity(None).await;

        let (second, second_token) = state.connect_identity(Some("not-a-token")).await;

        assert_ne!(second_token, first_token);
        assert_ne!(second_token, "not-a-token");
        assert_ne!(first.current_user(), second.current_user());
        assert!(second.current_user().is_some());
    }
}
