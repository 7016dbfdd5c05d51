use super::{decode_all, RoomSession, SessionError, SessionResult};
use crate::catalog;
use crate::store::{DocumentSnapshot, Fields, Query, StoreError, WriteBatch};
use crate::types::*;
use serde_json::json;
use tokio::sync::watch;

/// Local bookkeeping for the membership view and boot detection
#[derive(Debug, Default)]
pub(super) struct MembershipState {
    /// Last membership reported by the store, before local hiding
    pub raw: Vec<Player>,
    /// Our own player document has been observed since the last join
    pub seen_self: bool,
    /// We removed ourselves; our absence is expected
    pub leaving: bool,
}

impl RoomSession {
    /// Join the room as `name`, creating the room on first use
    ///
    /// The first identity to join a room becomes its admin. Rejoining
    /// updates name and avatar in place and keeps the current vote.
    pub async fn join(&self, name: &str) -> SessionResult<Player> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidInput(
                "display name must not be blank".to_string(),
            ));
        }
        let Some(user) = self.identity.current_user() else {
            tracing::debug!("Ignoring join to room {} before sign-in", self.room_id);
            return Err(SessionError::IdentityNotReady);
        };

        let is_admin = self.claim_admin(&user.uid).await?;

        let avatar = self.avatar.read().await.clone();
        let mut fields = Fields::new()
            .value("id", json!(user.uid))
            .value("name", json!(name))
            .value(
                "avatar",
                serde_json::to_value(&avatar).map_err(StoreError::Encode)?,
            );
        if let Some(is_admin) = is_admin {
            fields = fields.value("isAdmin", json!(is_admin));
        }

        // A fresh join clears any earlier leave or boot; undone if the write fails
        let was_leaving = std::mem::replace(&mut self.membership.write().await.leaving, false);
        let was_booted = self.booted_tx.send_replace(false);

        let player_path = self.players_col().doc(&user.uid);
        if let Err(e) = self.store.merge(&player_path, fields).await {
            tracing::error!("Failed to join room {}: {}", self.room_id, e);
            self.membership.write().await.leaving = was_leaving;
            self.booted_tx.send_replace(was_booted);
            return Err(e.into());
        }
        *self.display_name.write().await = Some(name.to_string());

        let player = match self.store.get(&player_path).await? {
            Some(doc) => doc.decode::<Player>()?,
            None => return Err(StoreError::NotFound(player_path).into()),
        };

        tracing::info!(
            "Player {} joined room {} as {} (admin: {})",
            player.id,
            self.room_id,
            player.name,
            player.is_admin
        );
        Ok(player)
    }

    /// Join with a new avatar, written together with the name in one merge
    ///
    /// The avatar is checked before anything is written and the previous one
    /// is restored if the join fails.
    pub async fn join_with_avatar(&self, name: &str, avatar: CatAvatar) -> SessionResult<Player> {
        catalog::validate_avatar(&avatar).map_err(SessionError::InvalidInput)?;

        let previous = std::mem::replace(&mut *self.avatar.write().await, avatar);
        match self.join(name).await {
            Ok(player) => Ok(player),
            Err(e) => {
                *self.avatar.write().await = previous;
                Err(e)
            }
        }
    }

    /// Remove our own player and vote documents
    pub async fn leave(&self) -> SessionResult<()> {
        let Some(user) = self.identity.current_user() else {
            tracing::debug!("Ignoring leave from room {} before sign-in", self.room_id);
            return Err(SessionError::IdentityNotReady);
        };

        let previous = {
            let mut state = self.membership.write().await;
            let previous = (state.seen_self, state.leaving);
            state.seen_self = false;
            state.leaving = true;
            previous
        };

        let batch = WriteBatch::new()
            .delete(self.players_col().doc(&user.uid))
            .delete(self.votes_col().doc(&user.uid));
        if let Err(e) = self.store.commit(batch).await {
            tracing::error!("Failed to leave room {}: {}", self.room_id, e);
            let mut state = self.membership.write().await;
            (state.seen_self, state.leaving) = previous;
            return Err(e.into());
        }

        self.selected_tx.send_replace(None);
        tracing::info!("Player {} left room {}", user.uid, self.room_id);
        Ok(())
    }

    /// Change the avatar used for this and future joins
    pub async fn update_avatar(&self, avatar: CatAvatar) -> SessionResult<()> {
        if self.is_booted() {
            return Err(SessionError::Booted);
        }
        catalog::validate_avatar(&avatar).map_err(SessionError::InvalidInput)?;

        *self.avatar.write().await = avatar.clone();
        let Some(user) = self.identity.current_user() else {
            return Ok(());
        };

        let fields = Fields::new().value(
            "avatar",
            serde_json::to_value(&avatar).map_err(StoreError::Encode)?,
        );
        match self
            .store
            .update(&self.players_col().doc(&user.uid), fields)
            .await
        {
            Ok(()) => Ok(()),
            // Not joined yet: the avatar is applied on join
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => {
                tracing::error!("Failed to update avatar in room {}: {}", self.room_id, e);
                Err(e.into())
            }
        }
    }

    /// Decide the admin flag for `uid`, creating the room if it does not exist
    ///
    /// Returns `None` when the flag cannot be decided and must be left as stored.
    async fn claim_admin(&self, uid: &str) -> SessionResult<Option<bool>> {
        let room_path = self.room_doc();

        let existing = match self.store.get(&room_path).await? {
            Some(doc) => doc,
            None => {
                let create = WriteBatch::new().create(
                    room_path.clone(),
                    Fields::new()
                        .value("gameState", json!(GameState::Voting))
                        .value("adminId", json!(uid))
                        .server_timestamp("createdAt"),
                );
                match self.store.commit(create).await {
                    Ok(()) => {
                        tracing::info!("Created room {} with admin {}", self.room_id, uid);
                        return Ok(Some(true));
                    }
                    // Someone else created it first
                    Err(StoreError::AlreadyExists(_)) => {
                        match self.store.get(&room_path).await? {
                            Some(doc) => doc,
                            None => return Err(StoreError::NotFound(room_path).into()),
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to create room {}: {}", self.room_id, e);
                        return Err(e.into());
                    }
                }
            }
        };

        let room: Room = existing.decode()?;
        if let Some(admin_id) = room.admin_id {
            return Ok(Some(admin_id == uid));
        }

        // Room predates admin tracking: the first player in an empty room takes it
        let players = self
            .store
            .query(&Query::collection(self.players_col()))
            .await?;
        if players.is_empty() {
            self.store
                .merge(&room_path, Fields::new().value("adminId", json!(uid)))
                .await?;
            tracing::info!("Backfilled admin {} for room {}", uid, self.room_id);
            Ok(Some(true))
        } else {
            Ok(None)
        }
    }

    pub(super) async fn forward_players(self, mut rx: watch::Receiver<Vec<DocumentSnapshot>>) {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            self.apply_membership(decode_all(&snapshot)).await;

            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Record a membership snapshot from the store and detect our own removal
    async fn apply_membership(&self, players: Vec<Player>) {
        let me = self.identity.current_user().map(|user| user.uid);

        {
            let mut state = self.membership.write().await;
            if let Some(uid) = me {
                let present = players.iter().any(|p| p.id == uid);
                if present && !state.leaving {
                    state.seen_self = true;
                } else if !present && state.seen_self && !state.leaving {
                    state.seen_self = false;
                    self.booted_tx.send_replace(true);
                    tracing::warn!("Player {} was removed from room {}", uid, self.room_id);
                }
            }
            state.raw = players;
        }

        self.republish_players().await;
    }

    /// Publish the membership view, hiding players with a pending tombstone
    pub(super) async fn republish_players(&self) {
        let raw = self.membership.read().await.raw.clone();
        let visible = self.tombstones.filter(raw).await;
        self.players_tx.send_replace(visible);
    }
}
