use super::{RoomSession, SessionError, SessionResult};
use crate::catalog;
use crate::store::{DocPath, Fields, Query, WriteBatch};
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Read-side view of the current round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSummary {
    pub total: usize,
    pub voted: usize,
    /// Every player has picked a card
    pub all_voted: bool,
    pub consensus: bool,
}

/// All non-null votes agree; vacuously true for zero or one voter
pub fn has_consensus(players: &[Player]) -> bool {
    let mut votes = players.iter().filter_map(|p| p.vote.as_deref());
    match votes.next() {
        Some(first) => votes.all(|v| v == first),
        None => true,
    }
}

pub fn round_summary(players: &[Player]) -> RoundSummary {
    let voted = players.iter().filter(|p| p.vote.is_some()).count();
    RoundSummary {
        total: players.len(),
        voted,
        all_voted: !players.is_empty() && voted == players.len(),
        consensus: has_consensus(players),
    }
}

impl RoomSession {
    /// Record our card for the current round
    ///
    /// The selection shows up locally right away and is rolled back if the
    /// write fails.
    pub async fn select_card(&self, value: &str) -> SessionResult<()> {
        let user = self.ensure_active("select a card")?;
        if self.game_state() != GameState::Voting {
            return Err(SessionError::InvalidInput(
                "cards are revealed; start a new round to vote again".to_string(),
            ));
        }
        if !catalog::is_card(value) {
            return Err(SessionError::InvalidInput(format!(
                "{} is not a card in the deck",
                value
            )));
        }

        let previous = self.selected_tx.send_replace(Some(value.to_string()));

        let batch = WriteBatch::new()
            .set(
                self.votes_col().doc(&user.uid),
                Fields::new()
                    .value("uid", json!(user.uid))
                    .value("value", json!(value))
                    .server_timestamp("votedAt"),
            )
            .update(
                self.players_col().doc(&user.uid),
                Fields::new().value("vote", json!(value)),
            );
        if let Err(e) = self.store.commit(batch).await {
            tracing::error!("Failed to record vote in room {}: {}", self.room_id, e);
            self.selected_tx.send_replace(previous);
            return Err(e.into());
        }

        tracing::debug!("Player {} voted in room {}", user.uid, self.room_id);
        Ok(())
    }

    /// Start a new round: back to voting with every vote cleared in one batch
    pub async fn start_voting(&self) -> SessionResult<()> {
        let user = self.ensure_active("start voting")?;
        self.ensure_round_control(&user.uid, "start voting").await?;

        let players = self
            .store
            .query(&Query::collection(self.players_col()))
            .await?;
        let votes = self
            .store
            .query(&Query::collection(self.votes_col()))
            .await?;

        let mut batch = WriteBatch::new().update(
            self.room_doc(),
            Fields::new().value("gameState", json!(GameState::Voting)),
        );
        // Also clear votes of listed players cast after the reads
        let mut stale_votes: BTreeSet<DocPath> = votes.iter().map(|v| v.path.clone()).collect();
        for player in &players {
            batch = batch.update(player.path.clone(), Fields::new().value("vote", Value::Null));
            stale_votes.insert(self.votes_col().doc(player.id()));
        }
        for path in stale_votes {
            batch = batch.delete(path);
        }

        let previous_room = self.echo_game_state(GameState::Voting);
        let previous_card = self.selected_tx.send_replace(None);
        if let Err(e) = self.store.commit(batch).await {
            tracing::error!("Failed to start voting in room {}: {}", self.room_id, e);
            self.room_tx.send_replace(previous_room);
            self.selected_tx.send_replace(previous_card);
            return Err(e.into());
        }

        tracing::info!(
            "New round in room {}: cleared {} votes for {} players",
            self.room_id,
            votes.len(),
            players.len()
        );
        Ok(())
    }

    /// Show everyone's cards
    pub async fn reveal_cards(&self) -> SessionResult<()> {
        let user = self.ensure_active("reveal cards")?;
        self.ensure_round_control(&user.uid, "reveal cards").await?;

        let previous = self.echo_game_state(GameState::Revealed);
        let fields = Fields::new().value("gameState", json!(GameState::Revealed));
        if let Err(e) = self.store.update(&self.room_doc(), fields).await {
            tracing::error!("Failed to reveal cards in room {}: {}", self.room_id, e);
            self.room_tx.send_replace(previous);
            return Err(e.into());
        }

        tracing::info!("Cards revealed in room {}", self.room_id);
        Ok(())
    }

    /// Same as [`RoomSession::start_voting`]
    pub async fn reset_game(&self) -> SessionResult<()> {
        self.start_voting().await
    }

    /// Summary of the visible membership
    pub fn round_summary(&self) -> RoundSummary {
        round_summary(&self.players_tx.borrow())
    }

    async fn ensure_round_control(&self, uid: &str, action: &'static str) -> SessionResult<()> {
        if self.config.admin_only_round_control && !self.is_admin(uid).await? {
            tracing::debug!("Rejected attempt to {} by non-admin {}", action, uid);
            return Err(SessionError::NotAdmin(action));
        }
        Ok(())
    }
}
