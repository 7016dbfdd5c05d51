use super::{RoomSession, SessionError, SessionResult};
use crate::store::WriteBatch;

impl RoomSession {
    /// Remove another player from the room (admin only)
    ///
    /// The target disappears from this client's view immediately and stays
    /// hidden for the boot grace period while the delete propagates. Booting
    /// someone who is not in the room is a no-op.
    pub async fn boot_player(&self, target_id: &str) -> SessionResult<()> {
        let user = self.ensure_active("boot players")?;
        if !self.is_admin(&user.uid).await? {
            tracing::debug!(
                "Rejected boot of {} by non-admin {} in room {}",
                target_id,
                user.uid,
                self.room_id
            );
            return Err(SessionError::NotAdmin("boot players"));
        }
        if target_id == user.uid {
            return Err(SessionError::InvalidInput(
                "the admin cannot boot themselves".to_string(),
            ));
        }

        let player_path = self.players_col().doc(target_id);
        if self.store.get(&player_path).await?.is_none() {
            tracing::debug!("Player {} is not in room {}", target_id, self.room_id);
            return Ok(());
        }

        let grace = self.config.boot_grace;
        let token = self.tombstones.insert(target_id, grace).await;
        self.republish_players().await;

        let batch = WriteBatch::new()
            .delete(player_path)
            .delete(self.votes_col().doc(target_id));
        if let Err(e) = self.store.commit(batch).await {
            tracing::error!(
                "Failed to boot player {} from room {}: {}",
                target_id,
                self.room_id,
                e
            );
            self.tombstones.release(target_id, token).await;
            self.republish_players().await;
            return Err(e.into());
        }

        tracing::info!(
            "Admin {} booted player {} from room {}",
            user.uid,
            target_id,
            self.room_id
        );

        // Trust the live subscription once the grace period is over
        let session = self.clone();
        let target = target_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if session.tombstones.release(&target, token).await {
                session.republish_players().await;
            }
        });
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);

        Ok(())
    }
}
