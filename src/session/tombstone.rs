//! Pending tombstones
//!
//! Players removed by this client stay hidden from the local membership view
//! until the store has had time to propagate the delete. Each entry carries a
//! deadline, so a tombstone can never outlive its grace period even if its
//! release is missed.

use crate::types::{Player, PlayerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Tombstone {
    token: u64,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct PendingTombstones {
    entries: Arc<RwLock<HashMap<PlayerId, Tombstone>>>,
    next_token: Arc<AtomicU64>,
}

impl PendingTombstones {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide `id` for at most `grace`; the returned token identifies this entry
    pub async fn insert(&self, id: &str, grace: Duration) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write().await;
        entries.retain(|_, t| t.expires_at > Instant::now());
        entries.insert(
            id.to_string(),
            Tombstone {
                token,
                expires_at: Instant::now() + grace,
            },
        );
        token
    }

    /// Drop the entry for `id` if it is still the one identified by `token`
    ///
    /// Returns true when something was removed. A later `insert` for the same
    /// player is left alone.
    pub async fn release(&self, id: &str, token: u64) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(t) if t.token == token => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Remove hidden players from a membership list
    pub async fn filter(&self, players: Vec<Player>) -> Vec<Player> {
        let entries = self.entries.read().await;
        if entries.is_empty() {
            return players;
        }
        let now = Instant::now();
        players
            .into_iter()
            .filter(|p| entries.get(&p.id).map_or(true, |t| t.expires_at <= now))
            .collect()
    }
}

#[cfg(test)]
impl PendingTombstones {
    pub async fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(id)
            .is_some_and(|t| t.expires_at > Instant::now())
    }

    pub async fn is_empty(&self) -> bool {
        let now = Instant::now();
        self.entries.read().await.values().all(|t| t.expires_at <= now)
    }
}
