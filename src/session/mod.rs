mod chat;
mod membership;
mod moderation;
mod tombstone;
mod vote;

use crate::identity::IdentityProvider;
use crate::store::{CollectionPath, DocPath, DocumentSnapshot, Query, RoomStore, StoreError};
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use self::membership::MembershipState;
pub use self::tombstone::PendingTombstones;
pub use self::vote::{has_consensus, round_summary, RoundSummary};

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Why a session operation left the room unchanged
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in yet")]
    IdentityNotReady,

    #[error("removed from the room by the admin")]
    Booted,

    #[error("only the room admin can {0}")]
    NotAdmin(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a booted player stays hidden locally while the delete propagates
    pub boot_grace: Duration,
    /// Delay between a client noticing it was booted and being sent away
    pub eviction_delay: Duration,
    /// Restrict start/reveal/reset to the admin
    pub admin_only_round_control: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boot_grace: Duration::from_millis(1500),
            eviction_delay: Duration::from_secs(3),
            admin_only_round_control: false,
        }
    }
}

/// One client's connection to one room
///
/// Owns the live views of the room (game state, membership, own vote, chat)
/// and the `booted` flag. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct RoomSession {
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
    identity: Arc<dyn IdentityProvider>,
    config: SessionConfig,
    avatar: Arc<RwLock<CatAvatar>>,
    display_name: Arc<RwLock<Option<String>>>,
    membership: Arc<RwLock<MembershipState>>,
    tombstones: PendingTombstones,
    room_tx: Arc<watch::Sender<Option<Room>>>,
    players_tx: Arc<watch::Sender<Vec<Player>>>,
    selected_tx: Arc<watch::Sender<Option<CardValue>>>,
    messages_tx: Arc<watch::Sender<Vec<Message>>>,
    booted_tx: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RoomSession {
    /// Open a session and start mirroring the room's documents
    pub async fn open(
        room_id: impl Into<RoomId>,
        store: Arc<dyn RoomStore>,
        identity: Arc<dyn IdentityProvider>,
        config: SessionConfig,
    ) -> Self {
        let (room_tx, _) = watch::channel(None);
        let (players_tx, _) = watch::channel(Vec::new());
        let (selected_tx, _) = watch::channel(None);
        let (messages_tx, _) = watch::channel(Vec::new());
        let (booted_tx, _) = watch::channel(false);

        let session = Self {
            room_id: room_id.into(),
            store,
            identity,
            config,
            avatar: Arc::new(RwLock::new(CatAvatar::default())),
            display_name: Arc::new(RwLock::new(None)),
            membership: Arc::new(RwLock::new(MembershipState::default())),
            tombstones: PendingTombstones::new(),
            room_tx: Arc::new(room_tx),
            players_tx: Arc::new(players_tx),
            selected_tx: Arc::new(selected_tx),
            messages_tx: Arc::new(messages_tx),
            booted_tx: Arc::new(booted_tx),
            tasks: Arc::new(Mutex::new(Vec::new())),
        };

        // Subscribe before spawning so no write is missed between open and the first poll
        let room_rx = session.store.watch_document(&session.room_doc()).await;
        let players_rx = session
            .store
            .watch_query(&Query::collection(session.players_col()))
            .await;
        let messages_rx = session
            .store
            .watch_query(&Query::collection(session.chat_col()).order_by("timestamp"))
            .await;

        let handles = vec![
            tokio::spawn(session.clone().forward_room(room_rx)),
            tokio::spawn(session.clone().forward_players(players_rx)),
            tokio::spawn(session.clone().forward_own_vote()),
            tokio::spawn(session.clone().forward_messages(messages_rx)),
        ];
        session.tasks.lock().await.extend(handles);

        tracing::info!("Opened session for room {}", session.room_id);
        session
    }

    /// Stop all background forwarding for this session
    pub async fn close(&self) {
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        tracing::info!("Closed session for room {}", self.room_id);
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.identity.current_user()
    }

    /// Display name used at the last successful join
    pub async fn display_name(&self) -> Option<String> {
        self.display_name.read().await.clone()
    }

    pub async fn avatar(&self) -> CatAvatar {
        self.avatar.read().await.clone()
    }

    pub fn room(&self) -> Option<Room> {
        self.room_tx.borrow().clone()
    }

    pub fn subscribe_room(&self) -> watch::Receiver<Option<Room>> {
        self.room_tx.subscribe()
    }

    /// Current game state; rooms that do not exist yet read as voting
    pub fn game_state(&self) -> GameState {
        self.room_tx
            .borrow()
            .as_ref()
            .map(|room| room.game_state)
            .unwrap_or_default()
    }

    /// Visible membership, with locally booted players already hidden
    pub fn players(&self) -> Vec<Player> {
        self.players_tx.borrow().clone()
    }

    pub fn subscribe_players(&self) -> watch::Receiver<Vec<Player>> {
        self.players_tx.subscribe()
    }

    /// This client's card for the current round
    pub fn selected_card(&self) -> Option<CardValue> {
        self.selected_tx.borrow().clone()
    }

    pub fn subscribe_selected_card(&self) -> watch::Receiver<Option<CardValue>> {
        self.selected_tx.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages_tx.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages_tx.subscribe()
    }

    pub fn is_booted(&self) -> bool {
        *self.booted_tx.borrow()
    }

    pub fn subscribe_booted(&self) -> watch::Receiver<bool> {
        self.booted_tx.subscribe()
    }

    /// Resolves once this client has been booted and the eviction delay has passed
    ///
    /// A rejoin during the delay cancels the eviction; a later boot starts it again.
    pub async fn wait_evicted(&self) {
        let mut booted = self.booted_tx.subscribe();
        loop {
            if booted.wait_for(|booted| *booted).await.is_err() {
                return std::future::pending().await;
            }
            tokio::time::sleep(self.config.eviction_delay).await;
            if *booted.borrow_and_update() {
                return;
            }
            tracing::debug!("Eviction from room {} cancelled by rejoin", self.room_id);
        }
    }

    fn room_doc(&self) -> DocPath {
        DocPath::new(format!("rooms/{}", self.room_id))
    }

    fn players_col(&self) -> CollectionPath {
        self.room_doc().collection("players")
    }

    fn votes_col(&self) -> CollectionPath {
        self.room_doc().collection("vote")
    }

    fn chat_col(&self) -> CollectionPath {
        self.room_doc().collection("chat")
    }

    /// Identity for a mutating operation, refusing booted or signed-out clients
    fn ensure_active(&self, action: &str) -> SessionResult<Identity> {
        if self.is_booted() {
            tracing::debug!("Ignoring attempt to {} from booted session", action);
            return Err(SessionError::Booted);
        }
        match self.identity.current_user() {
            Some(user) => Ok(user),
            None => {
                tracing::debug!("Ignoring attempt to {} before sign-in", action);
                Err(SessionError::IdentityNotReady)
            }
        }
    }

    /// Whether `uid` is this room's admin
    async fn is_admin(&self, uid: &str) -> SessionResult<bool> {
        let room = match self.store.get(&self.room_doc()).await? {
            Some(doc) => Some(doc.decode::<Room>()?),
            None => None,
        };

        match room.and_then(|room| room.admin_id) {
            Some(admin_id) => Ok(admin_id == uid),
            // Rooms from before admins were recorded: trust the player flag
            None => match self.store.get(&self.players_col().doc(uid)).await? {
                Some(doc) => Ok(doc.decode::<Player>()?.is_admin),
                None => Ok(false),
            },
        }
    }

    async fn forward_room(self, mut rx: watch::Receiver<Option<DocumentSnapshot>>) {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            let room = snapshot.and_then(|doc| match doc.decode::<Room>() {
                Ok(room) => Some(room),
                Err(e) => {
                    tracing::warn!("Ignoring malformed room document: {}", e);
                    None
                }
            });
            if let Some(ref room) = room {
                tracing::debug!("Game state updated: {}", room.game_state.as_str());
            }
            self.room_tx.send_replace(room);

            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn forward_messages(self, mut rx: watch::Receiver<Vec<DocumentSnapshot>>) {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            let messages: Vec<Message> = decode_all(&snapshot);
            self.messages_tx.send_replace(messages);

            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Mirror this client's vote document once an identity exists
    async fn forward_own_vote(self) {
        let mut identity_rx = self.identity.subscribe();
        let user = match identity_rx.wait_for(|user| user.is_some()).await {
            Ok(user) => user.clone(),
            Err(_) => return,
        };
        let Some(user) = user else {
            return;
        };

        let mut rx = self
            .store
            .watch_document(&self.votes_col().doc(&user.uid))
            .await;
        loop {
            let snapshot = rx.borrow_and_update().clone();
            let value = snapshot.and_then(|doc| doc.decode::<Vote>().ok().map(|v| v.value));
            self.selected_tx
                .send_if_modified(|current| replace_if_changed(current, value));

            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Optimistically show a game state locally, returning the previous room view
    fn echo_game_state(&self, state: GameState) -> Option<Room> {
        let previous = self.room_tx.borrow().clone();
        self.room_tx.send_modify(|room| {
            if let Some(room) = room {
                room.game_state = state;
            }
        });
        previous
    }
}

/// Decode every document, skipping (and logging) malformed ones
fn decode_all<T: serde::de::DeserializeOwned>(docs: &[DocumentSnapshot]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Skipping malformed document: {}", e);
                None
            }
        })
        .collect()
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, next: T) -> bool {
    if *slot == next {
        false
    } else {
        *slot = next;
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::identity::AnonymousAuth;
    use crate::store::MemoryStore;

    /// Session for a freshly signed-in client
    pub async fn signed_in(store: &MemoryStore, room_id: &str) -> RoomSession {
        signed_in_with(store, room_id, SessionConfig::default()).await
    }

    pub async fn signed_in_with(
        store: &MemoryStore,
        room_id: &str,
        config: SessionConfig,
    ) -> RoomSession {
        let auth = Arc::new(AnonymousAuth::new());
        auth.sign_in().await;
        RoomSession::open(room_id, Arc::new(store.clone()), auth, config).await
    }

    pub fn uid(session: &RoomSession) -> String {
        session.current_user().map(|u| u.uid).unwrap_or_default()
    }

    /// Wait until the visible membership satisfies `pred`
    pub async fn wait_players<F>(session: &RoomSession, pred: F) -> Vec<Player>
    where
        F: FnMut(&Vec<Player>) -> bool,
    {
        let mut rx = session.subscribe_players();
        let players = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for players")
            .expect("players channel closed")
            .clone();
        players
    }

    pub async fn wait_game_state(session: &RoomSession, state: GameState) {
        let mut rx = session.subscribe_room();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|room| room.as_ref().map(|r| r.game_state) == Some(state)),
        )
        .await
        .expect("timed out waiting for game state")
        .expect("room channel closed");
    }
}
