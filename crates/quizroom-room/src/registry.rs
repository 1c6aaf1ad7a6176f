//! Session registry: creates, tracks, and routes to rooms.
//!
//! The registry's room map is the only state shared across rooms. It is
//! guarded by its own lock, which is held only to read or change the
//! map and never while a room is handling a command: every operation
//! clones the room's handle, releases the lock, and then talks to the
//! room.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use quizroom_protocol::{PlayerId, RoomId, SessionState, SessionView};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::content::QuestionSource;
use crate::room::{
    spawn_room, Joined, LeaveOutcome, PlayerSender, RoomHandle, RoomInfo,
};
use crate::session::{AnswerOutcome, Session};
use crate::store::{NoStore, SessionStore};
use crate::{GameConfig, GameError, RegistryConfig};

/// Keyed lookup of live sessions.
///
/// Generic over the question source `Q` and the session store `S`;
/// both are shared with every room the registry spawns.
pub struct SessionRegistry<Q, S = NoStore> {
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
    source: Arc<Q>,
    store: Arc<S>,
    game_config: GameConfig,
    config: RegistryConfig,
}

impl<Q: QuestionSource> SessionRegistry<Q, NoStore> {
    /// A registry without persistence.
    pub fn new(source: Q, game_config: GameConfig) -> Self {
        Self::with_store(
            source,
            NoStore,
            game_config,
            RegistryConfig::default(),
        )
    }
}

impl<Q: QuestionSource, S: SessionStore> SessionRegistry<Q, S> {
    pub fn with_store(
        source: Q,
        store: S,
        game_config: GameConfig,
        config: RegistryConfig,
    ) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            source: Arc::new(source),
            store: Arc::new(store),
            game_config: game_config.validated(),
            config,
        }
    }

    pub fn game_config(&self) -> &GameConfig {
        &self.game_config
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn source(&self) -> &Q {
        &self.source
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -- lifecycle --------------------------------------------------------

    /// Creates a room with `host_name` as its host.
    ///
    /// `sender` receives the host's events, starting with `RoomJoined`.
    /// Fails with [`GameError::RoomIdTaken`] if the id is tracked.
    pub async fn create(
        &self,
        room_id: RoomId,
        host_name: &str,
        sender: PlayerSender,
    ) -> Result<Joined, GameError> {
        let now = Instant::now();
        let mut rooms = self.rooms.lock().await;
        if rooms.get(&room_id).is_some_and(|h| !h.is_closed()) {
            tracing::debug!(%room_id, "room id taken");
            return Err(GameError::RoomIdTaken(room_id));
        }

        let (session, host) = Session::new(
            room_id.clone(),
            host_name,
            self.game_config.clone(),
            now,
        )?;
        let state = session.view(now);
        let handle = spawn_room(
            session,
            Some((host, sender)),
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.config.channel_size,
        );
        rooms.insert(room_id.clone(), handle);
        drop(rooms);

        tracing::info!(%room_id, host = %host, "room created");
        Ok(Joined {
            player_id: host,
            state,
        })
    }

    /// Looks up a room, restoring it from the store if it isn't live.
    pub async fn get(&self, room_id: &RoomId) -> Option<RoomHandle> {
        if let Some(handle) = self.live(room_id).await {
            return Some(handle);
        }

        let record = match self.store.load(room_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                let err = GameError::from(e);
                tracing::warn!(%room_id, error = %err, "could not load session");
                return None;
            }
        };
        let session = match Session::restore(record, Instant::now()) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(%room_id, error = %e, "discarding stored session");
                return None;
            }
        };

        let mut rooms = self.rooms.lock().await;
        // Someone else may have created or restored it meanwhile.
        if let Some(handle) = rooms.get(room_id).filter(|h| !h.is_closed()) {
            return Some(handle.clone());
        }
        let handle = spawn_room(
            session,
            None,
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.config.channel_size,
        );
        rooms.insert(room_id.clone(), handle.clone());
        tracing::info!(%room_id, "session restored from store");
        Some(handle)
    }

    /// Stops a room and forgets it. Returns `false` if it wasn't live.
    pub async fn delete(&self, room_id: &RoomId) -> bool {
        let handle = self.rooms.lock().await.remove(room_id);
        if let Err(e) = self.store.delete(room_id).await {
            let err = GameError::from(e);
            tracing::warn!(%room_id, error = %err, "session record not deleted");
        }
        match handle {
            Some(handle) => {
                let _ = handle.shutdown().await;
                tracing::info!(%room_id, "room deleted");
                true
            }
            None => false,
        }
    }

    // -- routed operations -------------------------------------------------

    pub async fn get_state(
        &self,
        room_id: &RoomId,
    ) -> Result<SessionView, GameError> {
        self.require(room_id).await?.get_state().await
    }

    pub async fn join(
        &self,
        room_id: &RoomId,
        name: &str,
        sender: PlayerSender,
    ) -> Result<Joined, GameError> {
        self.require(room_id).await?.join(name, sender).await
    }

    pub async fn rejoin(
        &self,
        room_id: &RoomId,
        player_id: PlayerId,
        sender: PlayerSender,
    ) -> Result<Joined, GameError> {
        self.require(room_id).await?.rejoin(player_id, sender).await
    }

    pub async fn start(
        &self,
        room_id: &RoomId,
        player_id: PlayerId,
    ) -> Result<SessionView, GameError> {
        self.require(room_id).await?.start(player_id).await
    }

    pub async fn submit_answer(
        &self,
        room_id: &RoomId,
        player_id: PlayerId,
        round: u32,
        choice: usize,
    ) -> Result<AnswerOutcome, GameError> {
        self.require(room_id)
            .await?
            .submit_answer(player_id, round, choice)
            .await
    }

    pub async fn next_round(
        &self,
        room_id: &RoomId,
        player_id: PlayerId,
    ) -> Result<SessionView, GameError> {
        self.require(room_id).await?.next_round(player_id).await
    }

    /// Removes a player. If they were the last one, the room is gone
    /// when this returns.
    pub async fn leave(
        &self,
        room_id: &RoomId,
        player_id: PlayerId,
    ) -> Result<LeaveOutcome, GameError> {
        let handle = self.require(room_id).await?;
        let outcome = handle.leave(player_id).await?;
        if outcome.room_empty {
            self.remove_if_same(&handle).await;
            tracing::info!(%room_id, "empty room removed");
        }
        Ok(outcome)
    }

    // -- housekeeping -----------------------------------------------------

    /// Removes finished rooms past the retention window, empty waiting
    /// rooms past the idle timeout, and rooms whose actor has stopped.
    ///
    /// Returns the removed ids.
    pub async fn sweep(&self) -> Vec<RoomId> {
        let snapshot: Vec<RoomHandle> =
            self.rooms.lock().await.values().cloned().collect();

        let now = Instant::now();
        let mut expired = Vec::new();
        for handle in snapshot {
            let stale = match handle.info().await {
                Ok(info) => self.is_expired(&info, now),
                Err(_) => true,
            };
            if stale {
                expired.push(handle);
            }
        }

        let mut removed = Vec::new();
        for handle in expired {
            if self.remove_if_same(&handle).await {
                let _ = handle.shutdown().await;
                if let Err(e) = self.store.delete(handle.room_id()).await {
                    let err = GameError::from(e);
                    tracing::warn!(
                        room_id = %handle.room_id(),
                        error = %err,
                        "session record not deleted"
                    );
                }
                removed.push(handle.room_id().clone());
            }
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "sweep removed rooms");
        }
        removed
    }

    /// Runs [`SessionRegistry::sweep`] every `sweep_interval` until the
    /// registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep().await;
            }
            tracing::debug!("sweeper stopped");
        })
    }

    /// Number of tracked rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> =
            self.rooms.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // -- helpers ----------------------------------------------------------

    async fn live(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    async fn require(
        &self,
        room_id: &RoomId,
    ) -> Result<RoomHandle, GameError> {
        self.get(room_id)
            .await
            .ok_or_else(|| GameError::RoomNotFound(room_id.clone()))
    }

    /// Removes `handle`'s entry only if it still points at the same
    /// actor, so a room re-created under the same id survives.
    async fn remove_if_same(&self, handle: &RoomHandle) -> bool {
        let mut rooms = self.rooms.lock().await;
        match rooms.get(handle.room_id()) {
            Some(current) if current.same_room(handle) => {
                rooms.remove(handle.room_id());
                true
            }
            _ => false,
        }
    }

    fn is_expired(&self, info: &RoomInfo, now: Instant) -> bool {
        match info.state {
            SessionState::Finished => info.ended_at.is_some_and(|ended| {
                now.saturating_duration_since(ended)
                    >= self.config.finished_retention
            }),
            SessionState::Waiting => {
                info.player_count == 0
                    && now.saturating_duration_since(info.last_activity)
                        >= self.config.idle_timeout
            }
            _ => false,
        }
    }
}
