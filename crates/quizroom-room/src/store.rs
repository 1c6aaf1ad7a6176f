//! Session persistence: the [`SessionStore`] seam and its backends.
//!
//! Persistence is optional. Rooms save a [`SessionRecord`] after every
//! accepted change and delete it when they go away, but a failing store
//! only costs durability: the room logs the failure and keeps playing
//! from memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use quizroom_protocol::{PlayerId, RoomId, SessionState};

use crate::content::{Question, QuestionId};
use crate::roster::PlayerRecord;
use crate::{GameConfig, GameError};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Everything needed to bring a session back after a restart.
///
/// Times are stored as offsets (milliseconds elapsed when the record was
/// written) because monotonic instants don't survive a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub room_id: RoomId,
    pub state: SessionState,
    pub config: GameConfig,
    /// In join order.
    pub players: Vec<PlayerRecord>,
    pub round: Option<RoundRecord>,
    pub used_questions: Vec<QuestionId>,
    /// Time since the game started, if it has.
    pub game_elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub ordinal: u32,
    pub question: Question,
    /// Time since the round opened.
    pub elapsed_ms: u64,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub player_id: PlayerId,
    pub choice: usize,
    /// Offset from the round opening.
    pub elapsed_ms: u64,
    pub correct: bool,
    pub points: u32,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from a session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend is down or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be read back.
    #[error("stored record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The room id cannot be used as a storage key.
    #[error("room id {0:?} is not a valid storage key")]
    InvalidKey(String),
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        GameError::PersistenceUnavailable(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Saves and loads session records, keyed by room id.
///
/// Implementations must be `Send + Sync + 'static`: one store is shared
/// by the registry and every room actor.
pub trait SessionStore: Send + Sync + 'static {
    /// Writes `record`, replacing any earlier one for the same room.
    fn save(
        &self,
        record: &SessionRecord,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Reads the record for `room_id`, if there is one.
    fn load(
        &self,
        room_id: &RoomId,
    ) -> impl std::future::Future<Output = Result<Option<SessionRecord>, StoreError>>
    + Send;

    /// Removes the record for `room_id`. Deleting a missing record is
    /// not an error.
    fn delete(
        &self,
        room_id: &RoomId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// No persistence: sessions live only in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStore;

impl SessionStore for NoStore {
    async fn save(&self, _record: &SessionRecord) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(
        &self,
        _room_id: &RoomId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(None)
    }

    async fn delete(&self, _room_id: &RoomId) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// An in-process store.
///
/// Clones share the same map, so a test (or a second registry) can see
/// what a room saved. [`MemoryStore::set_available`] simulates an outage.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<RoomId, SessionRecord>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While `false`, every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// A copy of the stored record, bypassing the availability switch.
    pub async fn peek(&self, room_id: &RoomId) -> Option<SessionRecord> {
        self.records.lock().await.get(room_id).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }
}

impl SessionStore for MemoryStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records
            .lock()
            .await
            .insert(record.room_id.clone(), record.clone());
        Ok(())
    }

    async fn load(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        self.check()?;
        Ok(self.records.lock().await.get(room_id).cloned())
    }

    async fn delete(&self, room_id: &RoomId) -> Result<(), StoreError> {
        self.check()?;
        self.records.lock().await.remove(room_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// One JSON file per room under a directory.
///
/// Room ids become file names, so ids with anything outside
/// `[A-Za-z0-9_-]` are refused with [`StoreError::InvalidKey`].
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Uses `dir`, creating it if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, room_id: &RoomId) -> Result<PathBuf, StoreError> {
        let id = room_id.as_str();
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StoreError::InvalidKey(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl SessionStore for FileStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let path = self.path_for(&record.room_id)?;
        // Readers never see a partially written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        match tokio::fs::read(self.path_for(room_id)?).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, room_id: &RoomId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(room_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(room: &str) -> SessionRecord {
        SessionRecord {
            room_id: RoomId::new(room),
            state: SessionState::Waiting,
            config: GameConfig::default(),
            players: vec![PlayerRecord {
                id: PlayerId(7),
                name: "Alice".into(),
                score: 0,
                streak: 0,
                correct_answers: 0,
                is_host: true,
            }],
            round: None,
            used_questions: Vec::new(),
            game_elapsed_ms: None,
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "quizroom-store-{tag}-{}",
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn test_no_store_keeps_nothing() {
        let store = NoStore;
        store.save(&record("R1")).await.unwrap();
        assert!(store.load(&RoomId::new("R1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_save_load_delete() {
        let store = MemoryStore::new();
        let rec = record("R1");
        store.save(&rec).await.unwrap();
        assert_eq!(store.load(&rec.room_id).await.unwrap(), Some(rec.clone()));

        store.delete(&rec.room_id).await.unwrap();
        assert!(store.load(&rec.room_id).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_outage() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.save(&record("R1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        let game_err = GameError::from(err);
        assert_eq!(game_err.code(), 503);

        store.set_available(true);
        store.save(&record("R1")).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_records() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.save(&record("R1")).await.unwrap();
        assert!(other.peek(&RoomId::new("R1")).await.is_some());
    }

    #[tokio::test]
    async fn test_file_store_round_trips_through_disk() {
        let dir = temp_dir("roundtrip");
        let store = FileStore::open(&dir).await.unwrap();
        let rec = record("R1");

        store.save(&rec).await.unwrap();
        assert!(dir.join("R1.json").exists());
        assert_eq!(store.load(&rec.room_id).await.unwrap(), Some(rec.clone()));

        store.delete(&rec.room_id).await.unwrap();
        assert!(store.load(&rec.room_id).await.unwrap().is_none());
        // Deleting twice is fine.
        store.delete(&rec.room_id).await.unwrap();

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_record() {
        let dir = temp_dir("corrupt");
        let store = FileStore::open(&dir).await.unwrap();
        tokio::fs::write(dir.join("R2.json"), b"{not json").await.unwrap();

        let err = store.load(&RoomId::new("R2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_store_rejects_unsafe_room_ids() {
        let dir = temp_dir("unsafe");
        let store = FileStore::open(&dir).await.unwrap();

        for id in ["../escape", "a/b", "", "..", "R1.json"] {
            let room_id = RoomId::new(id);
            assert!(matches!(
                store.load(&room_id).await,
                Err(StoreError::InvalidKey(_))
            ));
            assert!(matches!(
                store.delete(&room_id).await,
                Err(StoreError::InvalidKey(_))
            ));
            assert!(matches!(
                store.save(&record(id)).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
        assert!(!dir.parent().unwrap().join("escape.json").exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
