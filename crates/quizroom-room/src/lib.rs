//! Room lifecycle management for Quizroom.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns one
//! trivia [`Session`]: its roster, rounds, scores, and round clock.
//!
//! # Key types
//!
//! - [`SessionRegistry`] — creates, finds, restores, and sweeps rooms
//! - [`RoomHandle`] — send commands to a running room actor
//! - [`Session`] — the pure state machine a room actor drives
//! - [`Roster`] — the ordered player list with host failover
//! - [`ScoringRules`] — the scoring engine
//! - [`QuestionSource`] / [`SessionStore`] — content and persistence seams
//!
//! # Flow
//!
//! ```text
//! connection ──► SessionRegistry ──► RoomHandle ──► room actor
//!                                                   ├─ Session
//!                                                   ├─ RoundClock
//!                                                   └─ subscribers (events out)
//! ```

#![allow(async_fn_in_trait)]

mod config;
mod content;
mod error;
mod registry;
mod room;
mod roster;
mod scoring;
mod session;
mod store;

pub use config::{GameConfig, RegistryConfig};
pub use content::{
    ContentError, Question, QuestionId, QuestionList, QuestionSource,
    Track, TrackCatalog,
};
pub use error::GameError;
pub use registry::SessionRegistry;
pub use room::{Joined, LeaveOutcome, PlayerSender, RoomHandle, RoomInfo};
pub use roster::{AddRejection, Player, PlayerRecord, Removal, Roster};
pub use scoring::{ScoreDelta, ScoringRules, Verdict};
pub use session::{Answer, AnswerOutcome, GameSummary, Round, Session};
pub use store::{
    AnswerRecord, FileStore, MemoryStore, NoStore, RoundRecord,
    SessionRecord, SessionStore, StoreError,
};
