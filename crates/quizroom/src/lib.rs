//! # Quizroom
//!
//! Real-time, room-based multiplayer trivia server.
//!
//! Players connect over WebSocket, create or join a room by id, and play
//! a fixed number of timed multiple-choice rounds. The server owns every
//! decision: who may join, when a round closes, and how many points an
//! answer is worth.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quizroom::prelude::*;
//!
//! # async fn run() -> Result<(), QuizroomError> {
//! let server = QuizServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .source(TrackCatalog::demo())
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::QuizroomError;
pub use server::{QuizServer, QuizServerBuilder};

/// Everything needed to run a server or talk to one.
pub mod prelude {
    pub use crate::{QuizServer, QuizServerBuilder, QuizroomError};

    pub use quizroom_protocol::{
        ClientMessage, Codec, Envelope, JsonCodec, PlayerId, PlayerView,
        ProtocolError, RoomId, RoundResult, RoundView, ServerMessage,
        SessionState, SessionView, Standing, PROTOCOL_VERSION,
    };
    pub use quizroom_room::{
        FileStore, GameConfig, GameError, MemoryStore, NoStore, Question,
        QuestionList, QuestionSource, RegistryConfig, ScoringRules,
        SessionRegistry, SessionStore, Track, TrackCatalog,
    };
    pub use quizroom_transport::TransportError;
}
