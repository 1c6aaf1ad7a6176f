//! Error types for the room layer.

use quizroom_protocol::{PlayerId, RoomId};

/// Errors returned by room operations.
///
/// Every variant is recoverable by the caller. A rejected operation
/// leaves the session exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// A room with this id is already tracked.
    #[error("room {0} already exists")]
    RoomIdTaken(RoomId),

    /// The room does not exist (or was deleted).
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// No more player slots.
    #[error("room is full")]
    RoomFull,

    /// Another player in the room already uses this name.
    #[error("name {0:?} is already taken in this room")]
    NameTaken(String),

    /// The game has started; the roster is closed.
    #[error("game already in progress")]
    GameInProgress,

    /// Not enough players to start.
    #[error("need at least {need} players to start, have {have}")]
    NotEnoughPlayers { have: usize, need: usize },

    /// Only the host may do this.
    #[error("only the host can do that")]
    NotHost,

    /// The player already answered this round.
    #[error("already answered this round")]
    DuplicateAnswer,

    /// The round is closed (deadline passed, settled, or a different
    /// round was addressed).
    #[error("round is closed")]
    RoundClosed,

    /// The persistence backend failed. Logged, never shown to players.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// The player is not a member of this room.
    #[error("player {0} is not in this room")]
    NotInRoom(PlayerId),

    /// The room is in a state that doesn't allow this operation.
    #[error("invalid room state for this operation: {0}")]
    InvalidState(String),

    /// Something failed inside the server (e.g. the question source).
    /// The session is unchanged.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    /// Stable numeric code sent to clients in `ServerMessage::Error`.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotInRoom(_) | Self::InvalidState(_) => 400,
            Self::NotHost => 403,
            Self::RoomNotFound(_) => 404,
            Self::RoomIdTaken(_) | Self::NameTaken(_) => 409,
            Self::RoomFull
            | Self::GameInProgress
            | Self::NotEnoughPlayers { .. } => 423,
            Self::DuplicateAnswer | Self::RoundClosed => 425,
            Self::PersistenceUnavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_distinguish_client_and_server_faults() {
        assert_eq!(GameError::RoomNotFound(RoomId::new("R")).code(), 404);
        assert_eq!(GameError::NameTaken("a".into()).code(), 409);
        assert_eq!(GameError::NotHost.code(), 403);
        assert_eq!(GameError::Internal("boom".into()).code(), 500);
    }

    #[test]
    fn test_display_names_the_room() {
        let err = GameError::RoomIdTaken(RoomId::new("R1"));
        assert_eq!(err.to_string(), "room R1 already exists");
    }
}
