//! Unified error type for the Quizroom server.

use quizroom_protocol::ProtocolError;
use quizroom_room::{GameError, StoreError};
use quizroom_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `quizroom` crate you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute
/// on each variant lets `?` convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum QuizroomError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A game rule or room error.
    #[error(transparent)]
    Game(#[from] GameError),

    /// The session store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QuizroomError {
    /// Wire error code for this failure.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(e) => e.code(),
            Self::Game(e) => e.code(),
            Self::Transport(_) | Self::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizroom_protocol::RoomId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::SendFailed(std::io::Error::other("gone"));
        let quiz_err: QuizroomError = err.into();
        assert!(matches!(quiz_err, QuizroomError::Transport(_)));
        assert!(quiz_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let quiz_err: QuizroomError = err.into();
        assert!(matches!(quiz_err, QuizroomError::Protocol(_)));
        assert_eq!(quiz_err.code(), 400);
    }

    #[test]
    fn test_from_game_error_keeps_code() {
        let err = GameError::RoomNotFound(RoomId::new("R1"));
        let code = err.code();
        let quiz_err: QuizroomError = err.into();
        assert!(matches!(quiz_err, QuizroomError::Game(_)));
        assert_eq!(quiz_err.code(), code);
    }

    #[test]
    fn test_from_store_error() {
        let err = StoreError::Unavailable("down".into());
        let quiz_err: QuizroomError = err.into();
        assert!(matches!(quiz_err, QuizroomError::Store(_)));
        assert_eq!(quiz_err.code(), 500);
    }
}
