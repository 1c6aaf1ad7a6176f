//! Core protocol types for Quizroom's wire format.
//!
//! Every type in this module travels "on the wire": it is serialized by a
//! [`Codec`](crate::Codec), sent over a connection, and deserialized on the
//! other side. Inbound traffic is a single sum type ([`ClientMessage`]) and
//! outbound traffic is another ([`ServerMessage`]), so nothing duck-typed
//! ever reaches the room layer.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::ProtocolError;

/// Longest accepted display name, in characters, after trimming.
pub const MAX_NAME_LEN: usize = 24;

/// Longest accepted room id, in characters.
pub const MAX_ROOM_ID_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// An opaque, session-scoped identifier for a player.
///
/// Assigned by the room when a player joins. It is distinct from the
/// player's display name, which may be reused once the player leaves.
///
/// `#[serde(transparent)]` serializes this as the bare number, so
/// `PlayerId(42)` is `42` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// An externally supplied room identifier.
///
/// Unlike [`PlayerId`], room ids are chosen by whoever creates the room
/// (they are typically shared out-of-band as an invite code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Creates a room id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Recipient — who should receive a message?
// ---------------------------------------------------------------------------

/// Specifies who should receive a server message produced by a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every member of the room.
    All,

    /// One specific player.
    Player(PlayerId),

    /// Everyone except the specified player. Used when the player
    /// already learned about the change through their own reply.
    AllExcept(PlayerId),
}

// ---------------------------------------------------------------------------
// SessionState — the room lifecycle
// ---------------------------------------------------------------------------

/// The lifecycle state of a trivia session.
///
/// ```text
/// Waiting → InRound → RoundSettled → InRound → ... → RoundSettled → Finished
/// ```
///
/// - **Waiting**: accepting joins, nothing has started.
/// - **InRound**: a question is open and answers are being collected.
/// - **RoundSettled**: the last round was scored; the next round (or the
///   end of the game) follows.
/// - **Finished**: terminal. Standings are frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Waiting,
    InRound,
    RoundSettled,
    Finished,
}

impl SessionState {
    /// Returns `true` if new players may join.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns `true` if a round is open for answers.
    pub fn accepts_answers(&self) -> bool {
        matches!(self, Self::InRound)
    }

    /// Returns `true` once the game is over for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Returns `true` if moving from `self` to `target` is a legal
    /// transition of the state machine.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Waiting, Self::InRound)
                | (Self::InRound, Self::RoundSettled)
                | (Self::RoundSettled, Self::InRound)
                | (Self::RoundSettled, Self::Finished)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::InRound => write!(f, "InRound"),
            Self::RoundSettled => write!(f, "RoundSettled"),
            Self::Finished => write!(f, "Finished"),
        }
    }
}

// ---------------------------------------------------------------------------
// Views — read-only snapshots sent to clients
// ---------------------------------------------------------------------------

/// A player as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub streak: u32,
    pub correct_answers: u32,
    pub is_host: bool,
}

/// A question as seen by clients. Never carries the correct option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    /// Optional media (e.g. an audio preview) attached to the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// The open (or most recently closed) round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundView {
    pub ordinal: u32,
    pub total_rounds: u32,
    pub question: QuestionView,
    pub time_limit_ms: u64,
    /// Milliseconds until the deadline; 0 once the round is closed.
    pub remaining_ms: u64,
    pub answered: usize,
}

/// A full snapshot of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub room_id: RoomId,
    pub state: SessionState,
    pub total_rounds: u32,
    pub max_players: usize,
    /// Players in join order.
    pub players: Vec<PlayerView>,
    pub round: Option<RoundView>,
}

impl SessionView {
    /// Returns the current host, if the room has players.
    pub fn host(&self) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.is_host)
    }

    /// Looks up a player by id.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// One player's outcome for a settled round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRoundResult {
    pub player_id: PlayerId,
    pub name: String,
    pub answered: bool,
    pub correct: bool,
    pub points: u32,
    pub total_score: u32,
    pub streak: u32,
}

/// Summary of a settled round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub ordinal: u32,
    pub correct_choice: usize,
    pub correct_option: String,
    pub results: Vec<PlayerRoundResult>,
}

/// A line in the final leaderboard. Ranks start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub rank: usize,
    pub player: PlayerView,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The wrapper around every frame in either direction.
///
/// `seq` is assigned by the sender and increases by one per frame on a
/// connection. `timestamp` is milliseconds since the sender's connection
/// started, which is enough for clients to order frames and estimate RTT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub seq: u64,
    pub timestamp: u64,
    pub payload: P,
}

// ---------------------------------------------------------------------------
// ClientMessage — inbound
// ---------------------------------------------------------------------------

/// Everything a client can ask of the server.
///
/// `#[serde(tag = "type")]` makes this "internally tagged":
/// `{ "type": "JoinRoom", "room_id": "R1", "player_name": "Alice" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Create a room and become its host.
    CreateRoom { room_id: RoomId, player_name: String },

    /// Join an existing room that hasn't started.
    JoinRoom { room_id: RoomId, player_name: String },

    /// Re-bind this connection to an existing player in a room.
    Rejoin { room_id: RoomId, player_id: PlayerId },

    /// Host only: start the first round.
    StartGame,

    /// Answer the open round. `round` is the ordinal being answered and
    /// `choice` is an index into the question's options.
    SubmitAnswer { round: u32, choice: usize },

    /// Host only: advance past a settled round that failed to advance.
    NextRound,

    /// Leave the current room.
    LeaveRoom,

    /// Fetch a snapshot of any room.
    GetState { room_id: RoomId },

    /// Keep-alive.
    Heartbeat { client_time: u64 },
}

impl ClientMessage {
    /// Validates payload fields before the message reaches a room.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] for malformed names or
    /// room ids.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::CreateRoom {
                room_id,
                player_name,
            }
            | Self::JoinRoom {
                room_id,
                player_name,
            } => {
                validate_room_id(room_id)?;
                validate_name(player_name)
            }
            Self::Rejoin { room_id, .. } | Self::GetState { room_id } => {
                validate_room_id(room_id)
            }
            Self::SubmitAnswer { round, .. } if *round == 0 => Err(
                ProtocolError::InvalidMessage("round ordinals start at 1".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "CreateRoom",
            Self::JoinRoom { .. } => "JoinRoom",
            Self::Rejoin { .. } => "Rejoin",
            Self::StartGame => "StartGame",
            Self::SubmitAnswer { .. } => "SubmitAnswer",
            Self::NextRound => "NextRound",
            Self::LeaveRoom => "LeaveRoom",
            Self::GetState { .. } => "GetState",
            Self::Heartbeat { .. } => "Heartbeat",
        }
    }
}

fn validate_room_id(room_id: &RoomId) -> Result<(), ProtocolError> {
    let id = room_id.as_str();
    if id.is_empty() || id.chars().count() > MAX_ROOM_ID_LEN {
        return Err(ProtocolError::InvalidMessage(format!(
            "room id must be 1-{MAX_ROOM_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ProtocolError::InvalidMessage(
            "room id may only contain letters, digits, '-' and '_'".into(),
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ProtocolError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ProtocolError::InvalidMessage(format!(
            "player name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidMessage(
            "player name contains control characters".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ServerMessage — outbound
// ---------------------------------------------------------------------------

/// Everything the server sends to clients.
///
/// Some variants are broadcast to a whole room, others are replies to a
/// single caller. Errors are always caller-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First frame on every connection.
    Welcome {
        protocol_version: u32,
        server_time: u64,
    },

    /// Caller-only: you are now in `room_id` as `player_id`.
    RoomJoined {
        room_id: RoomId,
        player_id: PlayerId,
        state: SessionView,
    },

    /// Broadcast: someone joined.
    PlayerJoined { player: PlayerView },

    /// Broadcast: someone left. `new_host` is set when the host left
    /// and the role moved to another player.
    PlayerLeft {
        player_id: PlayerId,
        new_host: Option<PlayerId>,
    },

    /// Broadcast: the host started the game.
    GameStarted {
        total_rounds: u32,
        players: Vec<PlayerView>,
    },

    /// Broadcast: a new round is open.
    RoundStarted { round: RoundView },

    /// Caller-only: the outcome of your answer.
    AnswerAccepted {
        round: u32,
        correct: bool,
        points: u32,
        score: u32,
        streak: u32,
    },

    /// Broadcast: a player has answered (without revealing correctness).
    AnswerReceived {
        round: u32,
        player_id: PlayerId,
        answered: usize,
        expected: usize,
    },

    /// Broadcast: a round was settled.
    RoundEnded { result: RoundResult },

    /// Broadcast: the game is over.
    GameEnded {
        standings: Vec<Standing>,
        winner: Option<PlayerView>,
        total_rounds: u32,
        duration_ms: u64,
    },

    /// Caller-only: a room snapshot.
    State { state: SessionView },

    /// Caller-only: you have left `room_id`.
    RoomLeft { room_id: RoomId },

    /// Caller-only: reply to a heartbeat.
    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },

    /// Caller-only: something went wrong with your request.
    Error { code: u16, message: String },
}
