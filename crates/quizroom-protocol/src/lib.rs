//! Wire protocol for Quizroom.
//!
//! This crate defines the "language" that trivia clients and the server
//! speak:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], [`Envelope`], the
//!   view structs) — the message structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those messages
//!   are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can go wrong during
//!   encoding, decoding, and payload validation.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope<ClientMessage>) → Room registry
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientMessage, Envelope, PlayerId, PlayerRoundResult, PlayerView,
    QuestionView, Recipient, RoomId, RoundResult, RoundView, ServerMessage,
    SessionState, SessionView, Standing, MAX_NAME_LEN, MAX_ROOM_ID_LEN,
};

/// The protocol version announced in [`ServerMessage::Welcome`].
pub const PROTOCOL_VERSION: u32 = 1;
