//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The server never touches `serde_json` directly: it holds something
//! that implements [`Codec`], so a binary format can be swapped in later
//! without changing the connection handler.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what browser clients speak natively, so this is the default.
///
/// ## Example
///
/// ```rust
/// use quizroom_protocol::{ClientMessage, Codec, Envelope, JsonCodec};
///
/// let codec = JsonCodec;
/// let envelope = Envelope {
///     seq: 1,
///     timestamp: 5000,
///     payload: ClientMessage::StartGame,
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope<ClientMessage> = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientMessage, Envelope, RoomId, ServerMessage};

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let result: Result<Envelope<ClientMessage>, _> = JsonCodec.decode(
            br#"{"seq":1,"timestamp":0,"payload":{"type":"Teleport"}}"#,
        );
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let result: Result<Envelope<ClientMessage>, _> =
            JsonCodec.decode(br#"{"seq":1,"timest"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_client_frame_from_browser_shape() {
        let frame = br#"{
            "seq": 4,
            "timestamp": 1200,
            "payload": {"type": "CreateRoom", "room_id": "R1", "player_name": "Alice"}
        }"#;
        let env: Envelope<ClientMessage> = JsonCodec.decode(frame).unwrap();
        assert_eq!(env.seq, 4);
        assert_eq!(
            env.payload,
            ClientMessage::CreateRoom {
                room_id: RoomId::new("R1"),
                player_name: "Alice".into(),
            }
        );
    }

    #[test]
    fn test_encode_server_error_shape() {
        let env = Envelope {
            seq: 9,
            timestamp: 10,
            payload: ServerMessage::Error {
                code: 409,
                message: "name taken".into(),
            },
        };
        let bytes = JsonCodec.encode(&env).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["payload"]["type"], "Error");
        assert_eq!(json["payload"]["code"], 409);
    }
}
