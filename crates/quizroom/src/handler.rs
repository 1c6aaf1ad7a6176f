//! Per-connection handler: welcome, validation, and routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Send `Welcome`
//!   2. Loop: wait for an inbound frame, a room event, or the idle
//!      deadline, whichever comes first
//!   3. On close, leave whatever room the connection is in
//!
//! Room events (joins, rounds, results) arrive on the connection's own
//! channel, registered with the room when the player joins. Replies to
//! the connection's own requests are written directly, and errors only
//! ever go to the connection that caused them.

use std::sync::Arc;

use quizroom_protocol::{
    ClientMessage, Codec, Envelope, PlayerId, RoomId, ServerMessage,
    PROTOCOL_VERSION,
};
use quizroom_room::{GameError, PlayerSender, QuestionSource, SessionStore};
use quizroom_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::QuizroomError;
use crate::server::ServerState;

/// Which room, as which player, this connection speaks for.
#[derive(Debug, Clone)]
struct Membership {
    room_id: RoomId,
    player_id: PlayerId,
}

/// Outbound framing state for one connection.
struct Outbound<'a, C> {
    conn: &'a WebSocketConnection,
    codec: &'a C,
    seq: u64,
    start: Instant,
}

impl<C: Codec> Outbound<'_, C> {
    async fn send(&mut self, payload: ServerMessage) -> Result<(), QuizroomError> {
        let envelope = Envelope {
            seq: self.next_seq(),
            timestamp: self.elapsed_ms(),
            payload,
        };
        let bytes = self.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_error(&mut self, code: u16, message: String) -> Result<(), QuizroomError> {
        self.send(ServerMessage::Error { code, message }).await
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn next_seq(&mut self) -> u64 {
        let current = self.seq;
        self.seq += 1;
        current
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<Q, S, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<Q, S, C>>,
) -> Result<(), QuizroomError>
where
    Q: QuestionSource,
    S: SessionStore,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut out = Outbound {
        conn: &conn,
        codec: &state.codec,
        seq: 0,
        start: Instant::now(),
    };
    let mut membership: Option<Membership> = None;

    let welcome = ServerMessage::Welcome {
        protocol_version: PROTOCOL_VERSION,
        server_time: out.elapsed_ms(),
    };
    let result = match out.send(welcome).await {
        Ok(()) => {
            serve(&state, &mut out, &events_tx, &mut events_rx, &mut membership)
                .await
        }
        Err(e) => Err(e),
    };

    // Runs on every exit path, errors included.
    if let Some(Membership { room_id, player_id }) = membership {
        match state.registry.leave(&room_id, player_id).await {
            Ok(_) => {
                tracing::info!(%conn_id, %room_id, %player_id, "left room on disconnect");
            }
            Err(e) => {
                tracing::debug!(%conn_id, %room_id, error = %e, "leave on disconnect failed");
            }
        }
    }
    let _ = conn.close().await;
    result
}

/// The main loop. Returns when the peer goes away or stays silent past
/// the idle timeout.
async fn serve<Q, S, C>(
    state: &ServerState<Q, S, C>,
    out: &mut Outbound<'_, C>,
    events_tx: &PlayerSender,
    events_rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    membership: &mut Option<Membership>,
) -> Result<(), QuizroomError>
where
    Q: QuestionSource,
    S: SessionStore,
    C: Codec,
{
    let conn = out.conn;
    let conn_id = conn.id();
    let mut idle_deadline = Instant::now() + state.idle_timeout;

    loop {
        tokio::select! {
            frame = conn.recv() => {
                let data = match frame {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%conn_id, "connection closed cleanly");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        return Err(e.into());
                    }
                };
                idle_deadline = Instant::now() + state.idle_timeout;
                handle_frame(state, out, events_tx, membership, &data).await?;
            }
            Some(event) = events_rx.recv() => {
                if let ServerMessage::RoomLeft { room_id } = &event {
                    if membership.as_ref().is_some_and(|m| &m.room_id == room_id) {
                        *membership = None;
                    }
                }
                out.send(event).await?;
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                tracing::info!(%conn_id, "connection idle, closing");
                return Ok(());
            }
        }
    }
}

/// Decodes and validates one frame, then routes it.
async fn handle_frame<Q, S, C>(
    state: &ServerState<Q, S, C>,
    out: &mut Outbound<'_, C>,
    events_tx: &PlayerSender,
    membership: &mut Option<Membership>,
    data: &[u8],
) -> Result<(), QuizroomError>
where
    Q: QuestionSource,
    S: SessionStore,
    C: Codec,
{
    let conn_id = out.conn.id();
    let envelope: Envelope<ClientMessage> = match state.codec.decode(data) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
            return out.send_error(e.code(), e.to_string()).await;
        }
    };
    let msg = envelope.payload;
    if let Err(e) = msg.validate() {
        tracing::debug!(%conn_id, kind = msg.kind(), error = %e, "invalid message");
        return out.send_error(e.code(), e.to_string()).await;
    }

    let kind = msg.kind();
    match dispatch(state, out, events_tx, membership, msg).await {
        Ok(()) => Ok(()),
        Err(DispatchError::Game(e)) => {
            tracing::debug!(%conn_id, kind, error = %e, "request rejected");
            out.send_error(e.code(), e.to_string()).await
        }
        Err(DispatchError::Connection(e)) => Err(e),
    }
}

/// A rejected request versus a broken connection.
enum DispatchError {
    Game(GameError),
    Connection(QuizroomError),
}

impl From<GameError> for DispatchError {
    fn from(err: GameError) -> Self {
        Self::Game(err)
    }
}

impl From<QuizroomError> for DispatchError {
    fn from(err: QuizroomError) -> Self {
        Self::Connection(err)
    }
}

async fn dispatch<Q, S, C>(
    state: &ServerState<Q, S, C>,
    out: &mut Outbound<'_, C>,
    events_tx: &PlayerSender,
    membership: &mut Option<Membership>,
    msg: ClientMessage,
) -> Result<(), DispatchError>
where
    Q: QuestionSource,
    S: SessionStore,
    C: Codec,
{
    let registry = &state.registry;

    match msg {
        ClientMessage::CreateRoom {
            room_id,
            player_name,
        } => {
            ensure_unattached(membership)?;
            let joined = registry
                .create(room_id.clone(), &player_name, events_tx.clone())
                .await?;
            *membership = Some(Membership {
                room_id,
                player_id: joined.player_id,
            });
        }

        ClientMessage::JoinRoom {
            room_id,
            player_name,
        } => {
            ensure_unattached(membership)?;
            let joined = registry
                .join(&room_id, &player_name, events_tx.clone())
                .await?;
            *membership = Some(Membership {
                room_id,
                player_id: joined.player_id,
            });
        }

        ClientMessage::Rejoin { room_id, player_id } => {
            ensure_unattached(membership)?;
            registry.rejoin(&room_id, player_id, events_tx.clone()).await?;
            *membership = Some(Membership { room_id, player_id });
        }

        ClientMessage::StartGame => {
            let m = attached(membership)?;
            registry.start(&m.room_id, m.player_id).await?;
        }

        ClientMessage::SubmitAnswer { round, choice } => {
            let m = attached(membership)?;
            registry
                .submit_answer(&m.room_id, m.player_id, round, choice)
                .await?;
        }

        ClientMessage::NextRound => {
            let m = attached(membership)?;
            registry.next_round(&m.room_id, m.player_id).await?;
        }

        ClientMessage::LeaveRoom => {
            let m = attached(membership)?;
            registry.leave(&m.room_id, m.player_id).await?;
            *membership = None;
            out.send(ServerMessage::RoomLeft { room_id: m.room_id })
                .await?;
        }

        ClientMessage::GetState { room_id } => {
            let view = registry.get_state(&room_id).await?;
            out.send(ServerMessage::State { state: view }).await?;
        }

        ClientMessage::Heartbeat { client_time } => {
            let server_time = out.elapsed_ms();
            out.send(ServerMessage::HeartbeatAck {
                client_time,
                server_time,
            })
            .await?;
        }
    }
    Ok(())
}

fn ensure_unattached(membership: &Option<Membership>) -> Result<(), GameError> {
    match membership {
        Some(m) => Err(GameError::InvalidState(format!(
            "already in room {}",
            m.room_id
        ))),
        None => Ok(()),
    }
}

fn attached(membership: &Option<Membership>) -> Result<Membership, GameError> {
    membership
        .clone()
        .ok_or_else(|| GameError::InvalidState("not in a room".into()))
}
