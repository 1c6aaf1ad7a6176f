//! Room actor: an isolated Tokio task that owns one [`Session`].
//!
//! Each room runs in its own task and talks to the outside world through
//! an mpsc channel. Player commands and the round deadline are both
//! handled inside the actor's `select!` loop, so at most one operation
//! touches a session at a time and a deadline can never race an answer.

use std::collections::HashMap;
use std::sync::Arc;

use quizroom_clock::{Deadline, RoundClock};
use quizroom_protocol::{
    PlayerId, Recipient, RoomId, ServerMessage, SessionState, SessionView,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::content::{Question, QuestionSource};
use crate::roster::Removal;
use crate::session::{AnswerOutcome, Session};
use crate::store::SessionStore;
use crate::GameError;

/// Channel sender for delivering outbound messages to a player.
pub type PlayerSender = mpsc::UnboundedSender<ServerMessage>;

/// Reply to a successful join or rejoin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub player_id: PlayerId,
    pub state: SessionView,
}

/// Reply to a successful leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The last player left; the room has shut down.
    pub room_empty: bool,
    /// The player who took over as host, if the role moved.
    pub new_host: Option<PlayerId>,
}

/// A snapshot of room metadata, used by the registry's sweep.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub state: SessionState,
    pub player_count: usize,
    pub max_players: usize,
    /// The open or last settled round.
    pub round: Option<u32>,
    pub last_activity: Instant,
    pub ended_at: Option<Instant>,
}

/// Commands sent to a room actor through its channel.
///
/// Most variants carry a `oneshot::Sender`: the caller sends the command
/// and waits for the result on that reply channel.
pub(crate) enum RoomCommand {
    Join {
        name: String,
        sender: PlayerSender,
        reply: oneshot::Sender<Result<Joined, GameError>>,
    },
    Rejoin {
        player_id: PlayerId,
        sender: PlayerSender,
        reply: oneshot::Sender<Result<Joined, GameError>>,
    },
    Start {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<SessionView, GameError>>,
    },
    Answer {
        player_id: PlayerId,
        round: u32,
        choice: usize,
        /// Stamped by the handle when the answer was sent.
        received_at: Instant,
        reply: oneshot::Sender<Result<AnswerOutcome, GameError>>,
    },
    NextRound {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<SessionView, GameError>>,
    },
    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<LeaveOutcome, GameError>>,
    },
    GetState {
        reply: oneshot::Sender<SessionView>,
    },
    Info {
        reply: oneshot::Sender<RoomInfo>,
    },
    Shutdown,
}

/// Handle to a running room actor.
///
/// Cheap to clone: it's an `mpsc::Sender` plus the room id. Once the
/// actor has stopped, every call fails with
/// [`GameError::RoomNotFound`].
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Join { .. } => "Join",
            Self::Rejoin { .. } => "Rejoin",
            Self::Start { .. } => "Start",
            Self::Answer { .. } => "Answer",
            Self::NextRound { .. } => "NextRound",
            Self::Leave { .. } => "Leave",
            Self::GetState { .. } => "GetState",
            Self::Info { .. } => "Info",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Whether `other` talks to the same actor.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn join(
        &self,
        name: &str,
        sender: PlayerSender,
    ) -> Result<Joined, GameError> {
        let name = name.to_string();
        self.request(|reply| RoomCommand::Join {
            name,
            sender,
            reply,
        })
        .await?
    }

    pub async fn rejoin(
        &self,
        player_id: PlayerId,
        sender: PlayerSender,
    ) -> Result<Joined, GameError> {
        self.request(|reply| RoomCommand::Rejoin {
            player_id,
            sender,
            reply,
        })
        .await?
    }

    pub async fn start(
        &self,
        player_id: PlayerId,
    ) -> Result<SessionView, GameError> {
        self.request(|reply| RoomCommand::Start { player_id, reply })
            .await?
    }

    /// Submits an answer. The receive time is taken here, before the
    /// command waits in the room's queue.
    pub async fn submit_answer(
        &self,
        player_id: PlayerId,
        round: u32,
        choice: usize,
    ) -> Result<AnswerOutcome, GameError> {
        let received_at = Instant::now();
        self.request(|reply| RoomCommand::Answer {
            player_id,
            round,
            choice,
            received_at,
            reply,
        })
        .await?
    }

    pub async fn next_round(
        &self,
        player_id: PlayerId,
    ) -> Result<SessionView, GameError> {
        self.request(|reply| RoomCommand::NextRound { player_id, reply })
            .await?
    }

    pub async fn leave(
        &self,
        player_id: PlayerId,
    ) -> Result<LeaveOutcome, GameError> {
        self.request(|reply| RoomCommand::Leave { player_id, reply })
            .await?
    }

    pub async fn get_state(&self) -> Result<SessionView, GameError> {
        self.request(|reply| RoomCommand::GetState { reply }).await
    }

    pub async fn info(&self) -> Result<RoomInfo, GameError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Tells the room to stop. Members are sent `RoomLeft`.
    pub async fn shutdown(&self) -> Result<(), GameError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| GameError::RoomNotFound(self.room_id.clone()))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, GameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| GameError::RoomNotFound(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| GameError::RoomNotFound(self.room_id.clone()))
    }
}

/// What woke the actor up.
enum Event {
    Command(Option<RoomCommand>),
    Deadline(Deadline),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor<Q, S> {
    room_id: RoomId,
    session: Session,
    clock: RoundClock,
    /// Per-player outbound channels.
    subscribers: HashMap<PlayerId, PlayerSender>,
    source: Arc<Q>,
    store: Arc<S>,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl<Q: QuestionSource, S: SessionStore> RoomActor<Q, S> {
    /// Runs the actor loop until shutdown, the last player leaving, or
    /// every handle being dropped.
    async fn run(mut self) {
        tracing::info!(
            room_id = %self.room_id,
            state = %self.session.state(),
            "room actor started"
        );

        self.resume_clock();
        for &player_id in self.subscribers.keys() {
            self.send_to(
                player_id,
                ServerMessage::RoomJoined {
                    room_id: self.room_id.clone(),
                    player_id,
                    state: self.session.view(Instant::now()),
                },
            );
        }
        self.persist().await;

        loop {
            // Commands first: answers already queued when the deadline
            // fires are still inside the window.
            let event = tokio::select! {
                biased;
                cmd = self.receiver.recv() => Event::Command(cmd),
                fired = self.clock.wait_for_deadline() => Event::Deadline(fired),
            };

            match event {
                Event::Command(Some(cmd)) => {
                    if self.handle_command(cmd).await == Flow::Stop {
                        break;
                    }
                }
                Event::Command(None) => break,
                Event::Deadline(deadline) => self.on_deadline(deadline).await,
            }
        }

        self.clock.disarm();
        tracing::info!(room_id = %self.room_id, "room actor stopped");
    }

    async fn handle_command(&mut self, cmd: RoomCommand) -> Flow {
        tracing::trace!(room_id = %self.room_id, command = ?cmd, "command");
        match cmd {
            RoomCommand::Join {
                name,
                sender,
                reply,
            } => {
                let result = self.handle_join(&name, sender).await;
                let _ = reply.send(result);
            }
            RoomCommand::Rejoin {
                player_id,
                sender,
                reply,
            } => {
                let _ = reply.send(self.handle_rejoin(player_id, sender));
            }
            RoomCommand::Start { player_id, reply } => {
                let result = self.handle_start(player_id).await;
                let _ = reply.send(result);
            }
            RoomCommand::Answer {
                player_id,
                round,
                choice,
                received_at,
                reply,
            } => {
                let result = self
                    .handle_answer(player_id, round, choice, received_at)
                    .await;
                let _ = reply.send(result);
            }
            RoomCommand::NextRound { player_id, reply } => {
                let result = self.handle_next_round(player_id).await;
                let _ = reply.send(result);
            }
            RoomCommand::Leave { player_id, reply } => {
                let result = self.handle_leave(player_id).await;
                let empty = matches!(
                    result,
                    Ok(LeaveOutcome {
                        room_empty: true,
                        ..
                    })
                );
                let _ = reply.send(result);
                if empty {
                    return Flow::Stop;
                }
            }
            RoomCommand::GetState { reply } => {
                let _ = reply.send(self.session.view(Instant::now()));
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Shutdown => {
                tracing::info!(room_id = %self.room_id, "room shutting down");
                self.dispatch(
                    Recipient::All,
                    ServerMessage::RoomLeft {
                        room_id: self.room_id.clone(),
                    },
                );
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // -- commands ---------------------------------------------------------

    async fn handle_join(
        &mut self,
        name: &str,
        sender: PlayerSender,
    ) -> Result<Joined, GameError> {
        let now = Instant::now();
        let player = self.session.join(name, now).inspect_err(|e| {
            tracing::debug!(room_id = %self.room_id, error = %e, "join rejected");
        })?;
        let player_id = player.id;
        let state = self.session.view(now);

        self.subscribers.insert(player_id, sender);
        self.send_to(
            player_id,
            ServerMessage::RoomJoined {
                room_id: self.room_id.clone(),
                player_id,
                state: state.clone(),
            },
        );
        self.dispatch(
            Recipient::AllExcept(player_id),
            ServerMessage::PlayerJoined { player },
        );
        tracing::info!(
            room_id = %self.room_id,
            %player_id,
            players = self.session.player_count(),
            "player joined"
        );

        self.persist().await;
        Ok(Joined { player_id, state })
    }

    fn handle_rejoin(
        &mut self,
        player_id: PlayerId,
        sender: PlayerSender,
    ) -> Result<Joined, GameError> {
        let now = Instant::now();
        self.session.rejoin(player_id, now)?;
        let state = self.session.view(now);

        // The connection being replaced no longer speaks for this player.
        if let Some(previous) = self.subscribers.insert(player_id, sender.clone()) {
            if !previous.same_channel(&sender) {
                let _ = previous.send(ServerMessage::RoomLeft {
                    room_id: self.room_id.clone(),
                });
            }
        }
        self.send_to(
            player_id,
            ServerMessage::RoomJoined {
                room_id: self.room_id.clone(),
                player_id,
                state: state.clone(),
            },
        );
        tracing::info!(room_id = %self.room_id, %player_id, "player rejoined");
        Ok(Joined { player_id, state })
    }

    async fn handle_start(
        &mut self,
        player_id: PlayerId,
    ) -> Result<SessionView, GameError> {
        self.session.check_start(player_id).inspect_err(|e| {
            tracing::debug!(
                room_id = %self.room_id,
                %player_id,
                error = %e,
                "start rejected"
            );
        })?;

        // Nothing changes until the question is in hand, so a failing
        // source leaves the room in Waiting.
        let question = self.fetch_question().await?;
        let now = Instant::now();
        let round = self.session.start(player_id, question, now)?;
        self.clock.arm_at(
            round.ordinal,
            now,
            self.session.config().round_time_limit,
        );

        tracing::info!(
            room_id = %self.room_id,
            players = self.session.player_count(),
            total_rounds = round.total_rounds,
            "game started"
        );
        self.dispatch(
            Recipient::All,
            ServerMessage::GameStarted {
                total_rounds: round.total_rounds,
                players: self.session.roster().views(),
            },
        );
        self.dispatch(Recipient::All, ServerMessage::RoundStarted { round });

        self.persist().await;
        Ok(self.session.view(now))
    }

    async fn handle_answer(
        &mut self,
        player_id: PlayerId,
        round: u32,
        choice: usize,
        received_at: Instant,
    ) -> Result<AnswerOutcome, GameError> {
        let outcome = self
            .session
            .submit_answer(player_id, round, choice, received_at, Instant::now())
            .inspect_err(|e| {
                tracing::debug!(
                    room_id = %self.room_id,
                    %player_id,
                    round,
                    error = %e,
                    "answer rejected"
                );
            })?;

        self.send_to(
            player_id,
            ServerMessage::AnswerAccepted {
                round,
                correct: outcome.correct,
                points: outcome.points,
                score: outcome.score,
                streak: outcome.streak,
            },
        );
        self.dispatch(
            Recipient::All,
            ServerMessage::AnswerReceived {
                round,
                player_id,
                answered: outcome.answered,
                expected: outcome.expected,
            },
        );

        if outcome.all_answered() {
            self.settle(round, "all answered").await;
        }
        self.persist().await;
        Ok(outcome)
    }

    async fn handle_next_round(
        &mut self,
        player_id: PlayerId,
    ) -> Result<SessionView, GameError> {
        if !self.session.is_member(player_id) {
            return Err(GameError::NotInRoom(player_id));
        }
        if !self.session.roster().is_host(player_id) {
            return Err(GameError::NotHost);
        }
        if self.session.state() != SessionState::RoundSettled {
            return Err(GameError::InvalidState(format!(
                "cannot advance from {}",
                self.session.state()
            )));
        }

        self.advance().await?;
        self.persist().await;
        Ok(self.session.view(Instant::now()))
    }

    async fn handle_leave(
        &mut self,
        player_id: PlayerId,
    ) -> Result<LeaveOutcome, GameError> {
        // A finished game keeps its final roster; leaving only stops the
        // updates.
        if self.session.state().is_terminal() {
            if !self.session.is_member(player_id) {
                return Err(GameError::NotInRoom(player_id));
            }
            self.subscribers.remove(&player_id);
            return Ok(LeaveOutcome {
                room_empty: false,
                new_host: None,
            });
        }

        let removal = self.session.leave(player_id, Instant::now())?;
        self.subscribers.remove(&player_id);

        match removal {
            Removal::RoomNowEmpty => {
                tracing::info!(
                    room_id = %self.room_id,
                    %player_id,
                    "last player left, closing room"
                );
                self.clock.disarm();
                self.forget().await;
                Ok(LeaveOutcome {
                    room_empty: true,
                    new_host: None,
                })
            }
            Removal::RosterChanged { new_host } => {
                tracing::info!(
                    room_id = %self.room_id,
                    %player_id,
                    players = self.session.player_count(),
                    new_host = ?new_host,
                    "player left"
                );
                self.dispatch(
                    Recipient::All,
                    ServerMessage::PlayerLeft {
                        player_id,
                        new_host,
                    },
                );

                if self.session.round_complete() {
                    if let Some(ordinal) =
                        self.session.current_round().map(|r| r.ordinal)
                    {
                        self.settle(ordinal, "all answered").await;
                    }
                }
                self.persist().await;
                Ok(LeaveOutcome {
                    room_empty: false,
                    new_host,
                })
            }
        }
    }

    async fn on_deadline(&mut self, deadline: Deadline) {
        tracing::debug!(
            room_id = %self.room_id,
            round = deadline.handle.round(),
            late_ms = deadline.late_by.as_millis() as u64,
            "round deadline reached"
        );
        self.settle(deadline.handle.round(), "deadline").await;
        self.persist().await;
    }

    // -- round progression ------------------------------------------------

    /// Settles round `ordinal`, then advances. A no-op if that round was
    /// already settled.
    async fn settle(&mut self, ordinal: u32, trigger: &'static str) {
        let Some(result) = self.session.settle_round(ordinal, Instant::now())
        else {
            tracing::debug!(
                room_id = %self.room_id,
                round = ordinal,
                trigger,
                "round already settled"
            );
            return;
        };
        self.clock.disarm();

        tracing::info!(
            room_id = %self.room_id,
            round = ordinal,
            trigger,
            "round settled"
        );
        self.dispatch(Recipient::All, ServerMessage::RoundEnded { result });

        if let Err(e) = self.advance().await {
            tracing::warn!(
                room_id = %self.room_id,
                round = ordinal,
                error = %e,
                "could not open the next round, waiting for the host"
            );
        }
    }

    /// From `RoundSettled`: finish after the final round, otherwise open
    /// the next one. On error the session stays in `RoundSettled`.
    async fn advance(&mut self) -> Result<(), GameError> {
        if self.session.is_final_round() {
            let summary = self.session.finish(Instant::now())?;
            self.clock.disarm();
            tracing::info!(
                room_id = %self.room_id,
                winner = ?summary.winner.as_ref().map(|w| w.id),
                duration_ms = summary.duration_ms,
                "game finished"
            );
            self.dispatch(
                Recipient::All,
                ServerMessage::GameEnded {
                    standings: summary.standings,
                    winner: summary.winner,
                    total_rounds: summary.total_rounds,
                    duration_ms: summary.duration_ms,
                },
            );
            return Ok(());
        }

        let question = self.fetch_question().await?;
        let now = Instant::now();
        let round = self.session.next_round(question, now)?;
        self.clock.arm_at(
            round.ordinal,
            now,
            self.session.config().round_time_limit,
        );
        self.dispatch(Recipient::All, ServerMessage::RoundStarted { round });
        Ok(())
    }

    async fn fetch_question(&self) -> Result<Question, GameError> {
        self.source
            .next_question(self.session.used_question_ids())
            .await
            .map_err(|e| {
                tracing::error!(
                    room_id = %self.room_id,
                    error = %e,
                    "question source failed"
                );
                GameError::Internal(e.to_string())
            })
    }

    /// Re-arms the clock for a session restored mid-round. An overdue
    /// round fires on the next loop iteration.
    fn resume_clock(&mut self) {
        if self.session.state() != SessionState::InRound {
            return;
        }
        if let Some(round) = self.session.current_round() {
            let (ordinal, started) = (round.ordinal, round.started_at);
            let limit = self.session.config().round_time_limit;
            self.clock.arm_at(ordinal, started, limit);
        }
    }

    // -- persistence ------------------------------------------------------

    async fn persist(&self) {
        let record = self.session.record(Instant::now());
        if let Err(e) = self.store.save(&record).await {
            let err = GameError::from(e);
            tracing::warn!(
                room_id = %self.room_id,
                error = %err,
                "session not saved, continuing in memory"
            );
        }
    }

    async fn forget(&self) {
        if let Err(e) = self.store.delete(&self.room_id).await {
            let err = GameError::from(e);
            tracing::warn!(
                room_id = %self.room_id,
                error = %err,
                "session record not deleted"
            );
        }
    }

    // -- delivery ---------------------------------------------------------

    /// Dispatches an outbound message to the right subscribers.
    fn dispatch(&self, recipient: Recipient, msg: ServerMessage) {
        match recipient {
            Recipient::All => {
                for sender in self.subscribers.values() {
                    let _ = sender.send(msg.clone());
                }
            }
            Recipient::Player(pid) => self.send_to(pid, msg),
            Recipient::AllExcept(excluded) => {
                for (pid, sender) in &self.subscribers {
                    if *pid != excluded {
                        let _ = sender.send(msg.clone());
                    }
                }
            }
        }
    }

    /// Sends to one player. Silently drops if their connection is gone.
    fn send_to(&self, player_id: PlayerId, msg: ServerMessage) {
        if let Some(sender) = self.subscribers.get(&player_id) {
            let _ = sender.send(msg);
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            state: self.session.state(),
            player_count: self.session.player_count(),
            max_players: self.session.config().max_players,
            round: self.session.current_round().map(|r| r.ordinal),
            last_activity: self.session.last_activity(),
            ended_at: self.session.ended_at(),
        }
    }
}

/// Spawns a room actor for `session` and returns a handle to it.
///
/// `host`, if given, is subscribed and sent `RoomJoined` before any
/// command is processed. A session restored mid-round resumes its
/// countdown. `channel_size` bounds the command queue; senders wait when
/// it is full.
pub(crate) fn spawn_room<Q: QuestionSource, S: SessionStore>(
    session: Session,
    host: Option<(PlayerId, PlayerSender)>,
    source: Arc<Q>,
    store: Arc<S>,
    channel_size: usize,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(channel_size.max(1));
    let room_id = session.room_id().clone();

    let actor = RoomActor {
        room_id: room_id.clone(),
        session,
        clock: RoundClock::new(),
        subscribers: host.into_iter().collect(),
        source,
        store,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}
