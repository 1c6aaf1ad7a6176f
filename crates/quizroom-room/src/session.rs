//! The session state machine.
//!
//! A [`Session`] is plain data plus transitions. It never spawns, sleeps,
//! or does I/O: the room actor fetches questions, arms the clock, and
//! passes `now` in. Every transition either succeeds completely or
//! returns a [`GameError`] with the session untouched.
//!
//! ```text
//! Waiting → InRound → RoundSettled → InRound → ... → RoundSettled → Finished
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use quizroom_protocol::{
    PlayerId, PlayerRoundResult, PlayerView, RoomId, RoundResult, RoundView,
    SessionState, SessionView, Standing,
};

use crate::content::{Question, QuestionId};
use crate::roster::{AddRejection, Removal, Roster};
use crate::scoring::Verdict;
use crate::store::{AnswerRecord, RoundRecord, SessionRecord};
use crate::{GameConfig, GameError};

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

/// One recorded answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Answer {
    pub choice: usize,
    pub received_at: Instant,
    pub verdict: Verdict,
    pub points: u32,
}

/// The active or most recently settled round.
#[derive(Debug, Clone)]
pub struct Round {
    pub ordinal: u32,
    pub question: Question,
    pub started_at: Instant,
    pub deadline: Instant,
    answers: HashMap<PlayerId, Answer>,
}

impl Round {
    fn new(
        ordinal: u32,
        question: Question,
        now: Instant,
        limit: Duration,
    ) -> Self {
        Self {
            ordinal,
            question,
            started_at: now,
            deadline: now + limit,
            answers: HashMap::new(),
        }
    }

    pub fn answer(&self, player: PlayerId) -> Option<&Answer> {
        self.answers.get(&player)
    }

    pub fn has_answered(&self, player: PlayerId) -> bool {
        self.answers.contains_key(&player)
    }
}

/// What an accepted answer did. The caller learns the verdict; the
/// room only learns that someone answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub player_id: PlayerId,
    pub round: u32,
    pub correct: bool,
    pub points: u32,
    pub score: u32,
    pub streak: u32,
    /// Current players who have answered this round.
    pub answered: usize,
    /// Current players in the room.
    pub expected: usize,
}

impl AnswerOutcome {
    pub fn all_answered(&self) -> bool {
        self.answered >= self.expected
    }
}

/// Final standings of a finished game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSummary {
    pub standings: Vec<Standing>,
    pub winner: Option<PlayerView>,
    pub total_rounds: u32,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One room's game.
#[derive(Debug, Clone)]
pub struct Session {
    room_id: RoomId,
    config: GameConfig,
    state: SessionState,
    roster: Roster,
    round: Option<Round>,
    used_questions: Vec<QuestionId>,
    created_at: Instant,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    last_activity: Instant,
}

impl Session {
    /// Creates a session in `Waiting` with `host_name` as its only player.
    pub fn new(
        room_id: RoomId,
        host_name: &str,
        config: GameConfig,
        now: Instant,
    ) -> Result<(Self, PlayerId), GameError> {
        let config = config.validated();
        let mut roster = Roster::new(config.max_players);
        let host = roster
            .add_player(host_name, true, now)
            .map_err(|_| GameError::InvalidState("cannot seat host".into()))?
            .id;

        let session = Self {
            room_id,
            config,
            state: SessionState::Waiting,
            roster,
            round: None,
            used_questions: Vec::new(),
            created_at: now,
            started_at: None,
            ended_at: None,
            last_activity: now,
        };
        Ok((session, host))
    }

    // -- accessors --------------------------------------------------------

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn used_question_ids(&self) -> &[QuestionId] {
        &self.used_questions
    }

    pub fn is_member(&self, player: PlayerId) -> bool {
        self.roster.contains(player)
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// True when the open round is the last one of the game.
    pub fn is_final_round(&self) -> bool {
        self.round
            .as_ref()
            .is_some_and(|r| r.ordinal >= self.config.total_rounds)
    }

    // -- roster transitions -----------------------------------------------

    /// Adds a player. Only while `Waiting`.
    pub fn join(
        &mut self,
        name: &str,
        now: Instant,
    ) -> Result<PlayerView, GameError> {
        if !self.state.is_joinable() {
            return Err(GameError::GameInProgress);
        }
        let player = self
            .roster
            .add_player(name, false, now)
            .map_err(|rejection| match rejection {
                AddRejection::DuplicateName => {
                    GameError::NameTaken(name.trim().to_string())
                }
                AddRejection::RoomFull => GameError::RoomFull,
            })?
            .view();
        self.last_activity = now;
        Ok(player)
    }

    /// Looks up an existing player so a new connection can take over.
    pub fn rejoin(
        &mut self,
        player: PlayerId,
        now: Instant,
    ) -> Result<PlayerView, GameError> {
        let view = self
            .roster
            .find(player)
            .map(|p| p.view())
            .ok_or(GameError::NotInRoom(player))?;
        self.last_activity = now;
        Ok(view)
    }

    /// Removes a player. Not allowed once the game is `Finished`.
    ///
    /// When the host leaves, the role moves in the same step. The
    /// caller checks [`Session::round_complete`] afterwards: the leaver
    /// may have been the last one the round was waiting on.
    pub fn leave(
        &mut self,
        player: PlayerId,
        now: Instant,
    ) -> Result<Removal, GameError> {
        if self.state.is_terminal() {
            return Err(GameError::InvalidState(
                "the game is over; the roster is frozen".into(),
            ));
        }
        let removal = self
            .roster
            .remove_player(player)
            .ok_or(GameError::NotInRoom(player))?;
        self.last_activity = now;
        Ok(removal)
    }

    // -- game transitions -------------------------------------------------

    /// Checks whether `player` may start the game right now.
    ///
    /// Split from [`Session::start`] so the actor can reject before it
    /// fetches the first question.
    pub fn check_start(&self, player: PlayerId) -> Result<(), GameError> {
        if !self.roster.contains(player) {
            return Err(GameError::NotInRoom(player));
        }
        match self.state {
            SessionState::Waiting => {}
            SessionState::Finished => {
                return Err(GameError::InvalidState(
                    "the game is over".into(),
                ));
            }
            _ => return Err(GameError::GameInProgress),
        }
        if !self.roster.is_host(player) {
            return Err(GameError::NotHost);
        }
        let have = self.roster.len();
        let need = self.config.min_players;
        if have < need {
            return Err(GameError::NotEnoughPlayers { have, need });
        }
        Ok(())
    }

    /// `Waiting → InRound`: opens round 1 with `question`.
    ///
    /// Scores and streaks start from zero.
    pub fn start(
        &mut self,
        player: PlayerId,
        question: Question,
        now: Instant,
    ) -> Result<RoundView, GameError> {
        self.check_start(player)?;

        for p in self.roster.iter_mut() {
            p.reset_stats();
        }
        self.used_questions.clear();
        self.started_at = Some(now);
        self.open_round(1, question, now);
        self.round_view(now).ok_or_else(missing_round)
    }

    /// Records one answer for the open round and scores it immediately.
    ///
    /// `received_at` is when the server received the answer, which
    /// may be slightly earlier than `now`. The answer counts if it was
    /// received before the deadline and the round is still open.
    pub fn submit_answer(
        &mut self,
        player: PlayerId,
        round: u32,
        choice: usize,
        received_at: Instant,
        now: Instant,
    ) -> Result<AnswerOutcome, GameError> {
        if !self.roster.contains(player) {
            return Err(GameError::NotInRoom(player));
        }
        if !self.state.accepts_answers() {
            return Err(GameError::RoundClosed);
        }
        let is_final = self.is_final_round();
        let Some(open) = self.round.as_mut() else {
            return Err(GameError::RoundClosed);
        };
        if open.ordinal != round {
            return Err(GameError::RoundClosed);
        }
        if open.has_answered(player) {
            return Err(GameError::DuplicateAnswer);
        }
        if received_at >= open.deadline {
            return Err(GameError::RoundClosed);
        }

        let verdict = if open.question.is_correct(choice) {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        };
        let elapsed = received_at.saturating_duration_since(open.started_at);

        let Some(p) = self.roster.find_mut(player) else {
            return Err(GameError::NotInRoom(player));
        };
        let delta = self.config.scoring.score(
            verdict,
            elapsed,
            self.config.round_time_limit,
            p.streak,
            is_final,
        );
        p.score = p.score.saturating_add(delta.points);
        p.streak = delta.streak;
        if verdict.is_correct() {
            p.correct_answers += 1;
        }
        p.last_answer_at = Some(received_at);
        let (score, streak) = (p.score, p.streak);

        open.answers.insert(
            player,
            Answer {
                choice,
                received_at,
                verdict,
                points: delta.points,
            },
        );
        self.last_activity = now;

        let (answered, expected) = self.answer_counts();
        Ok(AnswerOutcome {
            player_id: player,
            round,
            correct: verdict.is_correct(),
            points: delta.points,
            score,
            streak,
            answered,
            expected,
        })
    }

    /// `(answered, expected)` for the current round, counting only
    /// players still in the room.
    pub fn answer_counts(&self) -> (usize, usize) {
        let answered = match &self.round {
            Some(round) => self
                .roster
                .iter()
                .filter(|p| round.has_answered(p.id))
                .count(),
            None => 0,
        };
        (answered, self.roster.len())
    }

    /// True when the open round has an answer from every current player.
    pub fn round_complete(&self) -> bool {
        if !self.state.accepts_answers() || self.roster.is_empty() {
            return false;
        }
        let (answered, expected) = self.answer_counts();
        answered >= expected
    }

    /// `InRound → RoundSettled` for round `ordinal`.
    ///
    /// Players who didn't answer are scored as unanswered (streak
    /// reset). Returns `None`, changing nothing, if that round is not
    /// the open one: it was already settled by the other trigger.
    pub fn settle_round(
        &mut self,
        ordinal: u32,
        now: Instant,
    ) -> Option<RoundResult> {
        if !self.state.accepts_answers() {
            return None;
        }
        let round = self.round.as_ref().filter(|r| r.ordinal == ordinal)?;
        let is_final = round.ordinal >= self.config.total_rounds;
        let limit = self.config.round_time_limit;
        let scoring = self.config.scoring;

        let mut results = Vec::with_capacity(self.roster.len());
        for p in self.roster.iter_mut() {
            let (answered, correct, points) = match round.answer(p.id) {
                Some(answer) => (true, answer.verdict.is_correct(), answer.points),
                None => {
                    let delta = scoring.score(
                        Verdict::Unanswered,
                        limit,
                        limit,
                        p.streak,
                        is_final,
                    );
                    p.score = p.score.saturating_add(delta.points);
                    p.streak = delta.streak;
                    (false, false, delta.points)
                }
            };
            results.push(PlayerRoundResult {
                player_id: p.id,
                name: p.name.clone(),
                answered,
                correct,
                points,
                total_score: p.score,
                streak: p.streak,
            });
        }

        let result = RoundResult {
            ordinal: round.ordinal,
            correct_choice: round.question.correct_index,
            correct_option: round.question.correct_option().to_string(),
            results,
        };
        self.state = SessionState::RoundSettled;
        self.last_activity = now;
        Some(result)
    }

    /// `RoundSettled → InRound`: opens the next round.
    pub fn next_round(
        &mut self,
        question: Question,
        now: Instant,
    ) -> Result<RoundView, GameError> {
        if self.state != SessionState::RoundSettled {
            return Err(GameError::InvalidState(format!(
                "cannot advance from {}",
                self.state
            )));
        }
        if self.is_final_round() {
            return Err(GameError::InvalidState(
                "the final round has been played".into(),
            ));
        }
        let ordinal = self.round.as_ref().map_or(0, |r| r.ordinal) + 1;
        self.open_round(ordinal, question, now);
        self.round_view(now).ok_or_else(missing_round)
    }

    /// `RoundSettled → Finished`, after the final round.
    ///
    /// Standings are sorted by score, highest first; ties keep join
    /// order.
    pub fn finish(&mut self, now: Instant) -> Result<GameSummary, GameError> {
        if self.state != SessionState::RoundSettled || !self.is_final_round()
        {
            return Err(GameError::InvalidState(format!(
                "cannot finish from {}",
                self.state
            )));
        }
        self.state = SessionState::Finished;
        self.ended_at = Some(now);
        self.last_activity = now;
        Ok(self.summary(now))
    }

    /// The standings as they are now.
    pub fn standings(&self) -> Vec<Standing> {
        let mut players: Vec<PlayerView> = self.roster.views();
        // Stable: equal scores keep join order.
        players.sort_by(|a, b| b.score.cmp(&a.score));
        players
            .into_iter()
            .enumerate()
            .map(|(i, player)| Standing { rank: i + 1, player })
            .collect()
    }

    pub fn summary(&self, now: Instant) -> GameSummary {
        let standings = self.standings();
        let winner = standings.first().map(|s| s.player.clone());
        let end = self.ended_at.unwrap_or(now);
        let duration_ms = self
            .started_at
            .map_or(0, |s| end.saturating_duration_since(s).as_millis() as u64);
        GameSummary {
            standings,
            winner,
            total_rounds: self.config.total_rounds,
            duration_ms,
        }
    }

    // -- snapshots --------------------------------------------------------

    pub fn round_view(&self, now: Instant) -> Option<RoundView> {
        let round = self.round.as_ref()?;
        let remaining = if self.state.accepts_answers() {
            round.deadline.saturating_duration_since(now)
        } else {
            Duration::ZERO
        };
        Some(RoundView {
            ordinal: round.ordinal,
            total_rounds: self.config.total_rounds,
            question: round.question.view(),
            time_limit_ms: self.config.round_time_limit.as_millis() as u64,
            remaining_ms: remaining.as_millis() as u64,
            answered: self.answer_counts().0,
        })
    }

    /// A read-only snapshot for clients.
    pub fn view(&self, now: Instant) -> SessionView {
        SessionView {
            room_id: self.room_id.clone(),
            state: self.state,
            total_rounds: self.config.total_rounds,
            max_players: self.config.max_players,
            players: self.roster.views(),
            round: self.round_view(now),
        }
    }

    /// The persisted form. Instants become offsets from `now`.
    pub fn record(&self, now: Instant) -> SessionRecord {
        let round = self.round.as_ref().map(|r| RoundRecord {
            ordinal: r.ordinal,
            question: r.question.clone(),
            elapsed_ms: millis_between(r.started_at, now),
            answers: self
                .roster
                .iter()
                .filter_map(|p| {
                    r.answer(p.id).map(|a| AnswerRecord {
                        player_id: p.id,
                        choice: a.choice,
                        elapsed_ms: millis_between(r.started_at, a.received_at),
                        correct: a.verdict.is_correct(),
                        points: a.points,
                    })
                })
                .collect(),
        });

        SessionRecord {
            room_id: self.room_id.clone(),
            state: self.state,
            config: self.config.clone(),
            players: self.roster.records(),
            round,
            used_questions: self.used_questions.clone(),
            game_elapsed_ms: self.started_at.map(|s| millis_between(s, now)),
        }
    }

    /// Rebuilds a session from a record saved by [`Session::record`].
    ///
    /// Offsets are re-anchored at `now`. A finished game counts as
    /// having ended at `now`.
    pub fn restore(
        record: SessionRecord,
        now: Instant,
    ) -> Result<Self, GameError> {
        if record.players.is_empty() {
            return Err(GameError::Internal(format!(
                "record for room {} has no players",
                record.room_id
            )));
        }
        if record.state != SessionState::Waiting && record.round.is_none() {
            return Err(GameError::Internal(format!(
                "record for room {} is {} without a round",
                record.room_id, record.state
            )));
        }

        let config = record.config.validated();
        let roster = Roster::restore(config.max_players, record.players, now);
        let limit = config.round_time_limit;

        let round = record.round.map(|r| {
            let started_at = instant_before(now, r.elapsed_ms);
            let answers = r
                .answers
                .into_iter()
                .map(|a| {
                    let verdict = if a.correct {
                        Verdict::Correct
                    } else {
                        Verdict::Incorrect
                    };
                    let answer = Answer {
                        choice: a.choice,
                        received_at: started_at
                            + Duration::from_millis(a.elapsed_ms),
                        verdict,
                        points: a.points,
                    };
                    (a.player_id, answer)
                })
                .collect();
            Round {
                ordinal: r.ordinal,
                question: r.question,
                started_at,
                deadline: started_at + limit,
                answers,
            }
        });

        let ended_at = record.state.is_terminal().then_some(now);
        Ok(Self {
            room_id: record.room_id,
            config,
            state: record.state,
            roster,
            round,
            used_questions: record.used_questions,
            created_at: now,
            started_at: record.game_elapsed_ms.map(|ms| instant_before(now, ms)),
            ended_at,
            last_activity: now,
        })
    }

    fn open_round(&mut self, ordinal: u32, question: Question, now: Instant) {
        self.used_questions.push(question.id.clone());
        self.round = Some(Round::new(
            ordinal,
            question,
            now,
            self.config.round_time_limit,
        ));
        self.state = SessionState::InRound;
        self.last_activity = now;
    }
}

fn missing_round() -> GameError {
    GameError::Internal("round missing after opening".into())
}

fn millis_between(earlier: Instant, later: Instant) -> u64 {
    later.saturating_duration_since(earlier).as_millis() as u64
}

fn instant_before(now: Instant, ms: u64) -> Instant {
    now.checked_sub(Duration::from_millis(ms)).unwrap_or(now)
}
