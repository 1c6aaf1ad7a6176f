//! Cancellable per-round deadline clock for Quizroom.
//!
//! A [`RoundClock`] holds at most one armed countdown. Arming a new one
//! replaces (cancels) the previous one, and an armed countdown fires
//! exactly once unless cancelled first.
//!
//! # Integration
//!
//! The clock never calls back into game code. Instead it sits inside a
//! room actor's `tokio::select!` loop, so the deadline is handled by the
//! same serialized path as player commands:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         fired = clock.wait_for_deadline() => {
//!             // still the same round? settle it; otherwise ignore
//!         }
//!     }
//! }
//! ```
//!
//! When disarmed, [`RoundClock::wait_for_deadline`] pends forever, which
//! `select!` treats as "this branch never wins".

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Handles and events
// ---------------------------------------------------------------------------

/// Identifies one `arm` call.
///
/// Handles are never reused: each `arm` gets a fresh generation, so a
/// handle from an earlier round can't cancel the current countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockHandle {
    generation: u64,
    round: u32,
}

impl ClockHandle {
    /// The round ordinal this countdown was armed for.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// The arm generation (monotonic per clock).
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A fired deadline, returned by [`RoundClock::wait_for_deadline`].
#[derive(Debug, Clone)]
pub struct Deadline {
    /// The handle that fired. Compare `handle.round()` against the
    /// session before acting on it.
    pub handle: ClockHandle,
    /// When the deadline was scheduled for.
    pub due: Instant,
    /// How late the wake-up was.
    pub late_by: Duration,
}

/// Counters kept by the clock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockMetrics {
    pub armed: u64,
    pub fired: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    handle: ClockHandle,
    started: Instant,
    due: Instant,
}

// ---------------------------------------------------------------------------
// RoundClock
// ---------------------------------------------------------------------------

/// The per-room round countdown. One `RoundClock` per room actor.
#[derive(Debug, Default)]
pub struct RoundClock {
    armed: Option<Armed>,
    next_generation: u64,
    metrics: ClockMetrics,
}

impl RoundClock {
    /// Creates a disarmed clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a countdown of `duration` for `round`, starting now.
    ///
    /// If another countdown is still armed it is cancelled first.
    pub fn arm(&mut self, round: u32, duration: Duration) -> ClockHandle {
        self.arm_at(round, Instant::now(), duration)
    }

    /// Arms a countdown that started at `started` and is due at
    /// `started + duration`. Used when the round opened slightly before
    /// the clock could be armed, or when resuming a persisted round.
    pub fn arm_at(
        &mut self,
        round: u32,
        started: Instant,
        duration: Duration,
    ) -> ClockHandle {
        if let Some(prev) = self.armed.take() {
            self.metrics.cancelled += 1;
            debug!(
                round = prev.handle.round,
                generation = prev.handle.generation,
                "re-arming replaced a live countdown"
            );
        }

        self.next_generation += 1;
        let handle = ClockHandle {
            generation: self.next_generation,
            round,
        };
        self.armed = Some(Armed {
            handle,
            started,
            due: started + duration,
        });
        self.metrics.armed += 1;

        debug!(
            round,
            generation = handle.generation,
            duration_ms = duration.as_millis() as u64,
            "round clock armed"
        );
        handle
    }

    /// Cancels the countdown identified by `handle`.
    ///
    /// Returns `true` if it was live. A stale handle (already fired,
    /// already cancelled, or replaced by a newer `arm`) is a no-op.
    pub fn cancel(&mut self, handle: ClockHandle) -> bool {
        match self.armed {
            Some(armed) if armed.handle == handle => {
                self.armed = None;
                self.metrics.cancelled += 1;
                debug!(
                    round = handle.round,
                    generation = handle.generation,
                    "round clock cancelled"
                );
                true
            }
            _ => false,
        }
    }

    /// Cancels whatever is armed. Returns `true` if something was.
    pub fn disarm(&mut self) -> bool {
        match self.armed {
            Some(armed) => self.cancel(armed.handle),
            None => false,
        }
    }

    /// Waits for the armed countdown to expire.
    ///
    /// Resolves once per `arm`; afterwards the clock is disarmed. Pends
    /// forever while nothing is armed.
    ///
    /// Cancel-safe: if this future is dropped before it resolves (for
    /// example because another `select!` branch won), the countdown stays
    /// armed and the next call picks it up.
    pub async fn wait_for_deadline(&mut self) -> Deadline {
        let Some(armed) = self.armed else {
            return std::future::pending().await;
        };

        time::sleep_until(armed.due).await;

        self.armed = None;
        self.metrics.fired += 1;
        let late_by = Instant::now().saturating_duration_since(armed.due);
        trace!(
            round = armed.handle.round,
            generation = armed.handle.generation,
            late_ms = late_by.as_millis() as u64,
            "round deadline fired"
        );

        Deadline {
            handle: armed.handle,
            due: armed.due,
            late_by,
        }
    }

    /// The live handle, if any.
    pub fn current(&self) -> Option<ClockHandle> {
        self.armed.map(|a| a.handle)
    }

    /// Whether a countdown is armed.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// When the armed countdown is due.
    pub fn due(&self) -> Option<Instant> {
        self.armed.map(|a| a.due)
    }

    /// Time left until the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .map(|a| a.due.saturating_duration_since(Instant::now()))
    }

    /// Time since the armed countdown started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.armed
            .map(|a| Instant::now().saturating_duration_since(a.started))
    }

    /// Snapshot of the clock's counters.
    pub fn metrics(&self) -> &ClockMetrics {
        &self.metrics
    }
}
