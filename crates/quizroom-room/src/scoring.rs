//! The scoring engine: a pure mapping from one answer to a point delta.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point values used when scoring an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// Points for any correct answer.
    pub base_points: u32,
    /// Bonus for an instant correct answer; decays linearly to zero at
    /// the deadline.
    pub time_bonus_max: u32,
    /// Extra points per consecutive correct answer before this one.
    pub streak_increment: u32,
    /// Flat bonus for answering in the final round, right or wrong.
    pub completion_bonus: u32,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            base_points: 100,
            time_bonus_max: 50,
            streak_increment: 25,
            completion_bonus: 50,
        }
    }
}

/// How a player's answer for a round turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Correct,
    Incorrect,
    /// The round settled without an answer from this player.
    Unanswered,
}

impl Verdict {
    pub fn is_correct(self) -> bool {
        matches!(self, Self::Correct)
    }
}

/// The result of scoring one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreDelta {
    /// Points to add to the player's score.
    pub points: u32,
    /// The player's streak after this answer.
    pub streak: u32,
}

impl ScoringRules {
    /// Scores one answer.
    ///
    /// - Incorrect or unanswered: 0 points, streak resets to 0.
    /// - Correct: `base + time_bonus + streak_increment * streak`, where
    ///   `streak` is the value *before* this answer, and the streak
    ///   grows by one.
    /// - Final round: `completion_bonus` is added for every player,
    ///   whether they answered right, wrong, or not at all.
    ///
    /// `elapsed` is clamped to `[0, time_limit]`, so an answer that was
    /// processed after the deadline never earns a negative or oversized
    /// time bonus.
    pub fn score(
        &self,
        verdict: Verdict,
        elapsed: Duration,
        time_limit: Duration,
        current_streak: u32,
        is_final_round: bool,
    ) -> ScoreDelta {
        let completion = if is_final_round {
            self.completion_bonus
        } else {
            0
        };

        if !verdict.is_correct() {
            return ScoreDelta {
                points: completion,
                streak: 0,
            };
        }

        let time_bonus = self.time_bonus(elapsed, time_limit);
        let streak_bonus =
            self.streak_increment.saturating_mul(current_streak);
        let points = self
            .base_points
            .saturating_add(time_bonus)
            .saturating_add(streak_bonus)
            .saturating_add(completion);

        ScoreDelta {
            points,
            streak: current_streak.saturating_add(1),
        }
    }

    /// `floor(time_bonus_max * (1 - elapsed / time_limit))`, with
    /// `elapsed` clamped into the window. Integer arithmetic keeps the
    /// floor exact.
    pub fn time_bonus(&self, elapsed: Duration, time_limit: Duration) -> u32 {
        let limit = time_limit.as_millis();
        if limit == 0 {
            return 0;
        }
        let elapsed = elapsed.as_millis().min(limit);
        let bonus = u128::from(self.time_bonus_max) * (limit - elapsed) / limit;
        // bonus <= time_bonus_max, so this never truncates.
        bonus as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(30);

    fn rules() -> ScoringRules {
        ScoringRules::default()
    }

    #[test]
    fn test_correct_with_streak_at_ten_seconds() {
        let delta = rules().score(
            Verdict::Correct,
            Duration::from_secs(10),
            LIMIT,
            2,
            false,
        );
        // 100 base + floor(50 * 20/30) = 33 + 25 * 2 = 50
        assert_eq!(delta.points, 183);
        assert_eq!(delta.streak, 3);
    }

    #[test]
    fn test_incorrect_resets_streak_and_scores_zero() {
        let delta = rules().score(
            Verdict::Incorrect,
            Duration::from_secs(1),
            LIMIT,
            3,
            false,
        );
        assert_eq!(delta, ScoreDelta { points: 0, streak: 0 });
    }

    #[test]
    fn test_unanswered_resets_streak() {
        let delta =
            rules().score(Verdict::Unanswered, LIMIT, LIMIT, 5, false);
        assert_eq!(delta, ScoreDelta { points: 0, streak: 0 });
    }

    #[test]
    fn test_instant_answer_gets_full_time_bonus() {
        let delta =
            rules().score(Verdict::Correct, Duration::ZERO, LIMIT, 0, false);
        assert_eq!(delta.points, 150);
        assert_eq!(delta.streak, 1);
    }

    #[test]
    fn test_late_answer_is_clamped_to_zero_bonus() {
        let delta = rules().score(
            Verdict::Correct,
            Duration::from_secs(45),
            LIMIT,
            0,
            false,
        );
        assert_eq!(delta.points, 100);
    }

    #[test]
    fn test_final_round_bonus_for_incorrect_answer() {
        let delta = rules().score(
            Verdict::Incorrect,
            Duration::from_secs(3),
            LIMIT,
            4,
            true,
        );
        assert_eq!(delta.points, 50);
        assert_eq!(delta.streak, 0);
    }

    #[test]
    fn test_final_round_bonus_stacks_on_correct_answer() {
        let delta = rules().score(
            Verdict::Correct,
            Duration::from_secs(15),
            LIMIT,
            1,
            true,
        );
        // 100 + 25 + 25 + 50
        assert_eq!(delta.points, 200);
    }

    #[test]
    fn test_final_round_bonus_when_unanswered() {
        let delta =
            rules().score(Verdict::Unanswered, LIMIT, LIMIT, 3, true);
        assert_eq!(delta.points, 50);
        assert_eq!(delta.streak, 0);
    }

    #[test]
    fn test_time_bonus_floors() {
        let r = rules();
        assert_eq!(r.time_bonus(Duration::from_secs(10), LIMIT), 33);
        assert_eq!(r.time_bonus(Duration::from_millis(29_999), LIMIT), 0);
        assert_eq!(r.time_bonus(Duration::from_millis(1), LIMIT), 49);
    }

    #[test]
    fn test_zero_time_limit_gives_no_bonus() {
        assert_eq!(rules().time_bonus(Duration::ZERO, Duration::ZERO), 0);
    }
}
