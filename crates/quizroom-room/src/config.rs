//! Game and registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ScoringRules;

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

/// Per-room game settings, fixed when the room is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Minimum players required before the host can start.
    pub min_players: usize,

    /// Maximum players allowed in the room.
    pub max_players: usize,

    /// Number of rounds in a game.
    pub total_rounds: u32,

    /// How long each round stays open for answers.
    pub round_time_limit: Duration,

    /// Point values used by the scoring engine.
    pub scoring: ScoringRules,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 4,
            total_rounds: 10,
            round_time_limit: Duration::from_secs(30),
            scoring: ScoringRules::default(),
        }
    }
}

impl GameConfig {
    /// Smallest room that can play.
    pub const MIN_PLAYERS_FLOOR: usize = 2;

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Rules:
    /// - `min_players` is at least [`Self::MIN_PLAYERS_FLOOR`].
    /// - `max_players` is at least `min_players`.
    /// - `total_rounds` is at least 1.
    /// - `round_time_limit` is at least one second.
    pub fn validated(mut self) -> Self {
        if self.min_players < Self::MIN_PLAYERS_FLOOR {
            tracing::warn!(
                min_players = self.min_players,
                floor = Self::MIN_PLAYERS_FLOOR,
                "min_players below floor, clamping"
            );
            self.min_players = Self::MIN_PLAYERS_FLOOR;
        }
        if self.max_players < self.min_players {
            tracing::warn!(
                max_players = self.max_players,
                min_players = self.min_players,
                "max_players below min_players, clamping"
            );
            self.max_players = self.min_players;
        }
        if self.total_rounds == 0 {
            tracing::warn!("total_rounds is 0, clamping to 1");
            self.total_rounds = 1;
        }
        if self.round_time_limit < Duration::from_secs(1) {
            tracing::warn!(
                limit_ms = self.round_time_limit.as_millis() as u64,
                "round_time_limit under one second, clamping"
            );
            self.round_time_limit = Duration::from_secs(1);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Settings for the session registry and its sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long a finished room stays queryable before the sweep
    /// removes it.
    pub finished_retention: Duration,

    /// How long an empty waiting room may sit before the sweep
    /// removes it.
    pub idle_timeout: Duration,

    /// How often the background sweeper runs.
    pub sweep_interval: Duration,

    /// Command channel capacity per room actor. Senders wait when full.
    pub channel_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            finished_retention: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            channel_size: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_config_default() {
        let config = GameConfig::default();
        assert_eq!(config.min_players, 2);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.total_rounds, 10);
        assert_eq!(config.round_time_limit, Duration::from_secs(30));
    }

    #[test]
    fn test_validated_clamps_bad_values() {
        let config = GameConfig {
            min_players: 0,
            max_players: 1,
            total_rounds: 0,
            round_time_limit: Duration::ZERO,
            ..GameConfig::default()
        }
        .validated();

        assert_eq!(config.min_players, 2);
        assert_eq!(config.max_players, 2);
        assert_eq!(config.total_rounds, 1);
        assert_eq!(config.round_time_limit, Duration::from_secs(1));
    }

    #[test]
    fn test_validated_keeps_good_values() {
        let config = GameConfig {
            max_players: 8,
            total_rounds: 5,
            ..GameConfig::default()
        };
        assert_eq!(config.clone().validated(), config);
    }

    #[test]
    fn test_registry_config_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.finished_retention, Duration::from_secs(3600));
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.channel_size, 64);
    }
}
