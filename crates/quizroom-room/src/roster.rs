//! The player registry: one room's ordered roster.
//!
//! Players are kept in join order. Two invariants hold after every
//! operation:
//!
//! - names are unique within the roster (compared case-insensitively,
//!   ignoring surrounding whitespace);
//! - exactly one player is host whenever the roster is non-empty.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use quizroom_protocol::{PlayerId, PlayerView};

/// Largest id handed out. JSON clients read numbers as doubles, so ids
/// stay within the exactly representable range.
const MAX_WIRE_ID: u64 = (1 << 53) - 1;

/// One participant and their running stats.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub streak: u32,
    pub correct_answers: u32,
    pub is_host: bool,
    pub joined_at: Instant,
    /// When this player last submitted an answer.
    pub last_answer_at: Option<Instant>,
}

impl Player {
    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            name: self.name.clone(),
            score: self.score,
            streak: self.streak,
            correct_answers: self.correct_answers,
            is_host: self.is_host,
        }
    }

    /// Zeroes the per-game stats.
    pub(crate) fn reset_stats(&mut self) {
        self.score = 0;
        self.streak = 0;
        self.correct_answers = 0;
        self.last_answer_at = None;
    }
}

/// Why a player could not be added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddRejection {
    DuplicateName,
    RoomFull,
}

/// What removing a player did to the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Players remain. `new_host` is set when the removed player was
    /// the host and the role moved.
    RosterChanged { new_host: Option<PlayerId> },
    /// The last player left.
    RoomNowEmpty,
}

/// Persisted form of a [`Player`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub streak: u32,
    pub correct_answers: u32,
    pub is_host: bool,
}

/// A bounded, join-ordered collection of players.
#[derive(Debug, Clone)]
pub struct Roster {
    players: Vec<Player>,
    capacity: usize,
}

impl Roster {
    pub fn new(capacity: usize) -> Self {
        Self {
            players: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds a player at the end of the join order.
    ///
    /// The player becomes host if `host_candidate` is set or if the
    /// roster was empty; an existing host is never displaced.
    pub fn add_player(
        &mut self,
        name: &str,
        host_candidate: bool,
        now: Instant,
    ) -> Result<&Player, AddRejection> {
        let name = name.trim();
        if self.name_taken(name) {
            return Err(AddRejection::DuplicateName);
        }
        if self.players.len() >= self.capacity {
            return Err(AddRejection::RoomFull);
        }

        let is_host = self.players.is_empty()
            || (host_candidate && self.host().is_none());
        let player = Player {
            id: self.fresh_id(),
            name: name.to_string(),
            score: 0,
            streak: 0,
            correct_answers: 0,
            is_host,
            joined_at: now,
            last_answer_at: None,
        };
        self.players.push(player);
        Ok(&self.players[self.players.len() - 1])
    }

    /// Removes a player. Returns `None` if they weren't in the roster.
    ///
    /// If the host leaves, the earliest-joined remaining player becomes
    /// host before this returns.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Removal> {
        let index = self.players.iter().position(|p| p.id == id)?;
        let removed = self.players.remove(index);

        if self.players.is_empty() {
            return Some(Removal::RoomNowEmpty);
        }

        let new_host = if removed.is_host {
            let heir = &mut self.players[0];
            heir.is_host = true;
            Some(heir.id)
        } else {
            None
        };
        Some(Removal::RosterChanged { new_host })
    }

    pub fn find(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn find_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.find(id).is_some()
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    pub fn is_host(&self, id: PlayerId) -> bool {
        self.find(id).is_some_and(|p| p.is_host)
    }

    /// Players in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn views(&self) -> Vec<PlayerView> {
        self.players.iter().map(Player::view).collect()
    }

    pub fn records(&self) -> Vec<PlayerRecord> {
        self.players
            .iter()
            .map(|p| PlayerRecord {
                id: p.id,
                name: p.name.clone(),
                score: p.score,
                streak: p.streak,
                correct_answers: p.correct_answers,
                is_host: p.is_host,
            })
            .collect()
    }

    /// Rebuilds a roster from persisted records, preserving their order.
    ///
    /// Restored players share one `joined_at`; order is carried by
    /// position. Host flags are repaired if the record had zero or
    /// several hosts.
    pub fn restore(
        capacity: usize,
        records: Vec<PlayerRecord>,
        now: Instant,
    ) -> Self {
        let mut players: Vec<Player> = records
            .into_iter()
            .map(|r| Player {
                id: r.id,
                name: r.name,
                score: r.score,
                streak: r.streak,
                correct_answers: r.correct_answers,
                is_host: r.is_host,
                joined_at: now,
                last_answer_at: None,
            })
            .collect();

        let first_host = players.iter().position(|p| p.is_host).unwrap_or(0);
        for (i, p) in players.iter_mut().enumerate() {
            p.is_host = i == first_host;
        }

        Self {
            capacity: capacity.max(players.len()),
            players,
        }
    }

    fn name_taken(&self, name: &str) -> bool {
        self.players
            .iter()
            .any(|p| p.name.to_lowercase() == name.to_lowercase())
    }

    fn fresh_id(&self) -> PlayerId {
        let mut rng = rand::rng();
        loop {
            let id = PlayerId(rng.random_range(1..=MAX_WIRE_ID));
            if !self.contains(id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_with(names: &[&str]) -> Roster {
        let now = Instant::now();
        let mut roster = Roster::new(4);
        for name in names {
            roster.add_player(name, false, now).unwrap();
        }
        roster
    }

    fn host_count(roster: &Roster) -> usize {
        roster.iter().filter(|p| p.is_host).count()
    }

    #[test]
    fn test_first_player_becomes_host() {
        let roster = roster_with(&["Alice", "Bob"]);
        assert_eq!(roster.host().unwrap().name, "Alice");
        assert_eq!(host_count(&roster), 1);
    }

    #[test]
    fn test_host_candidate_does_not_displace_host() {
        let mut roster = roster_with(&["Alice"]);
        roster.add_player("Bob", true, Instant::now()).unwrap();
        assert_eq!(roster.host().unwrap().name, "Alice");
        assert_eq!(host_count(&roster), 1);
    }

    #[test]
    fn test_duplicate_name_rejected_case_insensitively() {
        let mut roster = roster_with(&["Alice"]);
        let result = roster.add_player("  alice ", false, Instant::now());
        assert_eq!(result.unwrap_err(), AddRejection::DuplicateName);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_name_is_trimmed() {
        let roster = roster_with(&["  Alice  "]);
        assert_eq!(roster.iter().next().unwrap().name, "Alice");
    }

    #[test]
    fn test_capacity_enforced() {
        let mut roster = roster_with(&["A", "B", "C", "D"]);
        let result = roster.add_player("E", false, Instant::now());
        assert_eq!(result.unwrap_err(), AddRejection::RoomFull);
        assert_eq!(roster.len(), 4);
    }

    #[test]
    fn test_ids_are_unique_and_wire_safe() {
        let roster = roster_with(&["A", "B", "C", "D"]);
        let mut ids: Vec<u64> = roster.iter().map(|p| p.id.0).collect();
        assert!(ids.iter().all(|id| *id >= 1 && *id <= MAX_WIRE_ID));
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_removing_host_promotes_earliest_joined() {
        let mut roster = roster_with(&["Alice", "Bob", "Carol"]);
        let alice = roster.host().unwrap().id;
        let bob = roster.iter().nth(1).unwrap().id;

        let removal = roster.remove_player(alice).unwrap();

        assert_eq!(removal, Removal::RosterChanged { new_host: Some(bob) });
        assert!(roster.is_host(bob));
        assert_eq!(host_count(&roster), 1);
    }

    #[test]
    fn test_removing_non_host_keeps_host() {
        let mut roster = roster_with(&["Alice", "Bob"]);
        let bob = roster.iter().nth(1).unwrap().id;

        let removal = roster.remove_player(bob).unwrap();

        assert_eq!(removal, Removal::RosterChanged { new_host: None });
        assert_eq!(roster.host().unwrap().name, "Alice");
    }

    #[test]
    fn test_removing_last_player_reports_empty() {
        let mut roster = roster_with(&["Alice"]);
        let alice = roster.host().unwrap().id;
        assert_eq!(roster.remove_player(alice), Some(Removal::RoomNowEmpty));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_removing_unknown_player_is_none() {
        let mut roster = roster_with(&["Alice"]);
        assert_eq!(roster.remove_player(PlayerId(0)), None);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_name_can_be_reused_after_leaving() {
        let mut roster = roster_with(&["Alice", "Bob"]);
        let bob = roster.iter().nth(1).unwrap().id;
        roster.remove_player(bob);
        assert!(roster.add_player("Bob", false, Instant::now()).is_ok());
    }

    #[test]
    fn test_restore_repairs_host_flags() {
        let records = vec![
            PlayerRecord {
                id: PlayerId(1),
                name: "A".into(),
                score: 10,
                streak: 1,
                correct_answers: 1,
                is_host: false,
            },
            PlayerRecord {
                id: PlayerId(2),
                name: "B".into(),
                score: 0,
                streak: 0,
                correct_answers: 0,
                is_host: false,
            },
        ];
        let roster = Roster::restore(4, records, Instant::now());
        assert_eq!(host_count(&roster), 1);
        assert!(roster.is_host(PlayerId(1)));
        assert_eq!(roster.find(PlayerId(1)).unwrap().score, 10);
    }
}
