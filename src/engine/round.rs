use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::{display_multiplier, RoundId};

/// The active round. `crash_multiplier` is fixed at creation and only revealed at crash.
#[derive(Clone, Debug)]
pub struct Round {
    pub id: RoundId,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    crash_multiplier: f64,
    pub current_multiplier: f64,
}

impl Round {
    pub fn new(crash_multiplier: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: None,
            ended_at: None,
            crash_multiplier,
            current_multiplier: 1.0,
        }
    }

    pub fn crash_multiplier(&self) -> f64 {
        self.crash_multiplier
    }

    /// Raises the multiplier, never lowering it and never passing the crash point.
    pub fn advance_to(&mut self, multiplier: f64) {
        let bounded = multiplier.min(self.crash_multiplier);
        if bounded > self.current_multiplier {
            self.current_multiplier = bounded;
        }
    }

    pub fn has_crashed_at(&self, multiplier: f64) -> bool {
        multiplier >= self.crash_multiplier
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub round_id: RoundId,
    pub crash_at: f64,
    pub ended_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_round(round: &Round, ended_at: DateTime<Utc>) -> Self {
        Self {
            round_id: round.id,
            crash_at: display_multiplier(round.crash_multiplier),
            ended_at,
        }
    }
}

/// Bounded newest-first ring of finished rounds.
#[derive(Clone, Debug)]
pub struct RoundHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl RoundHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_is_monotonic_and_bounded_by_crash() {
        let mut round = Round::new(2.5);
        round.advance_to(1.7);
        round.advance_to(1.2);
        assert_eq!(round.current_multiplier, 1.7);
        round.advance_to(9.0);
        assert_eq!(round.current_multiplier, 2.5);
        assert!(round.has_crashed_at(2.5));
        assert!(!round.has_crashed_at(2.49));
    }

    #[test]
    fn history_keeps_newest_first_within_capacity() {
        let mut history = RoundHistory::new(3);
        let now = Utc::now();
        let rounds: Vec<Round> = (1..=5).map(|i| Round::new(i as f64)).collect();
        for round in &rounds {
            history.push(HistoryEntry::from_round(round, now));
        }
        let entries = history.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].round_id, rounds[4].id);
        assert_eq!(entries[2].round_id, rounds[2].id);
    }

    #[test]
    fn history_rounds_crash_for_display() {
        let round = Round::new(3.14159);
        let entry = HistoryEntry::from_round(&round, Utc::now());
        assert_eq!(entry.crash_at, 3.14);
    }
}
