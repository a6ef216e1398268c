use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use super::errors::BetRejection;
use super::types::{payout_for, Chips, Phase, RoundId, UserId, WagerId};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WagerStatus {
    Open,
    CashedOut { multiplier: f64, payout: Chips },
    Lost,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Wager {
    pub id: WagerId,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub display_name: String,
    pub amount: Chips,
    pub auto_cashout: Option<f64>,
    pub status: WagerStatus,
}

impl Wager {
    pub fn is_open(&self) -> bool {
        matches!(self.status, WagerStatus::Open)
    }

    pub fn cashed_out_at(&self) -> Option<f64> {
        match self.status {
            WagerStatus::CashedOut { multiplier, .. } => Some(multiplier),
            _ => None,
        }
    }

    pub fn payout(&self) -> Chips {
        match self.status {
            WagerStatus::CashedOut { payout, .. } => payout,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewWager {
    pub round_id: RoundId,
    pub user_id: UserId,
    pub display_name: String,
    pub amount: Chips,
    pub auto_cashout: Option<f64>,
}

/// Open wagers of the active round, at most one per user.
#[derive(Debug, Default)]
pub struct BetLedger {
    wagers: HashMap<UserId, Wager>,
    settled: bool,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.wagers.contains_key(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Wager> {
        self.wagers.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.wagers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wagers.is_empty()
    }

    pub fn insert(&mut self, new: NewWager) -> Result<&Wager, BetRejection> {
        if self.settled {
            return Err(BetRejection::WrongPhase(Phase::Crashed));
        }
        if self.wagers.contains_key(&new.user_id) {
            return Err(BetRejection::DuplicateBet);
        }
        let user_id = new.user_id;
        let wager = Wager {
            id: Uuid::new_v4(),
            round_id: new.round_id,
            user_id,
            display_name: new.display_name,
            amount: new.amount,
            auto_cashout: new.auto_cashout,
            status: WagerStatus::Open,
        };
        Ok(self.wagers.entry(user_id).or_insert(wager))
    }

    /// What the user's open wager would pay at `multiplier`, without settling it.
    pub fn quote(&self, user_id: &UserId, multiplier: f64) -> Option<Chips> {
        if self.settled {
            return None;
        }
        self.wagers
            .get(user_id)
            .filter(|wager| wager.is_open())
            .map(|wager| payout_for(wager.amount, multiplier))
    }

    /// Marks the user's open wager as cashed at `multiplier`. Returns `None` when there is
    /// nothing to cash, which callers treat as a no-op.
    pub fn cash_out(&mut self, user_id: &UserId, multiplier: f64) -> Option<Wager> {
        let payout = self.quote(user_id, multiplier)?;
        let wager = self.wagers.get_mut(user_id)?;
        wager.status = WagerStatus::CashedOut { multiplier, payout };
        Some(wager.clone())
    }

    /// Users whose auto-cashout threshold has been reached at `multiplier`.
    pub fn due_auto_cashouts(&self, multiplier: f64) -> Vec<UserId> {
        let mut due: Vec<&Wager> = self
            .wagers
            .values()
            .filter(|w| w.is_open())
            .filter(|w| matches!(w.auto_cashout, Some(threshold) if threshold <= multiplier))
            .collect();
        due.sort_by(|a, b| {
            a.auto_cashout
                .partial_cmp(&b.auto_cashout)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        due.into_iter().map(|w| w.user_id).collect()
    }

    /// Settles every still-open wager as a loss. Runs once per round; later calls return
    /// nothing.
    pub fn settle_losses(&mut self) -> Vec<Wager> {
        if self.settled {
            return Vec::new();
        }
        self.settled = true;
        let mut lost = Vec::new();
        for wager in self.wagers.values_mut() {
            if wager.is_open() {
                wager.status = WagerStatus::Lost;
                lost.push(wager.clone());
            }
        }
        lost
    }

    pub fn wagers(&self) -> impl Iterator<Item = &Wager> {
        self.wagers.values()
    }

    pub fn clear(&mut self) {
        self.wagers.clear();
        self.settled = false;
    }
}
