use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ledger::Wager;
use super::round::HistoryEntry;
use super::types::{chips_to_credits, display_multiplier, Phase, RoundId, UserId};

/// Outcome of a state mutation. The engine never performs I/O; callers settle balances,
/// persist records and fan messages out after the mutation returns.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    RoundOpened {
        round_id: RoundId,
        bet_window: Duration,
    },
    RoundStarted {
        round_id: RoundId,
        started_at: DateTime<Utc>,
    },
    MultiplierTick {
        round_id: RoundId,
        multiplier: f64,
    },
    BetPlaced {
        wager: Wager,
    },
    CashedOut {
        wager: Wager,
        auto: bool,
    },
    BetLost {
        wager: Wager,
    },
    RoundCrashed {
        summary: RoundSummary,
    },
    StateChanged(RoundSnapshot),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub crash_multiplier: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

/// Full view of the round as shown to clients. Never carries the crash point before the
/// round has crashed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub phase: Phase,
    pub round_id: RoundId,
    pub multiplier: f64,
    pub time_to_bet_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_at: Option<f64>,
    pub history: Vec<HistoryEntry>,
    pub live: Vec<PublicBet>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicBet {
    pub user_id: UserId,
    pub nick: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto: Option<f64>,
    pub cashed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cashed_out_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<f64>,
}

impl PublicBet {
    pub fn from_wager(wager: &Wager) -> Self {
        let cashed_out_at = wager.cashed_out_at();
        Self {
            user_id: wager.user_id,
            nick: wager.display_name.clone(),
            amount: chips_to_credits(wager.amount),
            auto: wager.auto_cashout,
            cashed: cashed_out_at.is_some(),
            cashed_out_at: cashed_out_at.map(display_multiplier),
            payout: cashed_out_at.map(|_| chips_to_credits(wager.payout())),
        }
    }
}
