mod in_memory;
mod sea_orm;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::engine::{
    display_multiplier, Chips, HistoryEntry, RoundId, RoundSummary, UserId, Wager, WagerId,
};

pub use self::in_memory::InMemoryRoundStore;
pub use self::sea_orm::SeaOrmRoundStore;

#[derive(Clone, Debug, PartialEq)]
pub struct RoundRecord {
    pub id: RoundId,
    pub crash_multiplier: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

impl From<&RoundSummary> for RoundRecord {
    fn from(summary: &RoundSummary) -> Self {
        Self {
            id: summary.round_id,
            crash_multiplier: summary.crash_multiplier,
            started_at: summary.started_at,
            ended_at: summary.ended_at,
        }
    }
}

impl RoundRecord {
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            round_id: self.id,
            crash_at: display_multiplier(self.crash_multiplier),
            ended_at: self.ended_at,
        }
    }
}

/// A wager in its terminal state: cashed (`cashed_out_at` set) or lost (`payout == 0`).
#[derive(Clone, Debug, PartialEq)]
pub struct BetRecord {
    pub id: WagerId,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub nick: String,
    pub amount: Chips,
    pub auto_cashout: Option<f64>,
    pub cashed_out_at: Option<f64>,
    pub payout: Chips,
    pub settled_at: DateTime<Utc>,
}

impl BetRecord {
    pub fn settled(wager: &Wager, settled_at: DateTime<Utc>) -> Self {
        Self {
            id: wager.id,
            round_id: wager.round_id,
            user_id: wager.user_id,
            nick: wager.display_name.clone(),
            amount: wager.amount,
            auto_cashout: wager.auto_cashout,
            cashed_out_at: wager.cashed_out_at(),
            payout: wager.payout(),
            settled_at,
        }
    }
}

/// Durable round and bet history. Failures are reported to the caller, which logs them;
/// they never reach the live round.
#[async_trait]
pub trait RoundStore: Send + Sync {
    async fn round_started(&self, round_id: RoundId, started_at: DateTime<Utc>)
        -> anyhow::Result<()>;
    async fn round_finished(&self, record: &RoundRecord) -> anyhow::Result<()>;
    async fn append_bet(&self, record: &BetRecord) -> anyhow::Result<()>;
    /// Finished rounds, newest first.
    async fn recent_rounds(&self, limit: usize) -> anyhow::Result<Vec<RoundRecord>>;
}

pub type SharedRoundStore = Arc<dyn RoundStore>;
