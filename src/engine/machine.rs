use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info};

use super::errors::{BetRejection, ConfigError};
use super::events::{EngineEvent, PublicBet, RoundSnapshot, RoundSummary};
use super::ledger::{BetLedger, NewWager};
use super::round::{HistoryEntry, Round, RoundHistory};
use super::sampler::{CrashSampler, UniformSource};
use super::types::{chips_from_credits, display_multiplier, Chips, Phase, UserId};

const LOG_TARGET: &str = "crash_round::engine";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub house_edge: f64,
    pub max_multiplier: f64,
    /// Exponent per second of flight: `multiplier = exp(growth_rate * t)`.
    pub growth_rate: f64,
    pub bet_window: Duration,
    pub cooldown: Duration,
    pub tick_interval: Duration,
    pub history_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            house_edge: 0.99,
            max_multiplier: 50.0,
            growth_rate: 0.62,
            bet_window: Duration::from_millis(8_000),
            cooldown: Duration::from_millis(2_500),
            tick_interval: Duration::from_millis(100),
            history_len: 50,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.house_edge > 0.0 && self.house_edge <= 1.0) {
            return Err(ConfigError::HouseEdge(self.house_edge));
        }
        if !self.max_multiplier.is_finite() || self.max_multiplier < 1.0 {
            return Err(ConfigError::Cap(self.max_multiplier));
        }
        if !self.growth_rate.is_finite() || self.growth_rate <= 0.0 {
            return Err(ConfigError::GrowthRate(self.growth_rate));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Zero("tick interval"));
        }
        if self.history_len == 0 {
            return Err(ConfigError::Zero("history length"));
        }
        Ok(())
    }
}

/// A point in time as seen by the engine: a monotonic instant for phase arithmetic and the
/// wall-clock time stamped on records.
#[derive(Clone, Copy, Debug)]
pub struct Now {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

impl Now {
    pub fn capture() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub fn after(&self, elapsed: Duration) -> Self {
        let wall_delta = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            instant: self.instant + elapsed,
            wall: self.wall + wall_delta,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PhaseClock {
    Waiting { closes_at: Instant },
    Flying { since: Instant },
    Crashed { reopens_at: Instant },
}

impl PhaseClock {
    fn phase(&self) -> Phase {
        match self {
            PhaseClock::Waiting { .. } => Phase::Waiting,
            PhaseClock::Flying { .. } => Phase::Flying,
            PhaseClock::Crashed { .. } => Phase::Crashed,
        }
    }
}

/// A cashout priced against the live round but not yet applied to the ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct CashoutQuote {
    pub user_id: UserId,
    pub multiplier: f64,
    pub payout: Chips,
    pub auto: bool,
}

/// Round state machine: WAITING -> FLYING -> CRASHED -> WAITING.
///
/// Transitions happen only inside [`RoundEngine::finish_tick`], driven by deadlines the
/// engine owns.
/// Replacing the round replaces its deadline, so a finished round can never fire a
/// transition.
pub struct RoundEngine {
    config: EngineConfig,
    sampler: CrashSampler,
    round: Round,
    clock: PhaseClock,
    ledger: BetLedger,
    history: RoundHistory,
}

impl RoundEngine {
    pub fn new(
        config: EngineConfig,
        source: Box<dyn UniformSource>,
        now: Now,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut sampler = CrashSampler::new(config.house_edge, config.max_multiplier, source);
        let round = Round::new(sampler.sample());
        let clock = PhaseClock::Waiting {
            closes_at: now.instant + config.bet_window,
        };
        let history = RoundHistory::new(config.history_len);
        info!(target: LOG_TARGET, round_id = %round.id, "first round open for bets");
        Ok(Self {
            config,
            sampler,
            round,
            clock,
            ledger: BetLedger::new(),
            history,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.clock.phase()
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn ledger(&self) -> &BetLedger {
        &self.ledger
    }

    pub fn history(&self) -> &RoundHistory {
        &self.history
    }

    /// Seeds the history ring with already finished rounds, given newest first.
    pub fn restore_history(&mut self, entries: Vec<HistoryEntry>) {
        for entry in entries.into_iter().rev() {
            self.history.push(entry);
        }
    }

    /// Closed-form flight curve; late or irregular ticks land on the same value.
    pub fn multiplier_at(&self, elapsed: Duration) -> f64 {
        (self.config.growth_rate * elapsed.as_secs_f64()).exp().max(1.0)
    }

    /// Runs a whole tick with every due auto-cashout settled in place.
    #[cfg(test)]
    pub(crate) fn tick(&mut self, now: Now) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for quote in self.advance(now) {
            events.extend(self.commit_cashout(&quote));
        }
        events.extend(self.finish_tick(now));
        events
    }

    /// First half of a tick. While FLYING, moves the multiplier along the curve and quotes
    /// every wager whose auto-cashout threshold it has reached. Quotes are applied with
    /// [`RoundEngine::commit_cashout`] before [`RoundEngine::finish_tick`] runs the crash
    /// check, so a threshold reached on the crashing tick still wins.
    pub fn advance(&mut self, now: Now) -> Vec<CashoutQuote> {
        let PhaseClock::Flying { since } = self.clock else {
            return Vec::new();
        };
        let raw = self.multiplier_at(now.instant.saturating_duration_since(since));
        self.round.advance_to(raw);
        let current = self.round.current_multiplier;
        self.ledger
            .due_auto_cashouts(current)
            .into_iter()
            .filter_map(|user_id| self.quote_at(user_id, current, true))
            .collect()
    }

    /// Second half of a tick: phase transitions, the crash check and the multiplier delta.
    pub fn finish_tick(&mut self, now: Now) -> Vec<EngineEvent> {
        match self.clock {
            PhaseClock::Waiting { closes_at } if now.instant >= closes_at => self.take_off(now),
            PhaseClock::Flying { since } => self.fly(now, since),
            PhaseClock::Crashed { reopens_at } if now.instant >= reopens_at => {
                self.open_round(now)
            }
            PhaseClock::Waiting { .. } | PhaseClock::Crashed { .. } => Vec::new(),
        }
    }

    /// Validates a bet request without touching state and returns the normalised amount.
    /// Funds are checked separately by the balance store.
    pub fn check_bet(
        &self,
        user_id: &UserId,
        amount_credits: f64,
        auto_cashout: Option<f64>,
    ) -> Result<Chips, BetRejection> {
        let phase = self.phase();
        if phase != Phase::Waiting {
            return Err(BetRejection::WrongPhase(phase));
        }
        let amount = chips_from_credits(amount_credits)
            .ok_or(BetRejection::InvalidInput("amount must be a positive number"))?;
        if let Some(threshold) = auto_cashout {
            if !threshold.is_finite() || threshold < 1.0 {
                return Err(BetRejection::InvalidInput("auto cashout must be at least 1.0"));
            }
        }
        if self.ledger.contains(user_id) {
            return Err(BetRejection::DuplicateBet);
        }
        Ok(amount)
    }

    /// Records a wager whose stake has already been debited.
    pub fn record_bet(
        &mut self,
        user_id: UserId,
        display_name: String,
        amount: Chips,
        auto_cashout: Option<f64>,
    ) -> Result<Vec<EngineEvent>, BetRejection> {
        let phase = self.phase();
        if phase != Phase::Waiting {
            return Err(BetRejection::WrongPhase(phase));
        }
        if amount == 0 {
            return Err(BetRejection::InvalidInput("amount must be a positive number"));
        }
        let wager = self
            .ledger
            .insert(NewWager {
                round_id: self.round.id,
                user_id,
                display_name,
                amount,
                auto_cashout,
            })?
            .clone();
        debug!(
            target: LOG_TARGET,
            round_id = %wager.round_id,
            user_id = %wager.user_id,
            amount = wager.amount,
            "bet recorded"
        );
        Ok(vec![EngineEvent::BetPlaced { wager }])
    }

    /// Prices a manual cashout at the current multiplier without settling it. `None` for
    /// anything other than an open wager during FLYING.
    pub fn quote_cashout(&self, user_id: &UserId) -> Option<CashoutQuote> {
        if self.phase() != Phase::Flying {
            return None;
        }
        self.quote_at(*user_id, self.round.current_multiplier, false)
    }

    /// Settles a quoted cashout once its payout has been credited. A quote that no longer
    /// matches an open wager in flight is ignored.
    pub fn commit_cashout(&mut self, quote: &CashoutQuote) -> Vec<EngineEvent> {
        if self.phase() != Phase::Flying {
            return Vec::new();
        }
        match self.ledger.cash_out(&quote.user_id, quote.multiplier) {
            Some(wager) => vec![EngineEvent::CashedOut {
                wager,
                auto: quote.auto,
            }],
            None => Vec::new(),
        }
    }

    pub fn snapshot(&self, now: Instant) -> RoundSnapshot {
        let time_to_bet_ms = match self.clock {
            PhaseClock::Waiting { closes_at } => {
                closes_at.saturating_duration_since(now).as_millis() as u64
            }
            _ => 0,
        };
        let crash_at = match self.clock {
            PhaseClock::Crashed { .. } => Some(display_multiplier(self.round.crash_multiplier())),
            _ => None,
        };
        let mut live: Vec<PublicBet> = self.ledger.wagers().map(PublicBet::from_wager).collect();
        live.sort_by(|a, b| {
            b.amount
                .partial_cmp(&a.amount)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.nick.cmp(&b.nick))
        });
        RoundSnapshot {
            phase: self.phase(),
            round_id: self.round.id,
            multiplier: display_multiplier(self.round.current_multiplier),
            time_to_bet_ms,
            crash_at,
            history: self.history.entries(),
            live,
        }
    }

    fn take_off(&mut self, now: Now) -> Vec<EngineEvent> {
        self.round.started_at = Some(now.wall);
        self.clock = PhaseClock::Flying { since: now.instant };
        info!(
            target: LOG_TARGET,
            round_id = %self.round.id,
            bets = self.ledger.len(),
            "round started"
        );
        vec![
            EngineEvent::RoundStarted {
                round_id: self.round.id,
                started_at: now.wall,
            },
            EngineEvent::StateChanged(self.snapshot(now.instant)),
        ]
    }

    fn quote_at(&self, user_id: UserId, multiplier: f64, auto: bool) -> Option<CashoutQuote> {
        let payout = self.ledger.quote(&user_id, multiplier)?;
        Some(CashoutQuote {
            user_id,
            multiplier,
            payout,
            auto,
        })
    }

    fn fly(&mut self, now: Now, since: Instant) -> Vec<EngineEvent> {
        let raw = self.multiplier_at(now.instant.saturating_duration_since(since));
        self.round.advance_to(raw);
        if self.round.has_crashed_at(raw) {
            self.crash(now)
        } else {
            vec![EngineEvent::MultiplierTick {
                round_id: self.round.id,
                multiplier: self.round.current_multiplier,
            }]
        }
    }

    fn crash(&mut self, now: Now) -> Vec<EngineEvent> {
        let crash_multiplier = self.round.crash_multiplier();
        self.round.current_multiplier = crash_multiplier;
        self.round.ended_at = Some(now.wall);
        self.history
            .push(HistoryEntry::from_round(&self.round, now.wall));
        self.clock = PhaseClock::Crashed {
            reopens_at: now.instant + self.config.cooldown,
        };

        let mut events: Vec<EngineEvent> = self
            .ledger
            .settle_losses()
            .into_iter()
            .map(|wager| EngineEvent::BetLost { wager })
            .collect();
        info!(
            target: LOG_TARGET,
            round_id = %self.round.id,
            crash_multiplier,
            lost = events.len(),
            "round crashed"
        );
        events.push(EngineEvent::RoundCrashed {
            summary: RoundSummary {
                round_id: self.round.id,
                crash_multiplier,
                started_at: self.round.started_at,
                ended_at: now.wall,
            },
        });
        events.push(EngineEvent::StateChanged(self.snapshot(now.instant)));
        events
    }

    fn open_round(&mut self, now: Now) -> Vec<EngineEvent> {
        self.ledger.clear();
        self.round = Round::new(self.sampler.sample());
        self.clock = PhaseClock::Waiting {
            closes_at: now.instant + self.config.bet_window,
        };
        info!(target: LOG_TARGET, round_id = %self.round.id, "round open for bets");
        vec![
            EngineEvent::RoundOpened {
                round_id: self.round.id,
                bet_window: self.config.bet_window,
            },
            EngineEvent::StateChanged(self.snapshot(now.instant)),
        ]
    }
}
