use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Money in hundredths of a credit. All balance and payout math happens in this unit.
pub type Chips = u64;
pub type UserId = Uuid;
pub type RoundId = Uuid;
pub type WagerId = Uuid;

pub const CHIPS_PER_CREDIT: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    Flying,
    Crashed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Waiting => "WAITING",
            Phase::Flying => "FLYING",
            Phase::Crashed => "CRASHED",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts a client-supplied credit amount to chips, rounding to the nearest hundredth.
/// Returns `None` for non-finite, non-positive or sub-hundredth amounts.
pub fn chips_from_credits(credits: f64) -> Option<Chips> {
    if !credits.is_finite() || credits <= 0.0 {
        return None;
    }
    let scaled = (credits * CHIPS_PER_CREDIT as f64).round();
    if scaled < 1.0 || scaled >= u64::MAX as f64 {
        return None;
    }
    Some(scaled as Chips)
}

pub fn chips_to_credits(chips: Chips) -> f64 {
    chips as f64 / CHIPS_PER_CREDIT as f64
}

/// `floor(amount * multiplier)` in chips, i.e. the credit payout truncated to two decimals.
/// Truncation never rounds in the player's favour.
pub fn payout_for(amount: Chips, multiplier: f64) -> Chips {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return 0;
    }
    (amount as f64 * multiplier).floor() as Chips
}

/// Rounds a multiplier to two decimals for display only.
pub fn display_multiplier(multiplier: f64) -> f64 {
    (multiplier * 100.0).round() / 100.0
}
