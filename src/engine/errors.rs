use thiserror::Error;

use super::types::Phase;

/// Why a player action was refused. Rejections never change round or balance state and are
/// reported to the originating connection only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetRejection {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("bets are not accepted while {0}")]
    WrongPhase(Phase),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("a bet is already open for this round")]
    DuplicateBet,
    #[error("connection is not bound to a user")]
    UnknownUser,
    #[error("balance store unavailable")]
    Unavailable,
}

impl BetRejection {
    pub fn code(&self) -> &'static str {
        match self {
            BetRejection::InvalidInput(_) => "invalid_input",
            BetRejection::WrongPhase(_) => "wrong_phase",
            BetRejection::InsufficientFunds => "insufficient_funds",
            BetRejection::DuplicateBet => "duplicate_bet",
            BetRejection::UnknownUser => "unknown_user",
            BetRejection::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("house edge must be in (0, 1], got {0}")]
    HouseEdge(f64),
    #[error("multiplier cap must be finite and >= 1, got {0}")]
    Cap(f64),
    #[error("growth rate must be finite and positive, got {0}")]
    GrowthRate(f64),
    #[error("{0} must be non-zero")]
    Zero(&'static str),
}
