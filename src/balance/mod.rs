mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::{BetRejection, Chips, UserId};

pub use in_memory::InMemoryBalanceStore;

pub const MAX_NICK_CHARS: usize = 24;
pub const DEFAULT_NICK: &str = "Guest";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Chips, requested: Chips },
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("balance would overflow")]
    Overflow,
    #[error("balance store unavailable: {0}")]
    Unavailable(String),
}

impl From<BalanceError> for BetRejection {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InsufficientFunds { .. } => BetRejection::InsufficientFunds,
            BalanceError::UnknownUser(_) => BetRejection::UnknownUser,
            BalanceError::Overflow | BalanceError::Unavailable(_) => BetRejection::Unavailable,
        }
    }
}

/// Authoritative user balances. Every call is atomic on its own; callers never assume a
/// read followed by a write is.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get_balance(&self, user_id: UserId) -> Result<Chips, BalanceError>;
    /// Removes `amount` and returns the new balance, or fails without touching it.
    async fn debit(&self, user_id: UserId, amount: Chips) -> Result<Chips, BalanceError>;
    async fn credit(&self, user_id: UserId, amount: Chips) -> Result<Chips, BalanceError>;
}

pub type SharedBalanceStore = Arc<dyn BalanceStore>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub user_id: UserId,
    pub nick: String,
}

/// Maps nicknames to accounts, opening a funded account on first sight.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn resolve(&self, nick: &str) -> Result<Account, BalanceError>;
}

pub type SharedAccountDirectory = Arc<dyn AccountDirectory>;

/// Trims a client-supplied nickname to at most [`MAX_NICK_CHARS`] characters.
pub fn normalize_nick(raw: &str) -> String {
    let trimmed: String = raw.trim().chars().take(MAX_NICK_CHARS).collect();
    let trimmed = trimmed.trim_end();
    if trimmed.is_empty() {
        DEFAULT_NICK.to_string()
    } else {
        trimmed.to_string()
    }
}
