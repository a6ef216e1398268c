use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::engine::{Chips, UserId};

use super::{normalize_nick, Account, AccountDirectory, BalanceError, BalanceStore};

const LOG_TARGET: &str = "crash_round::balance";

#[derive(Default)]
struct Inner {
    balances: HashMap<UserId, Chips>,
    // keyed by lower-cased nickname
    accounts: HashMap<String, Account>,
}

/// Process-local balances plus a nickname directory. Accounts live as long as the process.
#[derive(Clone)]
pub struct InMemoryBalanceStore {
    inner: Arc<RwLock<Inner>>,
    opening_balance: Chips,
}

impl InMemoryBalanceStore {
    pub fn new(opening_balance: Chips) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            opening_balance,
        }
    }

    /// Opens an account with an explicit balance, replacing any account under the same
    /// nickname.
    #[cfg(test)]
    pub(crate) fn open_account(&self, nick: &str, balance: Chips) -> Account {
        let nick = normalize_nick(nick);
        let account = Account {
            user_id: Uuid::new_v4(),
            nick: nick.clone(),
        };
        let mut inner = self.inner.write();
        inner.balances.insert(account.user_id, balance);
        inner.accounts.insert(nick.to_lowercase(), account.clone());
        account
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn get_balance(&self, user_id: UserId) -> Result<Chips, BalanceError> {
        self.inner
            .read()
            .balances
            .get(&user_id)
            .copied()
            .ok_or(BalanceError::UnknownUser(user_id))
    }

    async fn debit(&self, user_id: UserId, amount: Chips) -> Result<Chips, BalanceError> {
        let mut inner = self.inner.write();
        let balance = inner
            .balances
            .get_mut(&user_id)
            .ok_or(BalanceError::UnknownUser(user_id))?;
        if *balance < amount {
            return Err(BalanceError::InsufficientFunds {
                balance: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        Ok(*balance)
    }

    async fn credit(&self, user_id: UserId, amount: Chips) -> Result<Chips, BalanceError> {
        let mut inner = self.inner.write();
        let balance = inner
            .balances
            .get_mut(&user_id)
            .ok_or(BalanceError::UnknownUser(user_id))?;
        *balance = balance.checked_add(amount).ok_or(BalanceError::Overflow)?;
        Ok(*balance)
    }
}

#[async_trait]
impl AccountDirectory for InMemoryBalanceStore {
    async fn resolve(&self, nick: &str) -> Result<Account, BalanceError> {
        let nick = normalize_nick(nick);
        let key = nick.to_lowercase();
        if let Some(account) = self.inner.read().accounts.get(&key) {
            return Ok(account.clone());
        }

        let mut inner = self.inner.write();
        // another connection may have opened it between the two locks
        if let Some(account) = inner.accounts.get(&key) {
            return Ok(account.clone());
        }
        let account = Account {
            user_id: Uuid::new_v4(),
            nick,
        };
        inner.balances.insert(account.user_id, self.opening_balance);
        inner.accounts.insert(key, account.clone());
        info!(
            target: LOG_TARGET,
            user_id = %account.user_id,
            nick = %account.nick,
            balance = self.opening_balance,
            "account opened"
        );
        Ok(account)
    }
}
