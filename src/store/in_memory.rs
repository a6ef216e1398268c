use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::engine::RoundId;

use super::{BetRecord, RoundRecord, RoundStore};

#[derive(Default)]
struct Inner {
    started: HashMap<RoundId, DateTime<Utc>>,
    rounds: Vec<RoundRecord>,
    bets: Vec<BetRecord>,
}

/// Keeps records for the lifetime of the process. Used when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryRoundStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl InMemoryRoundStore {
    pub(crate) fn rounds(&self) -> Vec<RoundRecord> {
        self.inner.read().rounds.clone()
    }

    pub(crate) fn bets(&self) -> Vec<BetRecord> {
        self.inner.read().bets.clone()
    }

    pub(crate) fn started_at(&self, round_id: &RoundId) -> Option<DateTime<Utc>> {
        self.inner.read().started.get(round_id).copied()
    }
}

#[async_trait]
impl RoundStore for InMemoryRoundStore {
    async fn round_started(
        &self,
        round_id: RoundId,
        started_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.inner.write().started.insert(round_id, started_at);
        Ok(())
    }

    async fn round_finished(&self, record: &RoundRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        inner.started.remove(&record.id);
        inner.rounds.push(record.clone());
        Ok(())
    }

    async fn append_bet(&self, record: &BetRecord) -> anyhow::Result<()> {
        self.inner.write().bets.push(record.clone());
        Ok(())
    }

    async fn recent_rounds(&self, limit: usize) -> anyhow::Result<Vec<RoundRecord>> {
        let inner = self.inner.read();
        Ok(inner.rounds.iter().rev().take(limit).cloned().collect())
    }
}
