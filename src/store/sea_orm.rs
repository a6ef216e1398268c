use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::debug;

use crate::db::entity::{bets, rounds};
use crate::engine::RoundId;

use super::{BetRecord, RoundRecord, RoundStore};

const LOG_TARGET: &str = "crash_round::store::sea_orm";

pub struct SeaOrmRoundStore {
    connection: DatabaseConnection,
}

impl SeaOrmRoundStore {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

fn chips_to_column(value: u64, field: &str) -> anyhow::Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{field} {value} exceeds i64::MAX"))
}

fn record_from_model(model: rounds::Model) -> Option<RoundRecord> {
    Some(RoundRecord {
        id: model.id,
        crash_multiplier: model.crash_multiplier?,
        started_at: model.started_at,
        ended_at: model.ended_at?,
    })
}

#[async_trait]
impl RoundStore for SeaOrmRoundStore {
    async fn round_started(
        &self,
        round_id: RoundId,
        started_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let active = rounds::ActiveModel {
            id: Set(round_id),
            started_at: Set(Some(started_at)),
            crash_multiplier: Set(None),
            ended_at: Set(None),
        };
        rounds::Entity::insert(active)
            .on_conflict(
                OnConflict::column(rounds::Column::Id)
                    .update_column(rounds::Column::StartedAt)
                    .to_owned(),
            )
            .exec_without_returning(&self.connection)
            .await
            .context("failed to persist round start")?;
        debug!(target: LOG_TARGET, round_id = %round_id, "round start persisted");
        Ok(())
    }

    async fn round_finished(&self, record: &RoundRecord) -> anyhow::Result<()> {
        // upsert so a lost start row does not lose the outcome
        let active = rounds::ActiveModel {
            id: Set(record.id),
            started_at: Set(record.started_at),
            crash_multiplier: Set(Some(record.crash_multiplier)),
            ended_at: Set(Some(record.ended_at)),
        };
        rounds::Entity::insert(active)
            .on_conflict(
                OnConflict::column(rounds::Column::Id)
                    .update_columns([rounds::Column::CrashMultiplier, rounds::Column::EndedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.connection)
            .await
            .context("failed to persist round outcome")?;
        debug!(target: LOG_TARGET, round_id = %record.id, "round outcome persisted");
        Ok(())
    }

    async fn append_bet(&self, record: &BetRecord) -> anyhow::Result<()> {
        let active = bets::ActiveModel {
            id: Set(record.id),
            round_id: Set(record.round_id),
            user_id: Set(record.user_id),
            nick: Set(record.nick.clone()),
            amount: Set(chips_to_column(record.amount, "amount")?),
            auto_cashout: Set(record.auto_cashout),
            cashed_out_at: Set(record.cashed_out_at),
            payout: Set(chips_to_column(record.payout, "payout")?),
            settled_at: Set(record.settled_at),
        };
        bets::Entity::insert(active)
            .exec_without_returning(&self.connection)
            .await
            .context("failed to persist bet record")?;
        Ok(())
    }

    async fn recent_rounds(&self, limit: usize) -> anyhow::Result<Vec<RoundRecord>> {
        let rows = rounds::Entity::find()
            .filter(rounds::Column::EndedAt.is_not_null())
            .filter(rounds::Column::CrashMultiplier.is_not_null())
            .order_by_desc(rounds::Column::EndedAt)
            .limit(limit as u64)
            .all(&self.connection)
            .await
            .context("failed to load recent rounds")?;
        Ok(rows.into_iter().filter_map(record_from_model).collect())
    }
}
