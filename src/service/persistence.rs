use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::RoundId;
use crate::store::{BetRecord, RoundRecord, RoundStore, SharedRoundStore};
use crate::tokio_tools::spawn_named_task;

const LOG_TARGET: &str = "crash_round::service::persistence";

#[derive(Clone, Debug, PartialEq)]
pub enum PersistJob {
    RoundStarted {
        round_id: RoundId,
        started_at: DateTime<Utc>,
    },
    RoundFinished(RoundRecord),
    Bet(BetRecord),
}

impl PersistJob {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistJob::RoundStarted { .. } => "round_started",
            PersistJob::RoundFinished(_) => "round_finished",
            PersistJob::Bet(_) => "bet",
        }
    }

    async fn apply(&self, store: &dyn RoundStore) -> anyhow::Result<()> {
        match self {
            PersistJob::RoundStarted {
                round_id,
                started_at,
            } => store.round_started(*round_id, *started_at).await,
            PersistJob::RoundFinished(record) => store.round_finished(record).await,
            PersistJob::Bet(record) => store.append_bet(record).await,
        }
    }
}

/// Queue in front of the round store. Submitting never blocks the caller.
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistJob>,
}

impl PersistenceHandle {
    pub fn submit(&self, job: PersistJob) {
        if let Err(err) = self.tx.send(job) {
            warn!(
                target: LOG_TARGET,
                job = err.0.kind(),
                "persistence worker stopped; record dropped"
            );
        }
    }
}

/// Spawns the worker that drains jobs in submission order. It exits once every
/// [`PersistenceHandle`] has been dropped and the queue is empty.
pub fn spawn_persistence_worker(store: SharedRoundStore) -> (PersistenceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = spawn_named_task("round-persistence", run_worker(store, rx));
    (PersistenceHandle { tx }, task)
}

async fn run_worker(store: SharedRoundStore, mut rx: mpsc::UnboundedReceiver<PersistJob>) {
    while let Some(job) = rx.recv().await {
        if let Err(err) = job.apply(store.as_ref()).await {
            error!(
                target: LOG_TARGET,
                job = job.kind(),
                error = ?err,
                "failed to persist record"
            );
        }
    }
    info!(target: LOG_TARGET, "persistence worker stopped");
}
