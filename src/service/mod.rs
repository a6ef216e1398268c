mod actor;
pub mod dispatch;
pub mod persistence;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::balance::{Account, SharedBalanceStore};
use crate::engine::{
    BetRejection, Chips, ConfigError, EngineConfig, HistoryEntry, Now, RoundEngine, RoundId,
    RoundSnapshot, UniformSource, UserId,
};
use crate::store::SharedRoundStore;
use crate::tokio_tools::spawn_named_task;

pub use dispatch::{Broadcaster, Dispatcher};
pub use persistence::{spawn_persistence_worker, PersistJob, PersistenceHandle};

use self::actor::RoundActor;

const LOG_TARGET: &str = "crash_round::service";
const DEFAULT_COMMAND_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("round service is not running")]
    Stopped,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetReceipt {
    pub round_id: RoundId,
    pub amount: Chips,
    pub balance: Chips,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CashoutReceipt {
    pub multiplier: f64,
    pub payout: Chips,
}

pub(crate) enum RoundCommand {
    PlaceBet {
        account: Account,
        amount: f64,
        auto_cashout: Option<f64>,
        reply: oneshot::Sender<Result<BetReceipt, BetRejection>>,
    },
    CashOut {
        user_id: UserId,
        reply: oneshot::Sender<Result<Option<CashoutReceipt>, BetRejection>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoundSnapshot>,
    },
    History {
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
}

/// Cloneable entry point to the round actor. Every call is applied in the actor's serialized
/// context, in arrival order.
#[derive(Clone)]
pub struct RoundHandle {
    commands: mpsc::Sender<RoundCommand>,
}

impl RoundHandle {
    pub async fn place_bet(
        &self,
        account: Account,
        amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<BetReceipt, BetRejection> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoundCommand::PlaceBet {
                account,
                amount,
                auto_cashout,
                reply,
            })
            .await
            .map_err(|_| BetRejection::Unavailable)?;
        rx.await.map_err(|_| BetRejection::Unavailable)?
    }

    /// Cashes the user's open wager. `Ok(None)` means there was nothing to cash. When the
    /// payout cannot be credited the wager stays open and the error is returned.
    pub async fn cash_out(&self, user_id: UserId) -> Result<Option<CashoutReceipt>, BetRejection> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoundCommand::CashOut { user_id, reply })
            .await
            .map_err(|_| BetRejection::Unavailable)?;
        rx.await.map_err(|_| BetRejection::Unavailable)?
    }

    pub async fn snapshot(&self) -> Result<RoundSnapshot, ServiceError> {
        self.request(|reply| RoundCommand::Snapshot { reply }).await
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ServiceError> {
        self.request(|reply| RoundCommand::History { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoundCommand,
    ) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }
}

pub struct RoundServiceConfig {
    pub engine: EngineConfig,
    pub source: Box<dyn UniformSource>,
    pub balances: SharedBalanceStore,
    pub store: SharedRoundStore,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub command_capacity: usize,
}

impl RoundServiceConfig {
    pub fn new(
        engine: EngineConfig,
        source: Box<dyn UniformSource>,
        balances: SharedBalanceStore,
        store: SharedRoundStore,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            engine,
            source,
            balances,
            store,
            broadcaster,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

/// The running round engine: its handle plus the tasks backing it.
pub struct RoundService {
    handle: RoundHandle,
    actor: JoinHandle<()>,
    persistence: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl RoundService {
    /// Validates the configuration, restores recent history from the store and starts the
    /// actor and persistence worker.
    pub async fn spawn(
        config: RoundServiceConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, ServiceError> {
        let RoundServiceConfig {
            engine: engine_config,
            source,
            balances,
            store,
            broadcaster,
            command_capacity,
        } = config;

        let history_len = engine_config.history_len;
        let mut engine = RoundEngine::new(engine_config, source, Now::capture())?;
        match store.recent_rounds(history_len).await {
            Ok(records) => {
                let restored = records.len();
                engine.restore_history(records.iter().map(|r| r.history_entry()).collect());
                info!(target: LOG_TARGET, restored, "round history restored");
            }
            Err(err) => {
                error!(target: LOG_TARGET, error = ?err, "failed to load round history");
            }
        }

        let (persistence, persistence_task) = spawn_persistence_worker(store);
        let dispatcher = Dispatcher::new(broadcaster, persistence);
        let (commands, inbox) = mpsc::channel(command_capacity.max(1));
        let actor = RoundActor::new(engine, balances, dispatcher, inbox, shutdown.clone());
        let actor = spawn_named_task("round-actor", actor.run());

        Ok(Self {
            handle: RoundHandle { commands },
            actor,
            persistence: persistence_task,
            shutdown,
        })
    }

    pub fn handle(&self) -> RoundHandle {
        self.handle.clone()
    }

    /// Cancels the actor and waits for queued records to be written.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        drop(self.handle);
        if let Err(err) = self.actor.await {
            error!(target: LOG_TARGET, error = %err, "round actor panicked");
        }
        if let Err(err) = self.persistence.await {
            error!(target: LOG_TARGET, error = %err, "persistence worker panicked");
        }
    }
}
