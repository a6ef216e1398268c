use std::sync::Arc;

use tracing::debug;

use crate::engine::{display_multiplier, EngineEvent, UserId};
use crate::server::messages::{
    BetPayload, CashoutPayload, RoundCrashPayload, RoundOpenPayload, RoundStartPayload,
    ServerMessage, TickPayload,
};
use crate::store::{BetRecord, RoundRecord};

use super::persistence::{PersistJob, PersistenceHandle};

const LOG_TARGET: &str = "crash_round::service::dispatch";

/// Outbound transport. Implementations must not block; sends are fire-and-forget relative
/// to round state.
pub trait Broadcaster: Send + Sync {
    /// Reliable delivery to every connection.
    fn broadcast(&self, message: ServerMessage);
    /// Best-effort delivery. A newer delta replaces one that has not been written yet.
    fn publish_delta(&self, message: ServerMessage);
    /// Drops a delta that has not been written yet.
    fn clear_delta(&self);
    /// Reliable delivery to every connection bound to `user_id`.
    fn send_to_user(&self, user_id: &UserId, message: ServerMessage);
}

/// Turns engine events into outbound messages and persistence jobs.
pub struct Dispatcher {
    broadcaster: Arc<dyn Broadcaster>,
    persistence: PersistenceHandle,
}

impl Dispatcher {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, persistence: PersistenceHandle) -> Self {
        Self {
            broadcaster,
            persistence,
        }
    }

    pub fn send_to_user(&self, user_id: &UserId, message: ServerMessage) {
        self.broadcaster.send_to_user(user_id, message);
    }

    pub fn dispatch(&self, event: EngineEvent) {
        match event {
            EngineEvent::RoundOpened {
                round_id,
                bet_window,
            } => {
                self.broadcaster
                    .broadcast(ServerMessage::RoundOpen(RoundOpenPayload {
                        round_id,
                        bet_window_ms: bet_window.as_millis() as u64,
                    }));
            }
            EngineEvent::RoundStarted {
                round_id,
                started_at,
            } => {
                self.persistence.submit(PersistJob::RoundStarted {
                    round_id,
                    started_at,
                });
                self.broadcaster
                    .broadcast(ServerMessage::RoundStart(RoundStartPayload {
                        round_id,
                        started_at,
                    }));
            }
            EngineEvent::MultiplierTick {
                round_id,
                multiplier,
            } => {
                self.broadcaster.publish_delta(ServerMessage::Tick(TickPayload {
                    round_id,
                    multiplier: display_multiplier(multiplier),
                }));
            }
            EngineEvent::BetPlaced { wager } => {
                self.broadcaster
                    .broadcast(ServerMessage::Bet(BetPayload::from_wager(&wager)));
            }
            EngineEvent::CashedOut { wager, auto } => {
                self.persistence
                    .submit(PersistJob::Bet(BetRecord::settled(&wager, chrono::Utc::now())));
                self.broadcaster
                    .broadcast(ServerMessage::Cashout(CashoutPayload::from_wager(&wager, auto)));
            }
            EngineEvent::BetLost { wager } => {
                debug!(
                    target: LOG_TARGET,
                    round_id = %wager.round_id,
                    user_id = %wager.user_id,
                    amount = wager.amount,
                    "wager lost"
                );
                self.persistence
                    .submit(PersistJob::Bet(BetRecord::settled(&wager, chrono::Utc::now())));
            }
            EngineEvent::RoundCrashed { summary } => {
                let record = RoundRecord::from(&summary);
                // an unsent tick must not reach anyone after the crash
                self.broadcaster.clear_delta();
                self.broadcaster
                    .broadcast(ServerMessage::RoundCrash(RoundCrashPayload {
                        round_id: summary.round_id,
                        crash_at: display_multiplier(summary.crash_multiplier),
                    }));
                self.persistence.submit(PersistJob::RoundFinished(record));
            }
            EngineEvent::StateChanged(snapshot) => {
                self.broadcaster.clear_delta();
                self.broadcaster.broadcast(ServerMessage::State(snapshot));
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::test_support::{Delivery, RecordingBroadcaster};
    use super::*;
    use crate::engine::{RoundSummary, Wager, WagerStatus};
    use crate::service::persistence::spawn_persistence_worker;
    use crate::store::InMemoryRoundStore;

    fn cashed_wager() -> Wager {
        Wager {
            id: Uuid::new_v4(),
            round_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            display_name: "ada".into(),
            amount: 10_000,
            auto_cashout: None,
            status: WagerStatus::CashedOut {
                multiplier: 2.456,
                payout: 24_560,
            },
        }
    }

    #[tokio::test]
    async fn ticks_are_deltas_and_rounded() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (persistence, _task) = spawn_persistence_worker(Arc::new(InMemoryRoundStore::new()));
        let dispatcher = Dispatcher::new(broadcaster.clone(), persistence);
        let round_id = Uuid::new_v4();

        dispatcher.dispatch(EngineEvent::MultiplierTick {
            round_id,
            multiplier: 1.23456,
        });
        assert_eq!(
            broadcaster.deliveries(),
            vec![Delivery::Delta(ServerMessage::Tick(TickPayload {
                round_id,
                multiplier: 1.23
            }))]
        );
    }

    #[tokio::test]
    async fn settled_wagers_and_rounds_are_persisted() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let store = InMemoryRoundStore::new();
        let (persistence, task) = spawn_persistence_worker(Arc::new(store.clone()));
        let dispatcher = Dispatcher::new(broadcaster.clone(), persistence);

        let wager = cashed_wager();
        dispatcher.dispatch(EngineEvent::CashedOut {
            wager: wager.clone(),
            auto: false,
        });
        dispatcher.dispatch(EngineEvent::RoundCrashed {
            summary: RoundSummary {
                round_id: wager.round_id,
                crash_multiplier: 3.14159,
                started_at: None,
                ended_at: Utc::now(),
            },
        });
        dispatcher.dispatch(EngineEvent::RoundOpened {
            round_id: Uuid::new_v4(),
            bet_window: Duration::from_secs(8),
        });
        drop(dispatcher);
        task.await.unwrap();

        assert_eq!(broadcaster.kinds(), vec!["cashout", "roundCrash", "roundOpen"]);
        match &broadcaster.deliveries()[2] {
            Delivery::All(ServerMessage::RoundCrash(payload)) => assert_eq!(payload.crash_at, 3.14),
            other => panic!("unexpected delivery {other:?}"),
        }

        let bets = store.bets();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].payout, 24_560);
        assert_eq!(bets[0].cashed_out_at, Some(2.456));
        let rounds = store.rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].crash_multiplier, 3.14159);
    }

    #[tokio::test]
    async fn crash_and_state_clear_the_pending_tick_first() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (persistence, _task) = spawn_persistence_worker(Arc::new(InMemoryRoundStore::new()));
        let dispatcher = Dispatcher::new(broadcaster.clone(), persistence);
        let round_id = Uuid::new_v4();

        dispatcher.dispatch(EngineEvent::MultiplierTick {
            round_id,
            multiplier: 1.5,
        });
        dispatcher.dispatch(EngineEvent::RoundCrashed {
            summary: RoundSummary {
                round_id,
                crash_multiplier: 1.52,
                started_at: None,
                ended_at: Utc::now(),
            },
        });

        let deliveries = broadcaster.deliveries();
        assert_eq!(deliveries.len(), 3);
        assert!(matches!(deliveries[0], Delivery::Delta(_)));
        assert_eq!(deliveries[1], Delivery::DeltaCleared);
        assert!(matches!(deliveries[2], Delivery::All(ServerMessage::RoundCrash(_))));
    }
}
