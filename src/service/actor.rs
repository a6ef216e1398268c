use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::balance::{Account, BalanceError, SharedBalanceStore};
use crate::engine::{BetRejection, CashoutQuote, Chips, EngineEvent, Now, RoundEngine, UserId};
use crate::server::messages::ServerMessage;
use crate::tokio_tools::skipping_interval;

use super::dispatch::Dispatcher;
use super::{BetReceipt, CashoutReceipt, RoundCommand};

const LOG_TARGET: &str = "crash_round::service::actor";

/// Sole owner of the round engine. Ticks and player commands are applied one at a time, and
/// balance calls complete before the next mutation starts.
pub(super) struct RoundActor {
    engine: RoundEngine,
    balances: SharedBalanceStore,
    dispatcher: Dispatcher,
    inbox: mpsc::Receiver<RoundCommand>,
    shutdown: CancellationToken,
}

impl RoundActor {
    pub(super) fn new(
        engine: RoundEngine,
        balances: SharedBalanceStore,
        dispatcher: Dispatcher,
        inbox: mpsc::Receiver<RoundCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            balances,
            dispatcher,
            inbox,
            shutdown,
        }
    }

    pub(super) async fn run(mut self) {
        let mut ticker = skipping_interval(self.engine.config().tick_interval);
        info!(
            target: LOG_TARGET,
            round_id = %self.engine.round().id,
            "round actor started"
        );
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick(Now::capture()).await,
                command = self.inbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        info!(target: LOG_TARGET, "round actor stopped");
    }

    /// Auto-cashouts are credited and settled before the crash check runs. One whose credit
    /// fails stays open and is retried on the next tick.
    async fn tick(&mut self, now: Now) {
        for quote in self.engine.advance(now) {
            let _ = self.settle_cashout(quote).await;
        }
        let events = self.engine.finish_tick(now);
        self.publish(events);
    }

    async fn handle(&mut self, command: RoundCommand) {
        match command {
            RoundCommand::PlaceBet {
                account,
                amount,
                auto_cashout,
                reply,
            } => {
                let result = self.place_bet(account, amount, auto_cashout).await;
                let _ = reply.send(result);
            }
            RoundCommand::CashOut { user_id, reply } => {
                let result = self.cash_out(user_id).await;
                let _ = reply.send(result);
            }
            RoundCommand::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot(Instant::now()));
            }
            RoundCommand::History { reply } => {
                let _ = reply.send(self.engine.history().entries());
            }
        }
    }

    async fn place_bet(
        &mut self,
        account: Account,
        amount: f64,
        auto_cashout: Option<f64>,
    ) -> Result<BetReceipt, BetRejection> {
        let user_id = account.user_id;
        let chips = self
            .engine
            .check_bet(&user_id, amount, auto_cashout)
            .map_err(|rejection| log_rejection(&user_id, rejection))?;

        let balance = match self.balances.debit(user_id, chips).await {
            Ok(balance) => balance,
            Err(err @ BalanceError::InsufficientFunds { .. }) => {
                return Err(log_rejection(&user_id, err.into()));
            }
            Err(err) => {
                error!(target: LOG_TARGET, user_id = %user_id, error = %err, "debit failed");
                return Err(err.into());
            }
        };

        self.record_or_refund(account, chips, auto_cashout, balance).await
    }

    /// Records a bet whose stake is already debited. If the ledger refuses it, the stake is
    /// credited back.
    async fn record_or_refund(
        &mut self,
        account: Account,
        chips: Chips,
        auto_cashout: Option<f64>,
        balance: Chips,
    ) -> Result<BetReceipt, BetRejection> {
        let user_id = account.user_id;
        let events = match self
            .engine
            .record_bet(user_id, account.nick, chips, auto_cashout)
        {
            Ok(events) => events,
            Err(rejection) => {
                refund(&self.balances, &self.dispatcher, &user_id, chips).await;
                return Err(log_rejection(&user_id, rejection));
            }
        };

        self.dispatcher
            .send_to_user(&user_id, ServerMessage::balance(balance));
        self.publish(events);
        Ok(BetReceipt {
            round_id: self.engine.round().id,
            amount: chips,
            balance,
        })
    }

    async fn cash_out(&mut self, user_id: UserId) -> Result<Option<CashoutReceipt>, BetRejection> {
        let Some(quote) = self.engine.quote_cashout(&user_id) else {
            debug!(target: LOG_TARGET, user_id = %user_id, "nothing to cash out");
            return Ok(None);
        };
        match self.settle_cashout(quote).await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(err) => Err(err.into()),
        }
    }

    /// Credits the quoted payout and only then marks the wager cashed. A failed credit
    /// leaves the wager open and publishes nothing.
    async fn settle_cashout(
        &mut self,
        quote: CashoutQuote,
    ) -> Result<CashoutReceipt, BalanceError> {
        let balance = match self.balances.credit(quote.user_id, quote.payout).await {
            Ok(balance) => balance,
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    round_id = %self.engine.round().id,
                    user_id = %quote.user_id,
                    payout = quote.payout,
                    auto = quote.auto,
                    error = %err,
                    "failed to credit payout; wager stays open"
                );
                return Err(err);
            }
        };

        let events = self.engine.commit_cashout(&quote);
        info!(
            target: LOG_TARGET,
            round_id = %self.engine.round().id,
            user_id = %quote.user_id,
            multiplier = quote.multiplier,
            payout = quote.payout,
            auto = quote.auto,
            "wager cashed out"
        );
        self.publish(events);
        self.dispatcher
            .send_to_user(&quote.user_id, ServerMessage::balance(balance));
        Ok(CashoutReceipt {
            multiplier: quote.multiplier,
            payout: quote.payout,
        })
    }

    fn publish(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.dispatcher.dispatch(event);
        }
    }
}

async fn refund(
    balances: &SharedBalanceStore,
    dispatcher: &Dispatcher,
    user_id: &UserId,
    amount: Chips,
) {
    match balances.credit(*user_id, amount).await {
        Ok(balance) => {
            warn!(target: LOG_TARGET, user_id = %user_id, amount, "bet rolled back");
            dispatcher.send_to_user(user_id, ServerMessage::balance(balance));
        }
        Err(err) => {
            error!(
                target: LOG_TARGET,
                user_id = %user_id,
                amount,
                error = %err,
                "failed to roll back debit"
            );
        }
    }
}

fn log_rejection(user_id: &UserId, rejection: BetRejection) -> BetRejection {
    warn!(
        target: LOG_TARGET,
        user_id = %user_id,
        code = rejection.code(),
        reason = %rejection,
        "bet rejected"
    );
    rejection
}
