use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::balance::Account;
use crate::engine::{chips_to_credits, BetRejection};
use crate::tokio_tools::{skipping_interval, spawn_named_task};

use super::hub::ConnectionId;
use super::messages::{ClientMessage, ServerMessage, WelcomePayload, WelcomeUser};
use super::AppContext;

const LOG_TARGET: &str = "crash_round::server::session";

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(ctx): Extension<Arc<AppContext>>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, ctx))
}

/// Drives one WebSocket connection until the peer leaves, the heartbeat lapses or the
/// server shuts down. The first frame written is always the full round snapshot.
async fn run_session(socket: WebSocket, ctx: Arc<AppContext>) {
    let registration = ctx.hub.register();
    let id = registration.id;

    // registered first so nothing published after the snapshot is missed
    let snapshot = match ctx.rounds.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(target: LOG_TARGET, connection_id = id, error = %err, "round service unavailable");
            ctx.hub.unregister(id);
            return;
        }
    };

    let (sink, mut stream) = socket.split();
    let alive = Arc::new(AtomicBool::new(true));
    let mut writer = spawn_named_task(
        format!("ws-writer-{id}"),
        write_loop(
            sink,
            ServerMessage::State(snapshot),
            registration.outbound,
            registration.deltas,
            ctx.heartbeat,
            Arc::clone(&alive),
        ),
    );
    info!(target: LOG_TARGET, connection_id = id, connections = ctx.hub.len(), "client connected");

    let mut session = Session::new(id, &ctx);
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Pong(_))) => alive.store(true, Ordering::Relaxed),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(target: LOG_TARGET, connection_id = id, error = %err, "socket error");
                    break;
                }
            },
        }
    }

    ctx.hub.unregister(id);
    writer.abort();
    info!(target: LOG_TARGET, connection_id = id, "client disconnected");
}

/// Every frame write is bounded by the heartbeat interval, so a peer that stops reading is
/// closed rather than stalling the writer.
async fn write_loop<S>(
    mut sink: S,
    first: ServerMessage,
    mut outbound: mpsc::Receiver<ServerMessage>,
    mut deltas: watch::Receiver<Option<ServerMessage>>,
    heartbeat: Duration,
    alive: Arc<AtomicBool>,
) where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    if !send_message(&mut sink, &first, heartbeat).await {
        return;
    }
    let mut ping = skipping_interval(heartbeat);
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => {
                    if !send_message(&mut sink, &message, heartbeat).await {
                        break;
                    }
                }
                None => break,
            },
            changed = deltas.changed() => {
                if changed.is_err() {
                    break;
                }
                let delta = deltas.borrow_and_update().clone();
                if let Some(delta) = delta {
                    if !send_message(&mut sink, &delta, heartbeat).await {
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if !alive.swap(false, Ordering::Relaxed) {
                    info!(target: LOG_TARGET, "heartbeat missed; closing connection");
                    send_frame(&mut sink, Message::Close(None), heartbeat).await;
                    break;
                }
                if !send_frame(&mut sink, Message::Ping(Vec::new()), heartbeat).await {
                    break;
                }
            }
        }
    }
}

async fn send_message<S>(sink: &mut S, message: &ServerMessage, limit: Duration) -> bool
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match message.to_json() {
        Ok(text) => send_frame(sink, Message::Text(text), limit).await,
        Err(err) => {
            error!(target: LOG_TARGET, kind = message.kind(), error = %err, "failed to encode message");
            true
        }
    }
}

/// Returns false once the connection should be closed.
async fn send_frame<S>(sink: &mut S, frame: Message, limit: Duration) -> bool
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match timeout(limit, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(target: LOG_TARGET, error = %err, "socket write failed");
            false
        }
        Err(_) => {
            warn!(target: LOG_TARGET, timeout_ms = limit.as_millis() as u64, "socket write timed out");
            false
        }
    }
}

/// Inbound half of a connection: which account it speaks for and how its frames map onto
/// round commands. Replies go through the hub so they queue behind earlier messages.
struct Session<'a> {
    id: ConnectionId,
    ctx: &'a AppContext,
    account: Option<Account>,
}

impl<'a> Session<'a> {
    fn new(id: ConnectionId, ctx: &'a AppContext) -> Self {
        Self {
            id,
            ctx,
            account: None,
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(target: LOG_TARGET, connection_id = self.id, error = %err, "dropping inbound message");
                return;
            }
        };
        match message {
            ClientMessage::Hello { nick } => self.hello(&nick).await,
            ClientMessage::PlaceBet { amount, auto } => self.place_bet(amount, auto).await,
            ClientMessage::Cashout => self.cash_out().await,
        }
    }

    async fn hello(&mut self, nick: &str) {
        let account = match self.ctx.directory.resolve(nick).await {
            Ok(account) => account,
            Err(err) => {
                error!(target: LOG_TARGET, connection_id = self.id, error = %err, "account lookup failed");
                self.reject(err.into());
                return;
            }
        };
        let balance = match self.ctx.balances.get_balance(account.user_id).await {
            Ok(balance) => balance,
            Err(err) => {
                error!(target: LOG_TARGET, user_id = %account.user_id, error = %err, "balance lookup failed");
                self.reject(err.into());
                return;
            }
        };
        let history = match self.ctx.rounds.history().await {
            Ok(history) => history,
            Err(err) => {
                warn!(target: LOG_TARGET, connection_id = self.id, error = %err, "history unavailable");
                Vec::new()
            }
        };

        self.ctx.hub.bind_user(self.id, account.user_id);
        self.send(ServerMessage::Welcome(WelcomePayload {
            user: WelcomeUser {
                id: account.user_id,
                nick: account.nick.clone(),
                balance: chips_to_credits(balance),
            },
            history,
        }));
        self.send(ServerMessage::balance(balance));
        info!(
            target: LOG_TARGET,
            connection_id = self.id,
            user_id = %account.user_id,
            nick = %account.nick,
            "player joined"
        );
        self.account = Some(account);
    }

    async fn place_bet(&mut self, amount: f64, auto: Option<f64>) {
        let Some(account) = self.account.clone() else {
            self.reject(BetRejection::UnknownUser);
            return;
        };
        if let Err(rejection) = self.ctx.rounds.place_bet(account, amount, auto).await {
            self.reject(rejection);
        }
    }

    async fn cash_out(&mut self) {
        let Some(account) = &self.account else {
            self.reject(BetRejection::UnknownUser);
            return;
        };
        if let Err(rejection) = self.ctx.rounds.cash_out(account.user_id).await {
            warn!(target: LOG_TARGET, user_id = %account.user_id, code = rejection.code(), "cashout not processed");
            self.reject(rejection);
        }
    }

    fn reject(&self, rejection: BetRejection) {
        self.send(ServerMessage::error(rejection.code(), rejection.to_string()));
    }

    fn send(&self, message: ServerMessage) {
        if !self.ctx.hub.send_to(self.id, message) {
            debug!(target: LOG_TARGET, connection_id = self.id, "connection already closed");
        }
    }
}
