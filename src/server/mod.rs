pub mod bootstrap;
pub mod error;
pub mod hub;
pub mod logging;
pub mod messages;
pub mod routes;
mod session;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::balance::{SharedAccountDirectory, SharedBalanceStore};
use crate::service::RoundHandle;

pub use bootstrap::{run_server, ServerConfig};
pub use hub::ConnectionHub;
pub use routes::CrashRoundServer;

/// Shared by every request handler and WebSocket session.
pub struct AppContext {
    pub rounds: RoundHandle,
    pub hub: Arc<ConnectionHub>,
    pub balances: SharedBalanceStore,
    pub directory: SharedAccountDirectory,
    /// Ping cadence; a connection that misses one ping is closed at the next.
    pub heartbeat: Duration,
    pub shutdown: CancellationToken,
}
