use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crash_round::engine::{chips_from_credits, EngineConfig, EntropySource};
use crash_round::server::{run_server, ServerConfig};

const LOG_TARGET: &str = "crash_round::bin::crash_server";
const DEFAULT_BIND: &str = "127.0.0.1:3000";

#[derive(Debug, Parser)]
#[command(name = "crash_server")]
#[command(about = "Run the multiplayer crash round server", long_about = None)]
struct Args {
    /// Address to bind the HTTP/WebSocket server to (host:port)
    #[arg(long, env = "SERVER_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// SeaORM-compatible Postgres URL; records stay in memory when unset
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Numerator of the crash distribution, in (0, 1]
    #[arg(long, env = "HOUSE_EDGE", default_value_t = 0.99)]
    house_edge: f64,

    /// Highest multiplier a round can reach
    #[arg(long, env = "MAX_MULTIPLIER", default_value_t = 50.0)]
    max_multiplier: f64,

    /// Per-second exponent of the flight curve
    #[arg(long, env = "GROWTH_RATE", default_value_t = 0.62)]
    growth_rate: f64,

    #[arg(long, env = "BET_WINDOW_MS", default_value_t = 8_000)]
    bet_window_ms: u64,

    #[arg(long, env = "ROUND_COOLDOWN_MS", default_value_t = 2_500)]
    cooldown_ms: u64,

    #[arg(long, env = "TICK_MS", default_value_t = 100)]
    tick_ms: u64,

    /// Number of finished rounds kept in the history
    #[arg(long, env = "HISTORY_LEN", default_value_t = 50)]
    history_len: usize,

    /// Credits granted to a nickname seen for the first time
    #[arg(long, env = "DEFAULT_CREDITS", default_value_t = 1_000.0)]
    default_credits: f64,

    #[arg(long, env = "WS_HEARTBEAT_MS", default_value_t = 15_000)]
    heartbeat_ms: u64,

    /// Fixed seed for the crash sampler; only for testing
    #[arg(long, env = "SERVER_RNG_SEED")]
    rng_seed: Option<u64>,

    /// Allowed CORS origin; any origin when unset
    #[arg(long, env = "ORIGIN")]
    allowed_origin: Option<String>,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "SERVER_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json)?;
    let config = build_config(args).context("failed to build server config")?;
    run_server(config).await
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

fn build_config(args: Args) -> Result<ServerConfig> {
    let engine = EngineConfig {
        house_edge: args.house_edge,
        max_multiplier: args.max_multiplier,
        growth_rate: args.growth_rate,
        bet_window: Duration::from_millis(args.bet_window_ms),
        cooldown: Duration::from_millis(args.cooldown_ms),
        tick_interval: Duration::from_millis(args.tick_ms),
        history_len: args.history_len,
    };
    engine.validate().context("invalid round configuration")?;

    let opening_balance = if args.default_credits == 0.0 {
        0
    } else {
        chips_from_credits(args.default_credits)
            .with_context(|| format!("invalid default credits {}", args.default_credits))?
    };
    if args.heartbeat_ms == 0 {
        anyhow::bail!("heartbeat interval must be non-zero");
    }
    if args.rng_seed.is_some() {
        warn!(target: LOG_TARGET, "crash sampler is seeded; outcomes are predictable");
    }
    info!(
        target: LOG_TARGET,
        house_edge = engine.house_edge,
        max_multiplier = engine.max_multiplier,
        bet_window_ms = args.bet_window_ms,
        tick_ms = args.tick_ms,
        "round configuration loaded"
    );

    Ok(ServerConfig {
        bind: args.bind,
        database_url: args.database_url,
        engine,
        source: Box::new(EntropySource::new(args.rng_seed)),
        opening_balance,
        heartbeat: Duration::from_millis(args.heartbeat_ms),
        allowed_origin: args.allowed_origin,
    })
}
