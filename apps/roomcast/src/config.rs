use std::time::Duration;

use clap::Parser;

/// Immutable service configuration, merged over defaults once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// When off, connections never arm the sweep timer and no eviction runs.
    pub auto_close: bool,
    pub sweep_interval: Duration,
    pub liveness_timeout: Duration,
    pub heartbeat_request: String,
    pub heartbeat_response: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            auto_close: true,
            sweep_interval: Duration::from_millis(30_000),
            liveness_timeout: Duration::from_millis(60_000),
            heartbeat_request: "ping".to_string(),
            heartbeat_response: "pong".to_string(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "roomcast",
    author,
    version,
    about = "Room-scoped WebSocket broadcast hub"
)]
pub struct Cli {
    /// Port to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "ROOMCAST_PORT", default_value_t = 8080)]
    port: u16,

    /// Redis connection URI used for the durable wake slots.
    #[arg(long, env = "ROOMCAST_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Disable the periodic eviction of silent connections.
    #[arg(long, env = "ROOMCAST_DISABLE_AUTO_CLOSE", default_value_t = false)]
    disable_auto_close: bool,

    /// Interval between sweep wake-ups.
    #[arg(long, env = "ROOMCAST_SWEEP_INTERVAL_MS", default_value_t = 30_000)]
    sweep_interval_ms: u64,

    /// Silence after which a connection is considered dead.
    #[arg(long, env = "ROOMCAST_LIVENESS_TIMEOUT_MS", default_value_t = 60_000)]
    liveness_timeout_ms: u64,

    /// Text frame answered at the transport layer as a keep-alive.
    #[arg(long, env = "ROOMCAST_HEARTBEAT_REQUEST", default_value = "ping")]
    heartbeat_request: String,

    /// Reply sent for a recognized keep-alive request.
    #[arg(long, env = "ROOMCAST_HEARTBEAT_RESPONSE", default_value = "pong")]
    heartbeat_response: String,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            port: cli.port,
            redis_url: cli.redis_url,
            auto_close: !cli.disable_auto_close,
            sweep_interval: Duration::from_millis(cli.sweep_interval_ms),
            liveness_timeout: Duration::from_millis(cli.liveness_timeout_ms),
            heartbeat_request: cli.heartbeat_request,
            heartbeat_response: cli.heartbeat_response,
        }
    }
}
