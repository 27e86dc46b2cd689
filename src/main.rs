//! termpilot launcher
//!
//! Reads configuration from the environment, initializes logging, and serves
//! the JSON-over-stdio protocol until stdin reaches end-of-file.
//!
//! Recognized environment variables:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `LOG_LEVEL` | trace/debug/info/warn/error | `info` |
//! | `MAX_SESSIONS` | registry capacity | 100 |
//! | `SESSION_TIMEOUT` | idle eviction threshold (seconds) | 1800 |

use std::io;
use std::sync::Arc;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use termpilot::config::Config;
use termpilot::core::registry::{Registry, SWEEP_INTERVAL};
use termpilot::server;

fn init_logging() {
    let level = match std::env::var("LOG_LEVEL")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the protocol; all diagnostics go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        info!(%level, "logging initialized");
    }
}

fn main() {
    init_logging();

    let config = Config::from_env();
    info!(
        max_sessions = config.max_sessions,
        session_timeout_secs = config.session_timeout.as_secs(),
        "starting termpilot"
    );

    let registry = Arc::new(Registry::new(config.max_sessions, config.session_timeout));
    let _sweeper = registry.start_sweeper(SWEEP_INTERVAL);

    let stdin = io::stdin();
    let stdout = io::stdout();
    if let Err(err) = server::serve(&registry, stdin.lock(), stdout.lock()) {
        error!(%err, "server error");
        std::process::exit(1);
    }

    info!("stdin closed, shutting down");
}
