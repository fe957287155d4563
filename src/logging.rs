//! Logging - stderr subscriber for hosts that embed the store
//!
//! The store only emits `tracing` events; installing a subscriber is left to
//! the host. `init_logging` is the ready-made one: `RUST_LOG` picks the
//! filter (default `info`), `CHAINSTORE_LOG_JSON=1` switches to JSON lines.

use tracing_subscriber::{fmt, EnvFilter};

const JSON_ENV: &str = "CHAINSTORE_LOG_JSON";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var(JSON_ENV).as_deref() {
            Ok("1") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder().with_env_filter(filter).with_writer(std::io::stderr);

    let _ = match LogFormat::from_env() {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
