//! Logging setup for the `dpack` binary.
//!
//! Library crates only emit `tracing` events; this installs the subscriber
//! that prints them.
//!
//! The level is picked in this order:
//! 1. `--verbose` / `--quiet`
//! 2. `RUST_LOG`
//! 3. `logLevel` from the config file
//! 4. `info`

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dpack_config::LogLevel;

/// Filter directive enabling `level` for every dpack crate.
pub fn filter_for(level: LogLevel) -> String {
    format!("dpack={}", level.as_filter())
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logger(forced: Option<LogLevel>, configured: LogLevel, no_color: bool) {
    let filter = match forced {
        Some(level) => EnvFilter::new(filter_for(level)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_for(configured))),
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color && should_use_colors())
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// `NO_COLOR` wins over `FORCE_COLOR`; otherwise ask the terminal.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::Term::stderr().features().colors_supported()
}
