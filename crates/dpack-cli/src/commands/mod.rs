//! Subcommand implementations.

pub mod dev;
pub mod optimize;

use std::path::Path;

use dpack_config::{InlineConfig, LogLevel, UserConfig};

pub use dev::execute as dev_execute;
pub use optimize::execute as optimize_execute;

/// `logLevel` from the config the command is about to load. Errors are
/// left for the command itself to report.
pub fn configured_log_level(inline: &InlineConfig, config_path: Option<&Path>) -> LogLevel {
    let Ok(cwd) = std::env::current_dir() else {
        return LogLevel::default();
    };
    let root = inline
        .root
        .as_deref()
        .map(|root| cwd.join(root))
        .unwrap_or(cwd);
    UserConfig::load(&root, inline, config_path)
        .map(|loaded| loaded.config.log_level)
        .unwrap_or_default()
}
