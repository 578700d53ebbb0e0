//! Configuration errors.
//!
//! Every message ends with a hint the CLI prints verbatim.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--config` pointed at a file that does not exist
    #[error("Config file not found: {}\n\nHint: Create a dpack.config.json file or pass --config <path>", .0.display())]
    NotFound(PathBuf),

    /// The config file extension is not one we can read
    #[error("Unsupported config format: {}\n\nHint: Use dpack.config.json or dpack.config.toml", .0.display())]
    UnsupportedFormat(PathBuf),

    /// A layer failed to parse or a field has the wrong type
    #[error("Invalid configuration: {message}\n\nHint: {hint}")]
    InvalidValue { message: String, hint: String },

    /// The project root could not be determined
    #[error("Invalid root directory {}: {reason}\n\nHint: Pass an existing directory as the root", .path.display())]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
