//! Errors surfaced by the `dpack` binary.
//!
//! Library errors are wrapped as they are; their messages already carry
//! hints where a user can act on them. [`cli_error_to_miette`] turns the
//! result into the report printed on exit.

use thiserror::Error;

use dpack_config::ConfigError;
use dpack_optimizer::OptimizeError;
use dpack_server::ServerError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Dependency optimization failed: {0}")]
    Optimize(#[from] OptimizeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Convert to a miette report for printing.
pub fn cli_error_to_miette(err: CliError) -> miette::Report {
    match err {
        CliError::Config(e) | CliError::Server(ServerError::Config(e)) => {
            miette::miette!("Configuration error: {}", e)
        }
        CliError::Server(ServerError::Bind { addr, source }) => miette::miette!(
            "Could not listen on {}: {}\n\nHint: Pass another --port or stop the process using it",
            addr,
            source
        ),
        other => miette::miette!("{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_config_error_keeps_hint() {
        let err: CliError = ConfigError::NotFound(PathBuf::from("dpack.config.json")).into();
        let report = cli_error_to_miette(err).to_string();
        assert!(report.starts_with("Configuration error: Config file not found"));
        assert!(report.contains("Hint:"));
    }

    #[test]
    fn test_config_error_inside_server_error() {
        let err: CliError = ServerError::Config(ConfigError::NotFound(PathBuf::from("x.json"))).into();
        assert!(cli_error_to_miette(err).to_string().starts_with("Configuration error:"));
    }

    #[test]
    fn test_optimize_error_message() {
        let err: CliError = OptimizeError::Closed.into();
        assert_eq!(
            err.to_string(),
            "Dependency optimization failed: The dependency optimizer is closed"
        );
    }
}
