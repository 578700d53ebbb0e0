//! The `dpack` command-line interface.
//!
//! - [`cli`] - argument parsing with clap
//! - [`commands`] - `dev` and `optimize`
//! - [`logger`] - tracing subscriber setup
//! - [`error`] - errors and their miette reports
//! - [`shortcuts`] - keys read from the terminal while `dev` runs

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod shortcuts;
pub mod ui;

pub use error::{CliError, Result};
