//! # dpack-config
//!
//! Configuration for the dpack dev server.
//!
//! Layers, lowest priority first:
//!
//! 1. built-in defaults
//! 2. `dpack.config.json` / `dpack.config.toml` in the root (or `--config`)
//! 3. `DPACK_*` environment variables
//! 4. command line values ([`InlineConfig`])
//!
//! [`ResolvedConfig`] is the frozen result with absolute paths.

pub mod defaults;
pub mod error;
pub mod loading;
pub mod resolved;
pub mod search_root;
pub mod types;

pub use defaults::{DEFAULT_HMR_PATH, HMR_PROTOCOL};
pub use error::{ConfigError, Result};
pub use loading::{LoadedConfig, find_config_file};
pub use resolved::{ConfigId, ResolvedConfig, ResolvedResolveOptions, ResolvedServerOptions};
pub use search_root::{search_for_package_root, search_for_workspace_root};
pub use types::{
    AliasOptions, AliasRule, HmrConfig, HmrOptions, InlineConfig, InlineOptimizeDepsConfig,
    InlineServerConfig, LogLevel, OptimizeDepsConfig, ResolveConfig, ServerConfig, UserConfig,
};
