//! Command-line interface definition.
//!
//! - `dpack dev` - serve a project with hot updates
//! - `dpack optimize` - pre-bundle dependencies once and exit

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use dpack_config::{InlineConfig, InlineOptimizeDepsConfig, InlineServerConfig, LogLevel};

/// dpack - an on-demand ES module dev server
#[derive(Parser, Debug)]
#[command(
    name = "dpack",
    version,
    about = "An on-demand ES module dev server",
    long_about = "dpack serves project files to the browser as native ES modules,\n\
                  transforming each one when it is requested. Dependencies are\n\
                  pre-bundled once and edits are pushed to open pages as hot updates."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Level forced by `--verbose` or `--quiet`, if any.
    pub fn log_level(&self) -> Option<LogLevel> {
        if self.verbose {
            Some(LogLevel::Debug)
        } else if self.quiet {
            Some(LogLevel::Error)
        } else {
            None
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the dev server
    ///
    /// Serves the project root, pre-bundles dependencies in the background
    /// and pushes updates to open pages when files change. Editing the
    /// config file restarts the server.
    Dev(DevArgs),

    /// Pre-bundle dependencies and exit
    ///
    /// Scans the project for bare imports, bundles them into the cache
    /// directory and writes the metadata the dev server reuses on start.
    Optimize(OptimizeArgs),
}

/// Arguments for the dev command
#[derive(Args, Debug, Clone)]
pub struct DevArgs {
    /// Project root (defaults to the current directory)
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Port to listen on; the next free one is taken unless strictPort is set
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Host to bind
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Ignore cached optimized dependencies and bundle again
    #[arg(long)]
    pub force: bool,

    /// Config file (defaults to dpack.config.json or dpack.config.toml in the root)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl DevArgs {
    pub fn inline_config(&self, log_level: Option<LogLevel>) -> InlineConfig {
        let server = (self.port.is_some() || self.host.is_some()).then(|| InlineServerConfig {
            host: self.host.clone(),
            port: self.port,
        });
        InlineConfig {
            root: self.root.clone(),
            log_level,
            server,
            optimize_deps: force_override(self.force),
            ..Default::default()
        }
    }
}

/// Arguments for the optimize command
#[derive(Args, Debug, Clone)]
pub struct OptimizeArgs {
    /// Project root (defaults to the current directory)
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Bundle even when the cached metadata is current
    #[arg(long)]
    pub force: bool,

    /// Config file (defaults to dpack.config.json or dpack.config.toml in the root)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl OptimizeArgs {
    pub fn inline_config(&self, log_level: Option<LogLevel>) -> InlineConfig {
        InlineConfig {
            root: self.root.clone(),
            log_level,
            optimize_deps: force_override(self.force),
            ..Default::default()
        }
    }
}

fn force_override(force: bool) -> Option<InlineOptimizeDepsConfig> {
    force.then(|| InlineOptimizeDepsConfig { force: Some(true) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dev_with_overrides() {
        let cli = Cli::try_parse_from(["dpack", "dev", "app", "--port", "4000", "--force"]).unwrap();
        let Command::Dev(args) = &cli.command else {
            panic!("expected dev");
        };
        assert_eq!(args.root, Some(PathBuf::from("app")));

        let inline = args.inline_config(cli.log_level());
        assert_eq!(inline.server.as_ref().and_then(|s| s.port), Some(4000));
        assert_eq!(inline.server.as_ref().and_then(|s| s.host.clone()), None);
        assert_eq!(inline.optimize_deps.and_then(|o| o.force), Some(true));
        assert_eq!(inline.log_level, None);
    }

    #[test]
    fn test_dev_without_flags_leaves_config_alone() {
        let cli = Cli::try_parse_from(["dpack", "dev"]).unwrap();
        let Command::Dev(args) = &cli.command else {
            panic!("expected dev");
        };
        let inline = args.inline_config(None);
        assert!(inline.root.is_none());
        assert!(inline.server.is_none());
        assert!(inline.optimize_deps.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dpack", "optimize", "--verbose", "--no-color"]).unwrap();
        assert!(cli.no_color);
        assert_eq!(cli.log_level(), Some(LogLevel::Debug));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["dpack", "dev", "-v", "-q"]).is_err());
    }
}
