//! Entry point of the `dpack` binary.

use clap::Parser;
use dpack_cli::{cli, commands, error, logger, ui};
use miette::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let forced = args.log_level();

    let configured = match &args.command {
        cli::Command::Dev(dev) => {
            commands::configured_log_level(&dev.inline_config(forced), dev.config.as_deref())
        }
        cli::Command::Optimize(opt) => {
            commands::configured_log_level(&opt.inline_config(forced), opt.config.as_deref())
        }
    };
    logger::init_logger(forced, configured, args.no_color);
    ui::init_colors(args.no_color);

    let result = match args.command {
        cli::Command::Dev(dev) => commands::dev_execute(dev, forced).await,
        cli::Command::Optimize(opt) => commands::optimize_execute(opt, forced).await,
    };

    result.map_err(error::cli_error_to_miette)
}
