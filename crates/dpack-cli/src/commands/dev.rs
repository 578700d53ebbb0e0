//! `dpack dev`: run the server until Ctrl+C or the `q` shortcut.
//!
//! The server restarts itself when the config file or an env file changes,
//! keeping the listening socket, so this only has to bind once and wait.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{info, warn};

use dpack_config::LogLevel;
use dpack_server::{DevServer, ServerOptions, server_url};

use crate::cli::DevArgs;
use crate::error::Result;
use crate::{shortcuts, ui};

pub async fn execute(args: DevArgs, log_level: Option<LogLevel>) -> Result<()> {
    let started = Instant::now();

    let mut options = ServerOptions::new(args.inline_config(log_level));
    if let Some(path) = &args.config {
        options = options.with_config_path(path);
    }
    let server = DevServer::new(options).await?;

    let listener = server.bind().await?;
    let addr = listener.local_addr()?;
    let config = server.config();
    if addr.port() != config.server.port {
        ui::warning(&format!(
            "Port {} is in use, using {} instead",
            config.server.port,
            addr.port()
        ));
    }
    ui::server_ready(&server_url(addr, &config.base), started.elapsed().as_millis());

    let (quit_tx, quit_rx) = oneshot::channel();
    let keys = std::io::stdin().is_terminal().then(|| {
        ui::hint("press h + enter to show help");
        shortcuts::spawn(Arc::clone(&server), addr, quit_tx)
    });

    server.serve(listener, shutdown_signal(quit_rx)).await?;
    if let Some(keys) = keys {
        keys.abort();
    }
    Ok(())
}

async fn shutdown_signal(quit: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    // a dropped sender only means shortcuts are off
    tokio::select! {
        () = ctrl_c => {}
        Ok(()) = quit => {}
    }
    info!("shutting down");
}
