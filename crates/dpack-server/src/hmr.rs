//! File changes to hot updates.

use std::sync::Arc;
use tracing::{debug, info};

use dpack_graph::utils::{now_ms, root_relative};
use dpack_graph::{HmrOutcome, ModuleId, plan_updates};

use crate::error::Result;
use crate::server::ServerContext;
use crate::watcher::{FileChange, read_modified_file};
use crate::ws::HmrPayload;

/// React to one watcher event.
pub async fn handle_file_change(server: &Arc<ServerContext>, change: FileChange) -> Result<()> {
    let file = change.file();
    let config = &server.config;

    if config.is_config_dependency(&file) || config.is_env_file(&file) {
        info!(file = %short_name(server, &file), "config changed, restarting server");
        server.request_restart();
        return Ok(());
    }

    if let FileChange::Modified(path) = &change {
        let has_modules = !server.graph.read().modules_by_file(&file).is_empty();
        if has_modules {
            // Settle truncate-then-write saves before anything re-reads it
            let content = read_modified_file(server.runtime.as_ref(), path).await?;
            debug!(file = %file, bytes = content.len(), "file changed");
        }
        server.graph.write().on_file_change(&file);
    }

    let modules = server.graph.read().modules_by_file(&file);
    if modules.is_empty() {
        if matches!(change, FileChange::Modified(_)) && file.ends_with(".html") {
            if let Some(path) = root_relative(&file, &config.root) {
                info!(file = %path, "page reload");
                server.hmr.send(HmrPayload::FullReload { path: Some(path) });
            }
        } else {
            debug!(file = %file, "no modules matched");
        }
        return Ok(());
    }

    update_modules(server, &short_name(server, &file), &modules, now_ms());
    Ok(())
}

/// Invalidate `modules` and tell the pages what to do about it.
pub fn update_modules(server: &ServerContext, file: &str, modules: &[ModuleId], timestamp: u64) {
    let outcome = {
        let mut graph = server.graph.write();
        plan_updates(&mut graph, modules, timestamp)
    };
    match outcome {
        HmrOutcome::FullReload => {
            info!(file = %file, "page reload");
            server.hmr.send(HmrPayload::full_reload());
        }
        HmrOutcome::Update(updates) => {
            for update in &updates {
                info!(path = %update.path, "hmr update");
            }
            server.hmr.send(HmrPayload::Update { updates });
        }
        HmrOutcome::NoUpdate => {
            debug!(file = %file, "no update happened");
        }
    }
}

fn short_name(server: &ServerContext, file: &str) -> String {
    root_relative(file, &server.config.root).unwrap_or_else(|| file.to_string())
}
