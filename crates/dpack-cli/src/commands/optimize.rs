//! `dpack optimize`: one scan and bundle run, without a server.

use std::sync::Arc;
use std::time::Instant;

use dpack_config::{LogLevel, ResolvedConfig};
use dpack_graph::{NativeRuntime, Runtime};
use dpack_optimizer::{DepsOptimizer, OptimizerState, RolldownDepBundler};
use dpack_resolve::{ResolveOptions, Resolver};

use crate::cli::OptimizeArgs;
use crate::error::Result;
use crate::ui;

pub async fn execute(args: OptimizeArgs, log_level: Option<LogLevel>) -> Result<()> {
    let started = Instant::now();
    let config = Arc::new(ResolvedConfig::load(
        args.inline_config(log_level),
        args.config.as_deref(),
    )?);

    let runtime: Arc<dyn Runtime> = Arc::new(NativeRuntime::new());
    let resolver = Arc::new(Resolver::new(
        ResolveOptions::from_config(&config),
        Arc::clone(&runtime),
    ));
    let bundler = Arc::new(RolldownDepBundler::new(
        &config,
        Arc::clone(&runtime),
        Arc::clone(resolver.package_cache()),
    ));
    let optimizer = DepsOptimizer::new(Arc::clone(&config), runtime, resolver, bundler);

    let outcome = run(&optimizer).await;
    let metadata = optimizer.metadata();
    optimizer.close().await;
    let cached = outcome?;

    let count = metadata.optimized.len();
    if cached {
        ui::success(&format!(
            "Optimized dependencies are up to date ({count} cached in {})",
            optimizer.deps_cache_dir()
        ));
        return Ok(());
    }
    if count == 0 {
        ui::info("No dependencies to optimize");
        return Ok(());
    }
    for id in metadata.optimized.keys() {
        ui::info(id);
    }
    ui::success(&format!(
        "Optimized {count} dependencies in {} ms",
        started.elapsed().as_millis()
    ));
    Ok(())
}

/// Returns whether the cached metadata was reused.
async fn run(optimizer: &DepsOptimizer) -> Result<bool> {
    optimizer.init().await?;
    let cached = optimizer.state() == OptimizerState::Idle;
    optimizer.wait_for_first_run().await?;
    Ok(cached)
}
