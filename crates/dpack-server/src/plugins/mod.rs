//! Built-in plugins of the dev server pipeline.

mod alias;
mod client;
mod css;
mod define;
mod html_proxy;
mod import_analysis;
mod json;
mod load_fallback;
mod optimized_deps;
mod resolve;

pub use alias::AliasPlugin;
pub use client::{ClientPlugin, render_client};
pub use css::{CssPlugin, css_module};
pub use define::DefinePlugin;
pub use html_proxy::HtmlProxyPlugin;
pub use import_analysis::{ImportAnalysisPlugin, can_skip_import_analysis};
pub use json::{JsonPlugin, json_to_esm};
pub use load_fallback::LoadFallbackPlugin;
pub use optimized_deps::OptimizedDepsPlugin;
pub use resolve::ResolvePlugin;

use std::sync::Arc;

use dpack_config::ResolvedConfig;
use dpack_graph::Runtime;
use dpack_optimizer::DepsOptimizer;
use dpack_resolve::Resolver;

use crate::html::HtmlProxyCache;
use crate::plugin::Plugin;

/// The default pipeline, followed by any user plugins.
pub fn create_plugins(
    config: &ResolvedConfig,
    runtime: Arc<dyn Runtime>,
    resolver: Arc<Resolver>,
    optimizer: Arc<DepsOptimizer>,
    html_proxies: Arc<HtmlProxyCache>,
    user_plugins: Vec<Arc<dyn Plugin>>,
) -> Vec<Arc<dyn Plugin>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(AliasPlugin),
        Arc::new(ClientPlugin::new(config)),
        Arc::new(HtmlProxyPlugin::new(config, html_proxies)),
        Arc::new(OptimizedDepsPlugin::new(optimizer)),
        Arc::new(ResolvePlugin::new(resolver)),
        Arc::new(CssPlugin),
        Arc::new(JsonPlugin),
        Arc::new(DefinePlugin::new(config)),
    ];
    plugins.extend(user_plugins);
    plugins.push(Arc::new(LoadFallbackPlugin::new(runtime)));
    plugins.push(Arc::new(ImportAnalysisPlugin::new()));
    plugins
}
