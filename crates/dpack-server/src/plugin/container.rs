use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexSet;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use dpack_config::ResolvedConfig;
use dpack_graph::utils::normalize_path;
use dpack_graph::{GraphError, ModuleInfo, ResolvedUrlId, SharedModuleGraph, UrlResolver};

use super::{Hook, HookOrder, Plugin, ResolveIdOptions, ResolvedId, SourceDescription};
use crate::error::{Result, ServerError};

/// Runs plugin hooks in pipeline order.
pub struct PluginContainer {
    config: Arc<ResolvedConfig>,
    graph: SharedModuleGraph,
    plugins: Vec<Arc<dyn Plugin>>,
    hook_order: FxHashMap<Hook, Vec<usize>>,
    watch_files: Mutex<IndexSet<String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContainer")
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Code after the transform hooks ran, plus what the plugins recorded
/// about it along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedModule {
    pub code: String,
    pub map: Option<String>,
    pub dynamic_deps: Vec<String>,
}

/// What a hook can reach while it runs.
pub struct PluginContext<'a> {
    container: &'a PluginContainer,
    plugin: Option<&'static str>,
    skip: FxHashSet<&'static str>,
    dynamic_deps: Option<&'a Mutex<Vec<String>>>,
}

impl<'a> PluginContext<'a> {
    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.container.config
    }

    pub fn module_graph(&self) -> &SharedModuleGraph {
        &self.container.graph
    }

    /// Resolve through the whole pipeline. With `skip_self` the calling
    /// plugin is left out, which lets a resolver delegate without looping.
    pub async fn resolve(
        &self,
        id: &str,
        importer: Option<&str>,
        skip_self: bool,
    ) -> Result<Option<ResolvedId>> {
        let mut skip = self.skip.clone();
        if skip_self {
            if let Some(name) = self.plugin {
                skip.insert(name);
            }
        }
        self.container
            .resolve_id_skipping(id, importer, ResolveIdOptions::default(), skip)
            .await
    }

    /// Watch a file the current module depends on.
    pub fn add_watch_file(&self, file: &str) {
        self.container.add_watch_file(file);
    }

    pub fn get_module_info(&self, id: &str) -> Option<ModuleInfo> {
        self.container.graph.read().module_info(id)
    }

    /// Record a dynamically imported url of the module being transformed.
    pub fn add_dynamic_dep(&self, url: &str) {
        if let Some(deps) = self.dynamic_deps {
            deps.lock().push(url.to_string());
        }
    }

    pub fn warn(&self, message: &str) {
        warn!(plugin = self.plugin.unwrap_or("dpack"), "{message}");
    }
}

impl PluginContainer {
    pub fn new(
        config: Arc<ResolvedConfig>,
        graph: SharedModuleGraph,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        let mut by_enforce: Vec<usize> = (0..plugins.len()).collect();
        by_enforce.sort_by_key(|i| plugins[*i].enforce());

        let mut hook_order = FxHashMap::default();
        for hook in Hook::ALL {
            let mut pre = Vec::new();
            let mut normal = Vec::new();
            let mut post = Vec::new();
            for i in &by_enforce {
                match plugins[*i].order(hook) {
                    Some(HookOrder::Pre) => pre.push(*i),
                    None => normal.push(*i),
                    Some(HookOrder::Post) => post.push(*i),
                }
            }
            pre.extend(normal);
            pre.extend(post);
            hook_order.insert(hook, pre);
        }

        Self {
            config,
            graph,
            plugins,
            hook_order,
            watch_files: Mutex::new(IndexSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn graph(&self) -> &SharedModuleGraph {
        &self.graph
    }

    /// Plugins running `hook`, in the order they run.
    pub fn sorted(&self, hook: Hook) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.hook_order
            .get(&hook)
            .into_iter()
            .flatten()
            .map(|i| &self.plugins[*i])
    }

    fn context(&self, plugin: &'static str) -> PluginContext<'_> {
        PluginContext {
            container: self,
            plugin: Some(plugin),
            skip: FxHashSet::default(),
            dynamic_deps: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ServerError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn add_watch_file(&self, file: &str) {
        self.watch_files.lock().insert(normalize_path(file));
    }

    pub fn watch_files(&self) -> Vec<String> {
        self.watch_files.lock().iter().cloned().collect()
    }

    pub async fn build_start(&self) -> Result<()> {
        self.ensure_open()?;
        let starts = self.sorted(Hook::BuildStart).map(|plugin| async move {
            let ctx = self.context(plugin.name());
            plugin.build_start(&ctx).await
        });
        futures::future::try_join_all(starts).await?;
        Ok(())
    }

    /// First non-empty `resolve_id` result.
    pub async fn resolve_id(
        &self,
        id: &str,
        importer: Option<&str>,
        options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        self.resolve_id_skipping(id, importer, options, FxHashSet::default())
            .await
    }

    fn resolve_id_skipping<'a>(
        &'a self,
        id: &'a str,
        importer: Option<&'a str>,
        options: ResolveIdOptions,
        skip: FxHashSet<&'static str>,
    ) -> BoxFuture<'a, Result<Option<ResolvedId>>> {
        async move {
            self.ensure_open()?;
            for plugin in self.sorted(Hook::ResolveId) {
                if skip.contains(plugin.name()) {
                    continue;
                }
                let ctx = PluginContext {
                    container: self,
                    plugin: Some(plugin.name()),
                    skip: skip.clone(),
                    dynamic_deps: None,
                };
                let Some(mut resolved) = plugin.resolve_id(&ctx, id, importer, options).await?
                else {
                    continue;
                };
                if !resolved.external && resolved.id.starts_with('/') {
                    let (path, query) = match resolved.id.find(['?', '#']) {
                        Some(i) => resolved.id.split_at(i),
                        None => (resolved.id.as_str(), ""),
                    };
                    resolved.id = format!("{}{query}", normalize_path(path));
                }
                debug!(plugin = plugin.name(), id = %id, resolved = %resolved.id, "resolve_id");
                return Ok(Some(resolved));
            }
            Ok(None)
        }
        .boxed()
    }

    /// First non-empty `load` result.
    pub async fn load(&self, id: &str) -> Result<Option<SourceDescription>> {
        self.ensure_open()?;
        for plugin in self.sorted(Hook::Load) {
            let ctx = self.context(plugin.name());
            if let Some(loaded) = plugin.load(&ctx, id).await? {
                debug!(plugin = plugin.name(), id = %id, "load");
                return Ok(Some(loaded));
            }
        }
        Ok(None)
    }

    /// Thread `code` through every `transform` hook.
    pub async fn transform(&self, code: String, id: &str) -> Result<TransformedModule> {
        self.ensure_open()?;
        let dynamic_deps = Mutex::new(Vec::new());
        let mut code = code;
        let mut map = None;
        for plugin in self.sorted(Hook::Transform) {
            let ctx = PluginContext {
                container: self,
                plugin: Some(plugin.name()),
                skip: FxHashSet::default(),
                dynamic_deps: Some(&dynamic_deps),
            };
            if let Some(result) = plugin.transform(&ctx, &code, id).await? {
                code = result.code;
                if result.map.is_some() {
                    map = result.map;
                }
            }
        }
        Ok(TransformedModule {
            code,
            map,
            dynamic_deps: dynamic_deps.into_inner(),
        })
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for plugin in self.sorted(Hook::Close) {
            if let Err(err) = plugin.close().await {
                warn!(plugin = plugin.name(), error = %err, "plugin close failed");
            }
        }
    }
}

#[async_trait]
impl UrlResolver for PluginContainer {
    async fn resolve_url_id(&self, url: &str) -> dpack_graph::Result<Option<ResolvedUrlId>> {
        let resolved = self
            .resolve_id(url, None, ResolveIdOptions::default())
            .await
            .map_err(|e| GraphError::Resolve {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(resolved.map(|r| ResolvedUrlId {
            id: r.id,
            meta: r.meta,
        }))
    }
}
