//! The dev server's module graph.
//!
//! Nodes live in an id-keyed arena so edges are plain [`ModuleId`] copies.
//! Three indices map served urls, resolved ids and files back to nodes.
//! Graph methods are synchronous; callers hold a [`SharedModuleGraph`]
//! lock only for the duration of one call and re-read nodes after every
//! `await`.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::module::{FxIndexSet, ModuleId, ModuleNode};
use crate::url::{clean_url, extname, remove_import_query, remove_timestamp_query};
use crate::utils::now_ms;

pub type SharedModuleGraph = Arc<RwLock<ModuleGraph>>;

/// What a resolver returned for a served url
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUrlId {
    pub id: String,
    pub meta: Option<serde_json::Value>,
}

/// Resolves served urls to module ids. Implemented by the plugin container.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve_url_id(&self, url: &str) -> Result<Option<ResolvedUrlId>>;
}

/// A served url paired with its resolved id
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUrl {
    pub url: String,
    pub id: String,
    pub meta: Option<serde_json::Value>,
}

/// Normalize `raw` and resolve it to an id.
///
/// When the resolved file has an extension the url lacks (`/src/a` resolving
/// to `/root/src/a.ts`), the extension is appended to the url so both
/// spellings land on one node.
pub async fn resolve_url<R: UrlResolver + ?Sized>(resolver: &R, raw: &str) -> Result<ResolvedUrl> {
    let mut url = remove_import_query(&remove_timestamp_query(raw));
    let resolved = resolver.resolve_url_id(&url).await?;
    let (id, meta) = match resolved {
        Some(r) => (r.id, r.meta),
        None => (url.clone(), None),
    };

    if url != id && !url.contains('\0') && !url.starts_with("virtual:") {
        let ext = extname(clean_url(&id));
        let path_end = url.find(['?', '#']).unwrap_or(url.len());
        let (pathname, rest) = url.split_at(path_end);
        if !ext.is_empty() && !pathname.ends_with(ext) {
            url = format!("{pathname}{ext}{rest}");
        }
    }

    Ok(ResolvedUrl { url, id, meta })
}

/// Read-only view of a node handed to plugins.
///
/// Only the fields listed in [`ModuleInfo::FIELDS`] can be read; anything
/// else is an error rather than a silent `None`.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: String,
    pub meta: Option<serde_json::Value>,
    pub importers: Vec<String>,
    pub imported_ids: Vec<String>,
    pub is_self_accepting: Option<bool>,
}

impl ModuleInfo {
    pub const FIELDS: &'static [&'static str] =
        &["id", "meta", "importers", "importedIds", "isSelfAccepting"];

    /// Access a field by name.
    pub fn field(&self, name: &str) -> std::result::Result<serde_json::Value, String> {
        use serde_json::{Value, json};
        match name {
            "id" => Ok(Value::String(self.id.clone())),
            "meta" => Ok(self.meta.clone().unwrap_or_else(|| json!({}))),
            "importers" => Ok(json!(self.importers)),
            "importedIds" => Ok(json!(self.imported_ids)),
            "isSelfAccepting" => Ok(json!(self.is_self_accepting)),
            other => Err(format!(
                "[dpack] The \"{other}\" property of ModuleInfo is not supported."
            )),
        }
    }
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: FxHashMap<ModuleId, ModuleNode>,
    next_id: u32,
    url_to_module: FxHashMap<String, ModuleId>,
    id_to_module: FxHashMap<String, ModuleId>,
    file_to_modules: FxHashMap<String, FxIndexSet<ModuleId>>,
    self_modules_path: FxHashSet<String>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedModuleGraph {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: ModuleId) -> Option<&mut ModuleNode> {
        self.nodes.get_mut(&id)
    }

    /// Look up by an already normalized url.
    pub fn module_by_url(&self, url: &str) -> Option<ModuleId> {
        self.url_to_module.get(url).copied()
    }

    pub fn module_by_id(&self, id: &str) -> Option<ModuleId> {
        self.id_to_module.get(&remove_timestamp_query(id)).copied()
    }

    pub fn modules_by_file(&self, file: &str) -> Vec<ModuleId> {
        self.file_to_modules
            .get(file)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn module_info(&self, id: &str) -> Option<ModuleInfo> {
        let node = self.node(self.module_by_id(id)?)?;
        let ids = |set: &FxIndexSet<ModuleId>| {
            set.iter()
                .filter_map(|m| self.node(*m).map(|n| n.id.clone()))
                .collect::<Vec<_>>()
        };
        Some(ModuleInfo {
            id: node.id.clone(),
            meta: node.meta.clone(),
            importers: ids(&node.importers),
            imported_ids: ids(&node.imported_modules),
            is_self_accepting: node.is_self_accepting,
        })
    }

    /// Record that `path` went through import analysis.
    pub fn mark_self_module(&mut self, path: &str) {
        self.self_modules_path.insert(path.to_string());
    }

    pub fn is_self_module(&self, path: &str) -> bool {
        self.self_modules_path.contains(path)
    }

    /// Get or create the node for a resolved url.
    ///
    /// Several urls may map to the node of one id; each new spelling is
    /// registered in the url index.
    pub fn ensure_entry(&mut self, resolved: &ResolvedUrl, set_is_self_accepting: bool) -> ModuleId {
        if let Some(existing) = self.id_to_module.get(&resolved.id).copied() {
            self.url_to_module
                .entry(resolved.url.clone())
                .or_insert(existing);
            return existing;
        }

        let id = ModuleId(self.next_id);
        self.next_id += 1;

        let mut node = ModuleNode::new(&resolved.url, &resolved.id, set_is_self_accepting);
        node.meta = resolved.meta.clone();
        self.url_to_module.insert(resolved.url.clone(), id);
        self.id_to_module.insert(resolved.id.clone(), id);
        self.file_to_modules
            .entry(node.file.clone())
            .or_default()
            .insert(id);
        debug!(url = %resolved.url, id = %resolved.id, "module graph entry created");
        self.nodes.insert(id, node);
        id
    }

    /// Replace a module's import and accept edges after import analysis.
    ///
    /// Returns the modules that lost their last importer, so the client can
    /// prune them.
    pub fn update_module_info(
        &mut self,
        module: ModuleId,
        imported: &[ModuleId],
        imported_bindings: Option<FxHashMap<String, FxHashSet<String>>>,
        accepted: &[ModuleId],
        accepted_exports: Option<FxHashSet<String>>,
        is_self_accepting: bool,
    ) -> Vec<ModuleId> {
        let Some(node) = self.nodes.get_mut(&module) else {
            return Vec::new();
        };
        node.is_self_accepting = Some(is_self_accepting);
        node.accepted_hmr_deps = accepted.iter().copied().collect();
        node.accepted_hmr_exports = accepted_exports;
        node.imported_bindings = imported_bindings;
        let next: FxIndexSet<ModuleId> = imported.iter().copied().collect();
        let prev = std::mem::replace(&mut node.imported_modules, next.clone());

        for dep in &next {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.importers.insert(module);
            }
        }

        let mut no_longer_imported = Vec::new();
        for dep in prev.iter().filter(|d| !next.contains(*d)) {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.importers.shift_remove(&module);
                if dep_node.importers.is_empty() {
                    no_longer_imported.push(*dep);
                }
            }
        }
        no_longer_imported
    }

    /// Drop a module's cached transform and stamp it, then walk up to
    /// importers that do not accept it.
    pub fn invalidate_module(
        &mut self,
        module: ModuleId,
        seen: &mut FxHashSet<ModuleId>,
        timestamp: u64,
        is_hmr: bool,
    ) {
        if !seen.insert(module) {
            return;
        }
        let Some(node) = self.nodes.get_mut(&module) else {
            return;
        };
        node.last_invalidation_timestamp = timestamp;
        if is_hmr {
            node.last_hmr_timestamp = timestamp;
        }
        node.transform_result = None;

        let importers: Vec<ModuleId> = node.importers.iter().copied().collect();
        for importer in importers {
            let accepts = self
                .nodes
                .get(&importer)
                .is_some_and(|n| n.accepted_hmr_deps.contains(&module));
            if !accepts {
                self.invalidate_module(importer, seen, timestamp, is_hmr);
            }
        }
    }

    /// Invalidate every module without dropping any node.
    pub fn invalidate_all(&mut self) {
        let timestamp = now_ms();
        let mut seen = FxHashSet::default();
        let all: Vec<ModuleId> = self.nodes.keys().copied().collect();
        for module in all {
            self.invalidate_module(module, &mut seen, timestamp, false);
        }
    }

    /// Forget every node. Used after the dependency optimizer commits a new
    /// generation, when every optimized url in the graph is stale.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.url_to_module.clear();
        self.id_to_module.clear();
        self.file_to_modules.clear();
        self.self_modules_path.clear();
    }

    /// A watched file changed on disk.
    pub fn on_file_change(&mut self, file: &str) {
        let modules = self.modules_by_file(file);
        if modules.is_empty() {
            return;
        }
        let timestamp = now_ms();
        let mut seen = FxHashSet::default();
        for module in modules {
            self.invalidate_module(module, &mut seen, timestamp, false);
        }
    }

    /// Urls of the given modules, skipping stale ids.
    pub fn urls(&self, modules: &[ModuleId]) -> Vec<String> {
        modules
            .iter()
            .filter_map(|m| self.node(*m).map(|n| n.url.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(graph: &mut ModuleGraph, url: &str) -> ModuleId {
        let resolved = ResolvedUrl {
            url: url.to_string(),
            id: format!("/root{url}"),
            meta: None,
        };
        graph.ensure_entry(&resolved, true)
    }

    struct ExtResolver;

    #[async_trait]
    impl UrlResolver for ExtResolver {
        async fn resolve_url_id(&self, url: &str) -> Result<Option<ResolvedUrlId>> {
            Ok(match url {
                "/src/a" => Some(ResolvedUrlId {
                    id: "/root/src/a.ts".to_string(),
                    meta: None,
                }),
                _ => None,
            })
        }
    }

    #[tokio::test]
    async fn test_resolve_url_appends_extension() {
        let resolved = resolve_url(&ExtResolver, "/src/a?import&t=1700000000000")
            .await
            .unwrap();
        assert_eq!(resolved.url, "/src/a.ts");
        assert_eq!(resolved.id, "/root/src/a.ts");

        let unresolved = resolve_url(&ExtResolver, "/other.js").await.unwrap();
        assert_eq!(unresolved.url, "/other.js");
        assert_eq!(unresolved.id, "/other.js");
    }

    #[test]
    fn test_ensure_entry_is_idempotent_per_id() {
        let mut graph = ModuleGraph::new();
        let a = entry(&mut graph, "/a.js");
        let again = graph.ensure_entry(
            &ResolvedUrl {
                url: "/a.js?v=123".to_string(),
                id: "/root/a.js".to_string(),
                meta: None,
            },
            true,
        );
        assert_eq!(a, again);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.module_by_url("/a.js?v=123"), Some(a));
        assert_eq!(graph.modules_by_file("/root/a.js"), vec![a]);
    }

    #[test]
    fn test_module_by_id_ignores_timestamp() {
        let mut graph = ModuleGraph::new();
        let a = entry(&mut graph, "/a.js");
        assert_eq!(graph.module_by_id("/root/a.js?t=1700000000000"), Some(a));
    }

    #[test]
    fn test_update_module_info_reports_pruned() {
        let mut graph = ModuleGraph::new();
        let main = entry(&mut graph, "/main.js");
        let a = entry(&mut graph, "/a.js");
        let b = entry(&mut graph, "/b.js");

        let pruned = graph.update_module_info(main, &[a, b], None, &[], None, false);
        assert!(pruned.is_empty());
        assert!(graph.node(a).unwrap().importers.contains(&main));

        let pruned = graph.update_module_info(main, &[a], None, &[], None, false);
        assert_eq!(pruned, vec![b]);
        assert!(graph.node(b).unwrap().importers.is_empty());
        assert_eq!(graph.node(main).unwrap().is_self_accepting, Some(false));
    }

    #[test]
    fn test_invalidate_stops_at_accepting_importer() {
        let mut graph = ModuleGraph::new();
        let root = entry(&mut graph, "/root.js");
        let parent = entry(&mut graph, "/parent.js");
        let child = entry(&mut graph, "/child.js");
        graph.update_module_info(root, &[parent], None, &[], None, false);
        graph.update_module_info(parent, &[child], None, &[child], None, false);

        for m in [root, parent, child] {
            graph.node_mut(m).unwrap().transform_result = Some(Arc::new(
                crate::module::TransformResult {
                    code: String::new(),
                    map: None,
                    etag: String::new(),
                    deps: vec![],
                    dynamic_deps: vec![],
                },
            ));
        }

        let mut seen = FxHashSet::default();
        graph.invalidate_module(child, &mut seen, 42, true);

        assert!(graph.node(child).unwrap().transform_result.is_none());
        assert_eq!(graph.node(child).unwrap().last_hmr_timestamp, 42);
        assert!(graph.node(parent).unwrap().transform_result.is_some());
        assert!(graph.node(root).unwrap().transform_result.is_some());
    }

    #[test]
    fn test_invalidate_walks_non_accepting_importers() {
        let mut graph = ModuleGraph::new();
        let parent = entry(&mut graph, "/parent.js");
        let child = entry(&mut graph, "/child.js");
        graph.update_module_info(parent, &[child], None, &[], None, false);

        graph.on_file_change("/root/child.js");

        assert!(graph.node(parent).unwrap().last_invalidation_timestamp > 0);
        assert_eq!(graph.node(parent).unwrap().last_hmr_timestamp, 0);
    }

    #[test]
    fn test_clear_makes_ids_stale() {
        let mut graph = ModuleGraph::new();
        let a = entry(&mut graph, "/a.js");
        graph.mark_self_module("/root/a.js");
        graph.clear();

        assert!(graph.node(a).is_none());
        assert!(!graph.is_self_module("/root/a.js"));
        let fresh = entry(&mut graph, "/a.js");
        assert_ne!(a, fresh);
    }

    #[test]
    fn test_module_info_fields() {
        let mut graph = ModuleGraph::new();
        let main = entry(&mut graph, "/main.js");
        let a = entry(&mut graph, "/a.js");
        graph.update_module_info(main, &[a], None, &[], None, true);

        let info = graph.module_info("/root/main.js").unwrap();
        assert_eq!(info.field("importedIds").unwrap(), serde_json::json!(["/root/a.js"]));
        assert_eq!(info.field("isSelfAccepting").unwrap(), serde_json::json!(true));
        assert!(info.field("code").is_err());
    }
}
