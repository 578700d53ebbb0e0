//! Import analysis: the last transform every served JS module goes through.
//!
//! Each import specifier is resolved and rewritten to the url the browser
//! should fetch, the module's edges and accept state are written to the
//! module graph, and modules using `import.meta.hot` get a hot context.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

use dpack_graph::hmr::{is_explicit_import_required, prune_modules};
use dpack_graph::url::{
    CLIENT_PUBLIC_PATH, FS_PREFIX, clean_url, inject_query, is_data_url, is_direct_css_request,
    is_external_url, normalize_hmr_url, unwrap_id, wrap_id,
};
use dpack_graph::utils::{now_ms, root_relative};
use dpack_graph::{ImportKind, ModuleId, ResolvedUrl, lex_module};
use dpack_optimizer::ERR_OUTDATED_OPTIMIZED_DEP;
use dpack_resolve::DepsOptimizerHandle;

use crate::cjs_interop::{interop_dynamic_import, interop_named_imports};
use crate::error::{ERR_CLOSED_SERVER, Result, ServerError};
use crate::html::is_html_proxy;
use crate::plugin::{Enforce, Plugin, PluginContext, SourceDescription};
use crate::server::ServerContext;
use crate::splice::Splicer;
use crate::transform::transform_request;
use crate::ws::HmrPayload;

/// Modules whose graph node never goes through import analysis. They
/// start out as analysed and not self-accepting so updates propagate to
/// their importers.
pub fn can_skip_import_analysis(url: &str) -> bool {
    let file = clean_url(url);
    file.ends_with(".json") || file.ends_with(".map") || is_direct_css_request(url)
}

fn should_analyze(id: &str) -> bool {
    let file = clean_url(id);
    id != CLIENT_PUBLIC_PATH
        && !can_skip_import_analysis(id)
        && (!file.ends_with(".html") || is_html_proxy(id))
}

/// Browser url for a resolved import, plus the graph node behind it.
struct NormalizedImport {
    url: String,
    /// Url of the graph node: unwrapped, without `?import`, `t=` or base
    graph_url: String,
    module: ModuleId,
    dep_id: String,
}

#[derive(Debug, Default)]
pub struct ImportAnalysisPlugin {
    server: OnceCell<Weak<ServerContext>>,
}

impl ImportAnalysisPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn server(&self) -> Option<Arc<ServerContext>> {
        self.server.get().and_then(Weak::upgrade)
    }

    /// Turn a resolved id into the specifier written into the module.
    fn normalize_url(&self, server: &ServerContext, resolved_id: &str) -> NormalizedImport {
        let root = server.config.root.as_str();
        let mut url = if let Some(relative) = root_relative(resolved_id, root) {
            relative
        } else if server.optimizer.is_optimized_dep_file(resolved_id)
            || server.runtime.exists(Path::new(clean_url(resolved_id)))
        {
            format!("{}{}", FS_PREFIX.trim_end_matches('/'), resolved_id)
        } else {
            resolved_id.to_string()
        };

        if !url.starts_with('.') && !url.starts_with('/') {
            url = wrap_id(resolved_id);
        }

        let graph_url = unwrap_id(&url);
        let module = {
            let entry = ResolvedUrl {
                url: graph_url.clone(),
                id: resolved_id.to_string(),
                meta: None,
            };
            server
                .graph
                .write()
                .ensure_entry(&entry, can_skip_import_analysis(&url))
        };

        if is_explicit_import_required(&url) {
            url = inject_query(&url, "import");
        }

        let last_hmr = server
            .graph
            .read()
            .node(module)
            .map_or(0, |n| n.last_hmr_timestamp);
        if last_hmr > 0 {
            url = inject_query(&url, &format!("t={last_hmr}"));
        }

        let base = server.config.base.trim_end_matches('/');
        if !base.is_empty() && url.starts_with('/') {
            url = format!("{base}{url}");
        }

        NormalizedImport {
            url,
            graph_url,
            module,
            dep_id: resolved_id.to_string(),
        }
    }

    /// Warm the transform cache for statically imported urls.
    fn pre_transform(&self, server: &Arc<ServerContext>, urls: Vec<String>) {
        for url in urls {
            let server = Arc::clone(server);
            tokio::spawn(async move {
                if let Err(err) = transform_request(&server, &url, false).await {
                    match err.code() {
                        Some(ERR_OUTDATED_OPTIMIZED_DEP) | Some(ERR_CLOSED_SERVER) => {}
                        _ => error!(url = %url, error = %err, "pre-transform failed"),
                    }
                }
            });
        }
    }
}

#[async_trait]
impl Plugin for ImportAnalysisPlugin {
    fn name(&self) -> &'static str {
        "dpack:import-analysis"
    }

    fn enforce(&self) -> Enforce {
        Enforce::Post
    }

    fn configure_server(&self, server: &Arc<ServerContext>) {
        let _ = self.server.set(Arc::downgrade(server));
    }

    async fn transform(
        &self,
        ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<SourceDescription>> {
        if !should_analyze(id) {
            return Ok(None);
        }
        let Some(server) = self.server() else {
            return Ok(None);
        };
        let (importer_module, importer_url) = {
            let graph = server.graph.read();
            let Some(module) = graph.module_by_id(id) else {
                debug!(id = %id, "skipping import analysis for a module outside the graph");
                return Ok(None);
            };
            let url = graph.node(module).map(|n| n.url.clone()).unwrap_or_default();
            (module, url)
        };

        let lexed = lex_module(code, id).map_err(|e| ServerError::transform(self.name(), id, e))?;
        let mut splicer = Splicer::new(code);
        let mut imported: Vec<ModuleId> = Vec::new();
        let mut bindings: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
        let mut static_urls: Vec<String> = Vec::new();

        for (index, record) in lexed.imports.iter().enumerate() {
            let Some(specifier) = record.specifier.as_deref() else {
                continue;
            };
            if is_external_url(specifier) || is_data_url(specifier) || specifier == CLIENT_PUBLIC_PATH {
                continue;
            }

            let Some(resolved) = ctx.resolve(specifier, Some(id), false).await? else {
                return Err(ServerError::UnresolvedImport {
                    specifier: specifier.to_string(),
                    importer: id.to_string(),
                });
            };
            if resolved.external {
                continue;
            }

            let normalized = self.normalize_url(&server, &resolved.id);
            let url = normalized.url.as_str();

            let interop = if server.optimizer.is_optimized_dep_file(&resolved.id) {
                server.optimizer.needs_interop(&resolved.id).await == Some(true)
            } else {
                false
            };

            match record.kind {
                ImportKind::Dynamic => {
                    if interop {
                        splicer.overwrite(
                            record.statement_start,
                            record.statement_end,
                            interop_dynamic_import(url),
                        );
                    } else {
                        let quoted = serde_json::to_string(url).unwrap_or_default();
                        splicer.overwrite(record.start, record.end, quoted);
                    }
                    ctx.add_dynamic_dep(url);
                }
                _ => {
                    let rewritten = if interop {
                        let statement = splicer.slice(record.statement_start, record.statement_end);
                        interop_named_imports(record, statement, specifier, url, index)
                    } else {
                        None
                    };
                    match rewritten {
                        Some(text) => {
                            splicer.overwrite(record.statement_start, record.statement_end, text)
                        }
                        None => splicer.overwrite(record.start, record.end, url),
                    }
                    static_urls.push(normalized.graph_url.clone());
                }
            }

            let names = match record.kind {
                ImportKind::Static | ImportKind::ReExport => record.imported_names(),
                _ => None,
            };
            let entry = bindings.entry(normalized.dep_id.clone()).or_default();
            match names {
                Some(names) => entry.extend(names),
                None => {
                    entry.insert("*".to_string());
                }
            }
            if !imported.contains(&normalized.module) {
                imported.push(normalized.module);
            }
        }

        let mut accepted: Vec<ModuleId> = Vec::new();
        for dep in &lexed.hot.deps {
            let Some(resolved) = ctx.resolve(&dep.url, Some(id), false).await? else {
                return Err(ServerError::UnresolvedImport {
                    specifier: dep.url.clone(),
                    importer: id.to_string(),
                });
            };
            let normalized = self.normalize_url(&server, &resolved.id);
            splicer.overwrite(dep.start, dep.end, normalize_hmr_url(&normalized.graph_url));
            if !accepted.contains(&normalized.module) {
                accepted.push(normalized.module);
            }
        }

        let accepted_exports: Option<FxHashSet<String>> = lexed
            .hot
            .exports
            .as_ref()
            .filter(|names| !names.is_empty())
            .map(|names| names.iter().cloned().collect());
        let mut is_self_accepting = lexed.hot.self_accepts;
        if !is_self_accepting {
            if let Some(exports) = &accepted_exports {
                if !lexed.has_export_all && lexed.exports.iter().all(|e| exports.contains(e)) {
                    is_self_accepting = true;
                }
            }
        }

        if lexed.uses_hot {
            let owner = serde_json::to_string(&normalize_hmr_url(&importer_url))
                .unwrap_or_default();
            splicer.prepend(&format!(
                "import {{ createHotContext as __dpack__createHotContext }} from \"{CLIENT_PUBLIC_PATH}\";\
                 import.meta.hot = __dpack__createHotContext({owner});"
            ));
        }

        let pruned = {
            let mut graph = server.graph.write();
            let pruned = graph.update_module_info(
                importer_module,
                &imported,
                Some(bindings),
                &accepted,
                if is_self_accepting { None } else { accepted_exports },
                is_self_accepting,
            );
            prune_modules(&mut graph, &pruned, now_ms())
        };
        if !pruned.is_empty() {
            debug!(importer = %importer_url, pruned = ?pruned, "modules no longer imported");
            server.hmr.send(HmrPayload::Prune { paths: pruned });
        }

        if server.config.server.pre_transform_requests && !static_urls.is_empty() {
            self.pre_transform(&server, static_urls);
        }

        if !splicer.has_changed() {
            return Ok(None);
        }
        Ok(Some(SourceDescription::new(splicer.render())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_skip_import_analysis() {
        assert!(can_skip_import_analysis("/data.json"));
        assert!(can_skip_import_analysis("/style.css?direct"));
        assert!(!can_skip_import_analysis("/style.css"));
        assert!(!can_skip_import_analysis("/main.js"));
    }

    #[test]
    fn test_should_analyze() {
        assert!(should_analyze("/root/main.ts"));
        assert!(should_analyze("/root/style.css"));
        assert!(!should_analyze(CLIENT_PUBLIC_PATH));
        assert!(!should_analyze("/root/index.html"));
        assert!(should_analyze("/root/index.html?html-proxy&index=0.js"));
    }
}
