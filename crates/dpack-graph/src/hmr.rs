//! Hot update propagation.
//!
//! A change to a module is absorbed by the closest modules that declared
//! they can apply it (boundaries). If the walk reaches a module that can
//! neither accept the update nor hand it to an importer, the page must
//! reload.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::ModuleGraph;
use crate::module::{ModuleId, ModuleKind};
use crate::url::{clean_url, is_css_request, is_js_request, normalize_hmr_url};

/// A module that applies an update, and the module it accepts it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HmrBoundary {
    pub boundary: ModuleId,
    pub accepted_via: ModuleId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    #[serde(rename = "js-update")]
    Js,
    #[serde(rename = "css-update")]
    Css,
}

/// One entry of an `update` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub path: String,
    pub accepted_path: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_import_required: Option<bool>,
}

/// What a set of changed modules means for connected clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmrOutcome {
    /// Reload the page
    FullReload,
    /// Re-import these boundaries
    Update(Vec<Update>),
    /// Nothing in the browser depends on the change
    NoUpdate,
}

/// The accepted module is imported without a `?import` marker when it is
/// JS or CSS; anything else needs one.
pub fn is_explicit_import_required(url: &str) -> bool {
    !is_js_request(clean_url(url)) && !is_css_request(url)
}

fn add_boundary(boundaries: &mut Vec<HmrBoundary>, boundary: HmrBoundary) {
    if !boundaries.contains(&boundary) {
        boundaries.push(boundary);
    }
}

/// Collect update boundaries for `node`.
///
/// Returns `true` if a dead end was hit and the page has to reload.
/// `current_chain` holds the importer path from the changed module to
/// `node`; an importer already on it closes a cycle and is skipped.
pub fn propagate_update(
    graph: &ModuleGraph,
    node_id: ModuleId,
    traversed: &mut FxHashSet<ModuleId>,
    boundaries: &mut Vec<HmrBoundary>,
    current_chain: &mut Vec<ModuleId>,
) -> bool {
    if !traversed.insert(node_id) {
        return false;
    }
    let Some(node) = graph.node(node_id) else {
        return false;
    };

    let Some(self_accepting) = node.is_self_accepting else {
        debug!(url = %node.url, "update reached a module that was never analyzed");
        return true;
    };

    if self_accepting {
        add_boundary(
            boundaries,
            HmrBoundary {
                boundary: node_id,
                accepted_via: node_id,
            },
        );
        // Style updates bubble to importing stylesheets without forcing a
        // reload. The walk marks a copy of `traversed` so later walks still
        // visit the modules it passed.
        for importer in &node.importers {
            let Some(importer_node) = graph.node(*importer) else {
                continue;
            };
            if is_css_request(&importer_node.url) && !current_chain.contains(importer) {
                let mut scratch = traversed.clone();
                current_chain.push(*importer);
                let _ = propagate_update(graph, *importer, &mut scratch, boundaries, current_chain);
                current_chain.pop();
            }
        }
        return false;
    }

    if node.accepted_hmr_exports.is_some() {
        add_boundary(
            boundaries,
            HmrBoundary {
                boundary: node_id,
                accepted_via: node_id,
            },
        );
    } else {
        if node.importers.is_empty() {
            return true;
        }
        let all_css_importers = node.importers.iter().all(|i| {
            graph
                .node(*i)
                .is_some_and(|n| is_css_request(&n.url))
        });
        if !is_css_request(&node.url) && all_css_importers {
            return true;
        }
    }

    for importer in &node.importers {
        let Some(importer_node) = graph.node(*importer) else {
            continue;
        };

        if importer_node.accepted_hmr_deps.contains(&node_id) {
            add_boundary(
                boundaries,
                HmrBoundary {
                    boundary: *importer,
                    accepted_via: node_id,
                },
            );
            continue;
        }

        if let (Some(accepted), Some(bindings)) =
            (&node.accepted_hmr_exports, &importer_node.imported_bindings)
        {
            if let Some(from_node) = bindings.get(&node.id) {
                if from_node.iter().all(|b| accepted.contains(b)) {
                    continue;
                }
            }
        }

        if current_chain.contains(importer) {
            continue;
        }

        current_chain.push(*importer);
        let dead_end = propagate_update(graph, *importer, traversed, boundaries, current_chain);
        current_chain.pop();
        if dead_end {
            return true;
        }
    }
    false
}

/// Invalidate `modules` and work out what the client has to do.
pub fn plan_updates(graph: &mut ModuleGraph, modules: &[ModuleId], timestamp: u64) -> HmrOutcome {
    let mut updates = Vec::new();
    let mut invalidated = FxHashSet::default();
    let mut traversed = FxHashSet::default();
    let mut need_full_reload = false;

    for module in modules {
        graph.invalidate_module(*module, &mut invalidated, timestamp, true);
        if need_full_reload {
            continue;
        }

        let mut boundaries = Vec::new();
        let mut chain = vec![*module];
        if propagate_update(graph, *module, &mut traversed, &mut boundaries, &mut chain) {
            need_full_reload = true;
            continue;
        }

        for HmrBoundary {
            boundary,
            accepted_via,
        } in boundaries
        {
            let (Some(b), Some(via)) = (graph.node(boundary), graph.node(accepted_via)) else {
                continue;
            };
            let (kind, explicit_import_required) = match b.kind {
                ModuleKind::Js => (UpdateKind::Js, Some(is_explicit_import_required(&via.url))),
                ModuleKind::Css => (UpdateKind::Css, None),
            };
            updates.push(Update {
                kind,
                path: normalize_hmr_url(&b.url),
                accepted_path: normalize_hmr_url(&via.url),
                timestamp,
                explicit_import_required,
            });
        }
    }

    if need_full_reload {
        HmrOutcome::FullReload
    } else if updates.is_empty() {
        HmrOutcome::NoUpdate
    } else {
        HmrOutcome::Update(updates)
    }
}

/// Stamp modules that lost their last importer and return their urls for a
/// `prune` message.
pub fn prune_modules(graph: &mut ModuleGraph, modules: &[ModuleId], timestamp: u64) -> Vec<String> {
    let mut paths = Vec::with_capacity(modules.len());
    for module in modules {
        if let Some(node) = graph.node_mut(*module) {
            node.last_hmr_timestamp = timestamp;
            debug!(file = %node.file, "dispose");
            paths.push(node.url.clone());
        }
    }
    paths
}
