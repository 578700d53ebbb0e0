//! Module graph nodes.

use indexmap::IndexSet;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::url::{clean_url, is_css_request};

/// Insertion-ordered set with the fast hasher. Iteration order decides the
/// order of HMR boundaries, so plain hash sets are not used for edges.
pub type FxIndexSet<T> = IndexSet<T, FxBuildHasher>;

/// Handle to a node in a [`crate::ModuleGraph`].
///
/// Ids are never reused. After the graph is cleared every outstanding id
/// simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Js,
    Css,
}

impl ModuleKind {
    /// CSS requests become css nodes whether or not they carry `?direct`.
    pub fn from_url(url: &str) -> Self {
        if is_css_request(url) {
            ModuleKind::Css
        } else {
            ModuleKind::Js
        }
    }
}

/// Cached output of the transform pipeline for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    pub code: String,
    pub map: Option<String>,
    pub etag: String,
    pub deps: Vec<String>,
    pub dynamic_deps: Vec<String>,
}

/// One servable unit: a JS module or a CSS request.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Public served url path, starts with `/`
    pub url: String,
    /// Resolved id, may carry a query
    pub id: String,
    /// Resolved file path without query
    pub file: String,
    pub kind: ModuleKind,
    /// Plugin supplied metadata from `resolve_id`
    pub meta: Option<serde_json::Value>,
    /// `None` until import analysis has run on the module
    pub is_self_accepting: Option<bool>,
    pub importers: FxIndexSet<ModuleId>,
    pub imported_modules: FxIndexSet<ModuleId>,
    pub accepted_hmr_deps: FxIndexSet<ModuleId>,
    pub accepted_hmr_exports: Option<FxHashSet<String>>,
    /// Bindings this module imports, keyed by the imported module's id
    pub imported_bindings: Option<FxHashMap<String, FxHashSet<String>>>,
    pub transform_result: Option<Arc<TransformResult>>,
    pub last_hmr_timestamp: u64,
    pub last_invalidation_timestamp: u64,
}

impl ModuleNode {
    pub fn new(url: &str, id: &str, set_is_self_accepting: bool) -> Self {
        Self {
            url: url.to_string(),
            id: id.to_string(),
            file: clean_url(id).to_string(),
            kind: ModuleKind::from_url(url),
            meta: None,
            is_self_accepting: if set_is_self_accepting {
                Some(false)
            } else {
                None
            },
            importers: FxIndexSet::default(),
            imported_modules: FxIndexSet::default(),
            accepted_hmr_deps: FxIndexSet::default(),
            accepted_hmr_exports: None,
            imported_bindings: None,
            transform_result: None,
            last_hmr_timestamp: 0,
            last_invalidation_timestamp: 0,
        }
    }

    pub fn is_css(&self) -> bool {
        self.kind == ModuleKind::Css
    }
}
