//! What the resolver needs from the dependency optimizer.
//!
//! The optimizer depends on the resolver (to scan and to resolve included
//! deps), so the resolver sees it only through this trait and holds it
//! weakly.

use async_trait::async_trait;

/// Snapshot of one optimized (or about to be optimized) dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedDepRef {
    /// Bare id, e.g. `lodash-es` or `a > b`
    pub id: String,
    /// Absolute path of the pre-bundled file
    pub file: String,
    /// Absolute path of the dependency's original entry
    pub src: Option<String>,
    pub browser_hash: String,
}

impl OptimizedDepRef {
    /// URL id the browser should import: `<file>?v=<browserHash>`
    pub fn optimized_id(&self) -> String {
        format!("{}?v={}", self.file, self.browser_hash)
    }
}

#[async_trait]
pub trait DepsOptimizerHandle: Send + Sync {
    /// Resolves once the initial scan has merged its results.
    async fn scan_processing(&self);

    /// Browser hash of the current generation
    fn browser_hash(&self) -> String;

    /// Whether `id` is a file inside the optimized deps directory
    fn is_optimized_dep_file(&self, id: &str) -> bool;

    /// Whether a root-relative `url` points into the optimized deps directory
    fn is_optimized_dep_url(&self, url: &str) -> bool;

    fn dep_info_from_id(&self, id: &str) -> Option<OptimizedDepRef>;

    fn dep_info_from_file(&self, file: &str) -> Option<OptimizedDepRef>;

    /// Every known dependency, optimized and discovered
    fn dep_infos(&self) -> Vec<OptimizedDepRef>;

    /// Record a bare import found at request time and schedule a rebundle.
    /// Returns the dep's final location right away.
    fn register_missing_import(&self, id: &str, resolved: &str) -> OptimizedDepRef;

    /// Whether `optimizeDeps.exclude` names `id`
    fn is_excluded(&self, id: &str) -> bool;
}
