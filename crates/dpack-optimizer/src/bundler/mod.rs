//! The seam between the optimizer and the external bundler.

mod plugin;
mod rolldown_bundler;

pub use plugin::{DepPreBundlePlugin, replace_defines};
pub use rolldown_bundler::RolldownDepBundler;

use async_trait::async_trait;

use crate::error::Result;

/// One dependency entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEntry {
    /// Bare id as imported
    pub id: String,
    /// Output name, see [`dpack_graph::url::flatten_id`]
    pub flat_id: String,
    /// Absolute path of the dependency's entry file
    pub src: String,
}

#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Entries in the optimizer's insertion order
    pub entries: Vec<DepEntry>,
    pub root: String,
    /// Bare ids left as imports, from `optimizeDeps.exclude`
    pub external: Vec<String>,
    pub is_production: bool,
}

/// One file the bundler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledChunk {
    /// File name relative to the output directory, e.g. `lodash.js`
    pub file_name: String,
    pub code: String,
    pub is_entry: bool,
    /// The entry's flat id, for entry chunks
    pub entry_name: Option<String>,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BundleOutput {
    pub chunks: Vec<BundledChunk>,
}

impl BundleOutput {
    /// The entry chunk produced for `flat_id`.
    pub fn entry(&self, flat_id: &str) -> Option<&BundledChunk> {
        self.chunks
            .iter()
            .find(|chunk| chunk.is_entry && chunk.entry_name.as_deref() == Some(flat_id))
    }

    /// Shared chunks that are not an entry of their own.
    pub fn shared_chunks(&self) -> impl Iterator<Item = &BundledChunk> {
        self.chunks.iter().filter(|chunk| !chunk.is_entry)
    }
}

/// Bundles a dependency set into one ESM file per entry plus shared chunks.
#[async_trait]
pub trait DepBundler: Send + Sync + std::fmt::Debug {
    async fn bundle(&self, request: BundleRequest) -> Result<BundleOutput>;
}
