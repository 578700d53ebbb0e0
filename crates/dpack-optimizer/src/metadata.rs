//! The optimized-deps ledger and its `_metadata.json` form.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use dpack_graph::utils::normalize_path;
use dpack_resolve::OptimizedDepRef;

use crate::error::{OptimizeError, Result};
use crate::processing::Processing;

pub const METADATA_FILE: &str = "_metadata.json";

/// One dependency known to the optimizer.
#[derive(Debug, Clone)]
pub struct OptimizedDepInfo {
    /// Bare id as imported, e.g. `react-dom/client`
    pub id: String,
    /// Absolute path of the pre-bundled file
    pub file: String,
    /// Absolute path of the dependency's entry in `node_modules`
    pub src: Option<String>,
    /// For discovered deps, the estimate importers were rewritten with.
    /// Unknown until first asked for.
    pub needs_interop: Option<bool>,
    pub browser_hash: String,
    pub file_hash: Option<String>,
    /// Gate for reading `file`
    pub processing: Processing,
}

impl OptimizedDepInfo {
    pub fn new(id: impl Into<String>, file: impl Into<String>, browser_hash: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file: file.into(),
            src: None,
            needs_interop: None,
            browser_hash: browser_hash.into(),
            file_hash: None,
            processing: Processing::ready(),
        }
    }

    pub fn to_ref(&self) -> OptimizedDepRef {
        OptimizedDepRef {
            id: self.id.clone(),
            file: self.file.clone(),
            src: self.src.clone(),
            browser_hash: self.browser_hash.clone(),
        }
    }
}

/// The optimizer's view of every dependency, split into what is on disk
/// (`optimized`, `chunks`) and what is waiting for the next run
/// (`discovered`). An id lives in exactly one of the three maps.
#[derive(Debug, Clone, Default)]
pub struct DepOptimizationMetadata {
    /// Lockfile + config hash this generation was built for
    pub hash: String,
    /// Hash embedded in the `v=` query of every optimized url
    pub browser_hash: String,
    pub optimized: IndexMap<String, OptimizedDepInfo>,
    pub chunks: IndexMap<String, OptimizedDepInfo>,
    pub discovered: IndexMap<String, OptimizedDepInfo>,
    /// Insertion order of every optimized and discovered id. Bundler
    /// entries follow this order so equal sets hash equally.
    pub dep_info_list: Vec<String>,
}

impl DepOptimizationMetadata {
    pub fn new(hash: impl Into<String>, browser_hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            browser_hash: browser_hash.into(),
            ..Default::default()
        }
    }

    fn track(&mut self, id: &str) {
        if !self.dep_info_list.iter().any(|known| known == id) {
            self.dep_info_list.push(id.to_string());
        }
    }

    pub fn add_optimized(&mut self, info: OptimizedDepInfo) {
        self.discovered.shift_remove(&info.id);
        self.chunks.shift_remove(&info.id);
        self.track(&info.id);
        self.optimized.insert(info.id.clone(), info);
    }

    pub fn add_discovered(&mut self, info: OptimizedDepInfo) {
        self.track(&info.id);
        self.discovered.insert(info.id.clone(), info);
    }

    pub fn add_chunk(&mut self, info: OptimizedDepInfo) {
        self.chunks.insert(info.id.clone(), info);
    }

    /// Look an id up in `optimized`, `discovered` and `chunks`, in that order.
    pub fn dep_info(&self, id: &str) -> Option<&OptimizedDepInfo> {
        self.optimized
            .get(id)
            .or_else(|| self.discovered.get(id))
            .or_else(|| self.chunks.get(id))
    }

    pub fn dep_info_from_file(&self, file: &str) -> Option<&OptimizedDepInfo> {
        self.optimized
            .values()
            .chain(self.discovered.values())
            .chain(self.chunks.values())
            .find(|info| info.file == file)
    }

    /// Optimized and discovered deps in insertion order.
    pub fn known_deps(&self) -> Vec<OptimizedDepInfo> {
        self.dep_info_list
            .iter()
            .filter_map(|id| self.optimized.get(id).or_else(|| self.discovered.get(id)))
            .cloned()
            .collect()
    }

    /// Forget every discovered dep so the next run rediscovers them.
    pub fn clear_discovered(&mut self) {
        let discovered: Vec<String> = self.discovered.drain(..).map(|(id, _)| id).collect();
        self.dep_info_list.retain(|id| !discovered.contains(id));
    }

    /// Serialize for `<deps_cache_dir>/_metadata.json`. Paths are written
    /// relative to the cache dir.
    pub fn stringify(&self, deps_cache_dir: &str) -> Result<String> {
        let relative = |path: &str| -> String {
            pathdiff::diff_paths(path, deps_cache_dir)
                .map(normalize_path)
                .unwrap_or_else(|| path.to_string())
        };

        let optimized = self
            .optimized
            .values()
            .map(|info| {
                (
                    info.id.clone(),
                    OptimizedEntryJson {
                        src: info.src.as_deref().map(relative).unwrap_or_default(),
                        file: relative(&info.file),
                        file_hash: info.file_hash.clone().unwrap_or_default(),
                        needs_interop: info.needs_interop.unwrap_or(false),
                    },
                )
            })
            .collect();
        let chunks = self
            .chunks
            .values()
            .map(|info| {
                (
                    info.id.clone(),
                    ChunkEntryJson {
                        file: relative(&info.file),
                    },
                )
            })
            .collect();

        let json = MetadataJson {
            hash: self.hash.clone(),
            browser_hash: self.browser_hash.clone(),
            optimized,
            chunks,
        };
        serde_json::to_string_pretty(&json).map_err(|e| OptimizeError::Metadata(e.to_string()))
    }

    /// Parse `_metadata.json` written by [`Self::stringify`].
    pub fn parse(content: &str, deps_cache_dir: &str) -> Result<Self> {
        let json: MetadataJson =
            serde_json::from_str(content).map_err(|e| OptimizeError::Metadata(e.to_string()))?;
        let absolute = |path: &str| normalize_path(Path::new(deps_cache_dir).join(path));

        let mut metadata = DepOptimizationMetadata::new(json.hash, json.browser_hash);
        for (id, entry) in json.optimized {
            let mut info = OptimizedDepInfo::new(
                id,
                absolute(&entry.file),
                metadata.browser_hash.clone(),
            );
            info.src = (!entry.src.is_empty()).then(|| absolute(&entry.src));
            info.file_hash = (!entry.file_hash.is_empty()).then_some(entry.file_hash);
            info.needs_interop = Some(entry.needs_interop);
            metadata.add_optimized(info);
        }
        for (id, entry) in json.chunks {
            let info = OptimizedDepInfo::new(id, absolute(&entry.file), metadata.browser_hash.clone());
            metadata.add_chunk(info);
        }
        Ok(metadata)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataJson {
    hash: String,
    browser_hash: String,
    #[serde(default)]
    optimized: IndexMap<String, OptimizedEntryJson>,
    #[serde(default)]
    chunks: IndexMap<String, ChunkEntryJson>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizedEntryJson {
    src: String,
    file: String,
    #[serde(default)]
    file_hash: String,
    #[serde(default)]
    needs_interop: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkEntryJson {
    file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CACHE: &str = "/app/node_modules/.dpack/deps";

    fn optimized(id: &str, file: &str) -> OptimizedDepInfo {
        let mut info = OptimizedDepInfo::new(id, format!("{CACHE}/{file}"), "b1");
        info.src = Some(format!("/app/node_modules/{id}/index.js"));
        info.file_hash = Some("f1".into());
        info.needs_interop = Some(true);
        info
    }

    #[test]
    fn test_partitions_are_exclusive() {
        let mut metadata = DepOptimizationMetadata::new("h", "b");
        metadata.add_discovered(OptimizedDepInfo::new("vue", "/x/vue.js", "b"));
        assert!(metadata.discovered.contains_key("vue"));

        metadata.add_optimized(OptimizedDepInfo::new("vue", "/x/vue.js", "b"));
        assert!(!metadata.discovered.contains_key("vue"));
        assert!(metadata.optimized.contains_key("vue"));
        assert_eq!(metadata.dep_info_list, vec!["vue".to_string()]);
    }

    #[test]
    fn test_known_deps_keep_insertion_order() {
        let mut metadata = DepOptimizationMetadata::new("h", "b");
        metadata.add_discovered(OptimizedDepInfo::new("zod", "/x/zod.js", "b"));
        metadata.add_optimized(OptimizedDepInfo::new("axios", "/x/axios.js", "b"));
        metadata.add_discovered(OptimizedDepInfo::new("lit", "/x/lit.js", "b"));
        let ids: Vec<String> = metadata.known_deps().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["zod", "axios", "lit"]);

        metadata.clear_discovered();
        let ids: Vec<String> = metadata.known_deps().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["axios"]);
    }

    #[test]
    fn test_stringify_uses_relative_paths() {
        let mut metadata = DepOptimizationMetadata::new("abc", "def");
        metadata.add_optimized(optimized("lodash", "lodash.js"));
        metadata.add_chunk(OptimizedDepInfo::new("chunk-1", format!("{CACHE}/chunk-1.js"), "def"));

        let json = metadata.stringify(CACHE).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["hash"], "abc");
        assert_eq!(value["browserHash"], "def");
        assert_eq!(value["optimized"]["lodash"]["file"], "lodash.js");
        assert_eq!(value["optimized"]["lodash"]["src"], "../../lodash/index.js");
        assert_eq!(value["optimized"]["lodash"]["fileHash"], "f1");
        assert_eq!(value["optimized"]["lodash"]["needsInterop"], true);
        assert_eq!(value["chunks"]["chunk-1"]["file"], "chunk-1.js");
    }

    #[test]
    fn test_parse_restores_absolute_paths() {
        let mut metadata = DepOptimizationMetadata::new("abc", "def");
        metadata.add_optimized(optimized("lodash", "lodash.js"));
        let json = metadata.stringify(CACHE).unwrap();

        let parsed = DepOptimizationMetadata::parse(&json, CACHE).unwrap();
        let info = parsed.optimized.get("lodash").unwrap();
        assert_eq!(info.file, format!("{CACHE}/lodash.js"));
        assert_eq!(info.src.as_deref(), Some("/app/node_modules/lodash/index.js"));
        assert_eq!(info.browser_hash, "def");
        assert_eq!(info.needs_interop, Some(true));
        assert!(!info.processing.is_pending());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            DepOptimizationMetadata::parse("{not json", CACHE),
            Err(OptimizeError::Metadata(_))
        ));
    }
}
