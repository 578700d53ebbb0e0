use async_trait::async_trait;
use indexmap::IndexMap;
use rolldown::{BundlerBuilder, BundlerOptions, InputItem, OutputFormat, Platform};
use rolldown_common::Output;
use rolldown_plugin::__inner::SharedPluginable;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dpack_config::ResolvedConfig;
use dpack_graph::Runtime;
use dpack_resolve::{PackageCache, ResolveOptions, Resolver};

use super::{BundleOutput, BundleRequest, BundledChunk, DepBundler, DepPreBundlePlugin};
use crate::error::{OptimizeError, Result};

/// [`DepBundler`] backed by Rolldown.
#[derive(Debug)]
pub struct RolldownDepBundler {
    resolver: Arc<Resolver>,
    define: IndexMap<String, String>,
}

impl RolldownDepBundler {
    pub fn new(config: &ResolvedConfig, runtime: Arc<dyn Runtime>, packages: Arc<PackageCache>) -> Self {
        let mut options = ResolveOptions::from_config(config);
        // resolve to real entries inside node_modules, never to pre-bundles
        options.as_src = false;
        options.scan = true;
        Self {
            resolver: Arc::new(Resolver::with_package_cache(options, runtime, packages)),
            define: config.define.clone(),
        }
    }
}

#[async_trait]
impl DepBundler for RolldownDepBundler {
    async fn bundle(&self, request: BundleRequest) -> Result<BundleOutput> {
        let start = Instant::now();
        let input = request
            .entries
            .iter()
            .map(|entry| InputItem {
                name: Some(entry.flat_id.clone()),
                import: entry.src.clone(),
            })
            .collect();

        let options = BundlerOptions {
            input: Some(input),
            cwd: Some(PathBuf::from(&request.root)),
            format: Some(OutputFormat::Esm),
            platform: Some(Platform::Browser),
            ..Default::default()
        };

        let plugin: SharedPluginable = Arc::new(DepPreBundlePlugin::new(
            Arc::clone(&self.resolver),
            request.external.clone(),
            &self.define,
            request.is_production,
        ));

        let mut bundler = BundlerBuilder::default()
            .with_options(options)
            .with_plugins(vec![plugin])
            .build()
            .map_err(|e| OptimizeError::from_rolldown_batch(&e))?;
        let output = bundler
            .generate()
            .await
            .map_err(|e| OptimizeError::from_rolldown_batch(&e))?;

        let mut chunks = Vec::new();
        for asset in output.assets {
            if let Output::Chunk(chunk) = asset {
                chunks.push(BundledChunk {
                    file_name: chunk.filename.to_string(),
                    code: chunk.code.clone(),
                    is_entry: chunk.is_entry,
                    entry_name: chunk.is_entry.then(|| chunk.name.to_string()),
                    exports: chunk.exports.iter().map(|e| e.to_string()).collect(),
                    imports: chunk.imports.iter().map(|i| i.to_string()).collect(),
                });
            }
        }

        tracing::debug!(
            entries = request.entries.len(),
            chunks = chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "deps bundled"
        );
        Ok(BundleOutput { chunks })
    }
}
