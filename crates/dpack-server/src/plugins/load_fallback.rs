use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use dpack_graph::Runtime;
use dpack_graph::url::clean_url;
use dpack_graph::utils::normalize_path;

use crate::error::Result;
use crate::plugin::{Enforce, Plugin, PluginContext, SourceDescription};

/// Reads ids no other plugin loaded straight from disk.
#[derive(Debug)]
pub struct LoadFallbackPlugin {
    runtime: Arc<dyn Runtime>,
}

impl LoadFallbackPlugin {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Plugin for LoadFallbackPlugin {
    fn name(&self) -> &'static str {
        "dpack:load-fallback"
    }

    fn enforce(&self) -> Enforce {
        Enforce::Post
    }

    async fn load(&self, ctx: &PluginContext<'_>, id: &str) -> Result<Option<SourceDescription>> {
        let file = clean_url(id);
        if !file.starts_with('/') && !file.contains(':') {
            return Ok(None);
        }
        let config = ctx.config();
        let normalized = normalize_path(file);
        let in_cache = normalized
            .strip_prefix(config.cache_dir.as_str())
            .is_some_and(|rest| rest.starts_with('/'));
        if !in_cache && !config.is_fs_allowed(&normalized) {
            debug!(file = %normalized, "not loading file outside the allowed directories");
            return Ok(None);
        }
        match self.runtime.read_to_string(Path::new(file)).await {
            Ok(code) => Ok(Some(SourceDescription::new(code))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
