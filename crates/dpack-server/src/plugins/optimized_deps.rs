use async_trait::async_trait;
use std::sync::Arc;

use dpack_optimizer::DepsOptimizer;
use dpack_resolve::DepsOptimizerHandle;

use crate::error::Result;
use crate::plugin::{Enforce, Plugin, PluginContext, ResolveIdOptions, ResolvedId, SourceDescription};

/// Serves pre-bundled dependencies. A load waits for the bundle the
/// requested file belongs to.
#[derive(Debug)]
pub struct OptimizedDepsPlugin {
    optimizer: Arc<DepsOptimizer>,
}

impl OptimizedDepsPlugin {
    pub fn new(optimizer: Arc<DepsOptimizer>) -> Self {
        Self { optimizer }
    }
}

#[async_trait]
impl Plugin for OptimizedDepsPlugin {
    fn name(&self) -> &'static str {
        "dpack:optimized-deps"
    }

    fn enforce(&self) -> Enforce {
        Enforce::Pre
    }

    async fn resolve_id(
        &self,
        _ctx: &PluginContext<'_>,
        id: &str,
        _importer: Option<&str>,
        _options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        if self.optimizer.is_optimized_dep_file(id) {
            return Ok(Some(ResolvedId::new(id)));
        }
        Ok(None)
    }

    async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<SourceDescription>> {
        if !self.optimizer.is_optimized_dep_file(id) {
            return Ok(None);
        }
        let code = self.optimizer.load_optimized_dep(id).await?;
        Ok(Some(SourceDescription::new(code)))
    }
}
