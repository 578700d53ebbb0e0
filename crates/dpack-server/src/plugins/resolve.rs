use async_trait::async_trait;
use std::sync::Arc;

use dpack_resolve::{ResolveRequest, Resolver, load_marker_module};

use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, ResolveIdOptions, ResolvedId, SourceDescription};

/// Node-style resolution of specifiers, plus the code behind the
/// resolver's marker ids.
#[derive(Debug)]
pub struct ResolvePlugin {
    resolver: Arc<Resolver>,
}

impl ResolvePlugin {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Plugin for ResolvePlugin {
    fn name(&self) -> &'static str {
        "dpack:resolve"
    }

    async fn resolve_id(
        &self,
        _ctx: &PluginContext<'_>,
        id: &str,
        importer: Option<&str>,
        options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        let request = ResolveRequest {
            scan: options.scan,
            is_require: false,
        };
        let resolved = self.resolver.resolve(id, importer, request).await?;
        Ok(resolved.map(|r| ResolvedId {
            id: r.id,
            external: r.external,
            meta: None,
        }))
    }

    async fn load(&self, ctx: &PluginContext<'_>, id: &str) -> Result<Option<SourceDescription>> {
        Ok(load_marker_module(id, ctx.config().is_production).map(SourceDescription::new))
    }
}
