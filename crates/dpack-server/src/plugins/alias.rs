use async_trait::async_trait;

use dpack_resolve::apply_alias;

use crate::error::Result;
use crate::plugin::{Enforce, Plugin, PluginContext, ResolveIdOptions, ResolvedId};

/// Rewrites specifiers matching `resolve.alias` and resolves the result
/// through the rest of the pipeline.
#[derive(Debug, Default)]
pub struct AliasPlugin;

#[async_trait]
impl Plugin for AliasPlugin {
    fn name(&self) -> &'static str {
        "dpack:alias"
    }

    fn enforce(&self) -> Enforce {
        Enforce::Pre
    }

    async fn resolve_id(
        &self,
        ctx: &PluginContext<'_>,
        id: &str,
        importer: Option<&str>,
        _options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        let Some(replaced) = apply_alias(&ctx.config().resolve.alias, id) else {
            return Ok(None);
        };
        tracing::debug!(id = %id, alias = %replaced, "alias");
        match ctx.resolve(&replaced, importer, true).await? {
            Some(resolved) => Ok(Some(resolved)),
            None => Ok(Some(ResolvedId::new(replaced))),
        }
    }
}
