use async_trait::async_trait;
use std::sync::Arc;

use dpack_config::ResolvedConfig;

use crate::error::{Result, ServerError};
use crate::html::{HtmlProxyCache, is_html_proxy};
use crate::plugin::{Enforce, Plugin, PluginContext, ResolveIdOptions, ResolvedId, SourceDescription};

/// Loads the inline module scripts cut out of served html pages.
///
/// Proxy ids are the page's file path plus the proxy query, so relative
/// imports in the script resolve next to the page.
#[derive(Debug)]
pub struct HtmlProxyPlugin {
    root: String,
    cache: Arc<HtmlProxyCache>,
}

impl HtmlProxyPlugin {
    pub fn new(config: &ResolvedConfig, cache: Arc<HtmlProxyCache>) -> Self {
        Self {
            root: config.root.trim_end_matches('/').to_string(),
            cache,
        }
    }
}

#[async_trait]
impl Plugin for HtmlProxyPlugin {
    fn name(&self) -> &'static str {
        "dpack:html-proxy"
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
        if !is_html_proxy(id) {
            return Ok(None);
        }
        if id.starts_with(&format!("{}/", self.root)) {
            return Ok(Some(ResolvedId::new(id)));
        }
        Ok(Some(ResolvedId::new(format!("{}{id}", self.root))))
    }

    async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<SourceDescription>> {
        if !is_html_proxy(id) {
            return Ok(None);
        }
        let url = id.strip_prefix(&self.root).unwrap_or(id);
        match self.cache.get(url) {
            Some(code) => Ok(Some(SourceDescription::new(code))),
            None => Err(ServerError::transform(
                self.name(),
                id,
                "no inline script recorded for this page, reload it",
            )),
        }
    }
}
