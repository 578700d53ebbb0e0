//! CSS served as a module.
//!
//! An imported stylesheet becomes a JS module that injects its text and
//! accepts its own updates, so editing it yields a `css-update`. A
//! stylesheet requested with `?direct` is served as plain CSS.

use async_trait::async_trait;

use dpack_graph::url::{CLIENT_PUBLIC_PATH, is_css_request, is_direct_css_request};

use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, SourceDescription};

#[derive(Debug, Default)]
pub struct CssPlugin;

/// JS module that applies `css` under the style id `url`.
pub fn css_module(url: &str, css: &str) -> String {
    let id = serde_json::to_string(url).unwrap_or_default();
    let css = serde_json::to_string(css).unwrap_or_default();
    format!(
        "import {{ updateStyle as __dpack__updateStyle, removeStyle as __dpack__removeStyle }} from \"{CLIENT_PUBLIC_PATH}\"\n\
         const __dpack__id = {id}\n\
         const __dpack__css = {css}\n\
         __dpack__updateStyle(__dpack__id, __dpack__css)\n\
         import.meta.hot && import.meta.hot.accept()\n\
         import.meta.hot && import.meta.hot.prune(() => __dpack__removeStyle(__dpack__id))\n\
         export default __dpack__css\n"
    )
}

#[async_trait]
impl Plugin for CssPlugin {
    fn name(&self) -> &'static str {
        "dpack:css"
    }

    async fn transform(
        &self,
        ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<SourceDescription>> {
        if !is_css_request(id) || is_direct_css_request(id) {
            return Ok(None);
        }

        let url = {
            let graph = ctx.module_graph().read();
            graph
                .module_by_id(id)
                .and_then(|m| graph.node(m))
                .map(|n| n.url.clone())
        };
        let url = url.unwrap_or_else(|| id.to_string());
        Ok(Some(SourceDescription::new(css_module(&url, code))))
    }
}
