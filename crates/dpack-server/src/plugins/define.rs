use async_trait::async_trait;

use dpack_config::ResolvedConfig;
use dpack_graph::url::{CLIENT_PUBLIC_PATH, clean_url, is_css_request, is_js_request};
use dpack_optimizer::replace_defines;

use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, SourceDescription};

/// Replaces `process.env.NODE_ENV`, `import.meta.env.*` and the configured
/// `define` entries in served JS.
#[derive(Debug)]
pub struct DefinePlugin {
    replacements: Vec<(String, String)>,
    deps_cache_dir: String,
}

impl DefinePlugin {
    pub fn new(config: &ResolvedConfig) -> Self {
        let node_env = if config.is_production { "production" } else { "development" };
        let mut replacements = vec![
            ("process.env.NODE_ENV".to_string(), format!("\"{node_env}\"")),
            (
                "import.meta.env.MODE".to_string(),
                serde_json::to_string(&config.mode).unwrap_or_default(),
            ),
            (
                "import.meta.env.BASE_URL".to_string(),
                serde_json::to_string(&config.base).unwrap_or_default(),
            ),
            ("import.meta.env.DEV".to_string(), (!config.is_production).to_string()),
            ("import.meta.env.PROD".to_string(), config.is_production.to_string()),
        ];
        for (key, value) in &config.define {
            replacements.retain(|(existing, _)| existing != key);
            replacements.push((key.clone(), value.clone()));
        }
        Self {
            replacements,
            deps_cache_dir: config.deps_cache_dir(),
        }
    }
}

#[async_trait]
impl Plugin for DefinePlugin {
    fn name(&self) -> &'static str {
        "dpack:define"
    }

    async fn transform(
        &self,
        _ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<SourceDescription>> {
        // Pre-bundled deps had their defines applied by the bundler
        if id.starts_with(&self.deps_cache_dir)
            || id.starts_with(CLIENT_PUBLIC_PATH)
            || is_css_request(id)
            || !is_js_request(clean_url(id))
        {
            return Ok(None);
        }
        Ok(replace_defines(code, &self.replacements).map(SourceDescription::new))
    }
}
