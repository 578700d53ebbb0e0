use async_trait::async_trait;

use dpack_config::{HMR_PROTOCOL, ResolvedConfig};
use dpack_graph::url::CLIENT_PUBLIC_PATH;

use crate::error::Result;
use crate::plugin::{Enforce, Plugin, PluginContext, ResolveIdOptions, ResolvedId, SourceDescription};

const CLIENT_SOURCE: &str = include_str!("../../assets/client.js");

/// Serves the browser client at `/@dpack/client`.
#[derive(Debug)]
pub struct ClientPlugin {
    code: String,
}

impl ClientPlugin {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            code: render_client(config),
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// The client with this server's settings filled in.
pub fn render_client(config: &ResolvedConfig) -> String {
    let hmr = config.server.hmr.as_ref();
    CLIENT_SOURCE
        .replace("__DPACK_BASE__", &js_string(&config.base))
        .replace("__DPACK_HMR_ENABLED__", &hmr.is_some().to_string())
        .replace(
            "__DPACK_HMR_PATH__",
            &js_string(hmr.map_or(dpack_config::DEFAULT_HMR_PATH, |h| h.path.as_str())),
        )
        .replace("__DPACK_HMR_PROTOCOL__", &js_string(HMR_PROTOCOL))
        .replace(
            "__DPACK_HMR_TIMEOUT__",
            &hmr.map_or(30_000, |h| h.timeout).to_string(),
        )
        .replace(
            "__DPACK_HMR_OVERLAY__",
            &hmr.is_some_and(|h| h.overlay).to_string(),
        )
}

#[async_trait]
impl Plugin for ClientPlugin {
    fn name(&self) -> &'static str {
        "dpack:client"
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
        if id == CLIENT_PUBLIC_PATH {
            return Ok(Some(ResolvedId::new(CLIENT_PUBLIC_PATH)));
        }
        Ok(None)
    }

    async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<SourceDescription>> {
        if id == CLIENT_PUBLIC_PATH {
            return Ok(Some(SourceDescription::new(self.code.clone())));
        }
        Ok(None)
    }
}
