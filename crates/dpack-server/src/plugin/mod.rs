//! Plugin interface of the transform pipeline.
//!
//! A plugin implements any subset of the hooks; every hook has a no-op
//! default. The [`PluginContainer`] runs them in order: plugins are grouped
//! by [`Enforce`], and within a hook a plugin may move itself to the front
//! or back with [`Plugin::order`].

mod container;

pub use container::{PluginContainer, PluginContext, TransformedModule};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::server::ServerContext;

/// Which group of the pipeline a plugin runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Enforce {
    Pre,
    #[default]
    Normal,
    Post,
}

/// Position of one hook within its enforce group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOrder {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    BuildStart,
    ResolveId,
    Load,
    Transform,
    Close,
}

impl Hook {
    pub const ALL: [Hook; 5] = [
        Hook::BuildStart,
        Hook::ResolveId,
        Hook::Load,
        Hook::Transform,
        Hook::Close,
    ];
}

/// Result of a `resolve_id` hook
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedId {
    pub id: String,
    pub external: bool,
    pub meta: Option<serde_json::Value>,
}

impl ResolvedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: false,
            meta: None,
        }
    }

    pub fn external(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: true,
            meta: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveIdOptions {
    /// Called by the dependency scanner
    pub scan: bool,
}

/// Code produced by `load` or `transform`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub code: String,
    pub map: Option<String>,
}

impl SourceDescription {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Short identifier used in logs and error messages, e.g. `dpack:css`
    fn name(&self) -> &'static str;

    fn enforce(&self) -> Enforce {
        Enforce::Normal
    }

    fn order(&self, hook: Hook) -> Option<HookOrder> {
        let _ = hook;
        None
    }

    /// Called once the server owning this plugin is assembled. Plugins
    /// that need the server later keep a `Weak` to it.
    fn configure_server(&self, server: &Arc<ServerContext>) {
        let _ = server;
    }

    async fn build_start(&self, ctx: &PluginContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn resolve_id(
        &self,
        ctx: &PluginContext<'_>,
        id: &str,
        importer: Option<&str>,
        options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        let _ = (ctx, id, importer, options);
        Ok(None)
    }

    async fn load(&self, ctx: &PluginContext<'_>, id: &str) -> Result<Option<SourceDescription>> {
        let _ = (ctx, id);
        Ok(None)
    }

    async fn transform(
        &self,
        ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<SourceDescription>> {
        let _ = (ctx, code, id);
        Ok(None)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name()).finish()
    }
}
