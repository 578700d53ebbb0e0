//! # dpack-server
//!
//! The dpack dev server: serves project modules on demand, rewriting each
//! one's imports to urls the browser can fetch, and keeps open pages in
//! sync through hot module replacement.
//!
//! ## Request flow
//!
//! 1. [`middleware`] decides whether a url is a module request
//! 2. [`transform_request`] resolves, loads and transforms it through the
//!    [`PluginContainer`], sharing in-flight work between requests
//! 3. the import analysis plugin rewrites specifiers and records edges in
//!    the module graph
//!
//! Html pages are served with their inline module scripts moved out to
//! [`html`] proxy modules, which then take the same path.
//!
//! ## Updates
//!
//! The [`watcher`] feeds file changes to [`hmr`], which plans updates over
//! the module graph and broadcasts them on the [`HmrChannel`].

pub mod cjs_interop;
pub mod error;
pub mod hmr;
pub mod html;
pub mod middleware;
pub mod plugin;
pub mod plugins;
pub mod server;
pub mod splice;
pub mod transform;
pub mod watcher;
pub mod ws;

pub use error::{ERR_CLOSED_SERVER, ERR_LOAD_URL, Result, ServerError};
pub use hmr::{handle_file_change, update_modules};
pub use html::{HtmlProxyCache, html_proxy_url, is_html_proxy, proxy_inline_modules};
pub use middleware::{PING_PATH, handle_request, inject_client_script};
pub use plugin::{
    Enforce, Hook, HookOrder, Plugin, PluginContainer, PluginContext, ResolveIdOptions,
    ResolvedId, SourceDescription, TransformedModule,
};
pub use server::{
    DevServer, INVALIDATE_EVENT, ServerContext, ServerOptions, create_server,
    create_server_with_config, server_url,
};
pub use splice::Splicer;
pub use transform::{etag, transform_request};
pub use watcher::{FileChange, FileWatcher, IgnoreMatcher};
pub use ws::{ErrorPayload, HmrChannel, HmrClient, HmrPayload};
