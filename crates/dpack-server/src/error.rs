//! Errors raised while serving modules.
//!
//! Some kinds are expected during normal operation (an optimized dep still
//! bundling, a url no plugin can load) and carry a stable code so the
//! middleware can turn them into a status code or a fall-through instead
//! of an error page.

use std::sync::Arc;
use thiserror::Error;

use dpack_config::ConfigError;
use dpack_graph::{GraphError, RuntimeError};
use dpack_optimizer::OptimizeError;
use dpack_resolve::ResolveError;

pub type Result<T> = std::result::Result<T, ServerError>;

pub const ERR_LOAD_URL: &str = "ERR_LOAD_URL";
pub const ERR_CLOSED_SERVER: &str = "ERR_CLOSED_SERVER";

#[derive(Debug, Error)]
pub enum ServerError {
    /// No plugin produced code for the url and it is not a file on disk
    #[error("Failed to load url {url} (resolved id: {id}). Does the file exist?")]
    LoadUrl { url: String, id: String },

    /// A plugin hook failed for a module
    #[error("[plugin {plugin}] {id}: {message}")]
    Transform {
        plugin: String,
        id: String,
        message: String,
    },

    /// An import in a served module could not be resolved
    #[error("Failed to resolve import \"{specifier}\" from \"{importer}\". Does the file exist?")]
    UnresolvedImport { specifier: String, importer: String },

    /// The request raced a restart or shutdown
    #[error("The server is being restarted or closed. Request is outdated")]
    Closed,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid watch ignore pattern: {0}")]
    WatchPattern(#[from] ignore::Error),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The outcome of a transform shared by several waiting requests
    #[error(transparent)]
    Shared(Arc<ServerError>),
}

impl ServerError {
    /// Stable code of the kinds handled specially by the middleware.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ServerError::LoadUrl { .. } => Some(ERR_LOAD_URL),
            ServerError::Closed => Some(ERR_CLOSED_SERVER),
            ServerError::Optimize(err) => err.code(),
            ServerError::Shared(err) => err.code(),
            _ => None,
        }
    }

    /// Plugin that raised the error, for the browser overlay
    pub fn plugin(&self) -> Option<&str> {
        match self {
            ServerError::Transform { plugin, .. } => Some(plugin),
            ServerError::Shared(err) => err.plugin(),
            _ => None,
        }
    }

    /// Module the error is about, when known
    pub fn id(&self) -> Option<&str> {
        match self {
            ServerError::Transform { id, .. } | ServerError::LoadUrl { id, .. } => Some(id),
            ServerError::UnresolvedImport { importer, .. } => Some(importer),
            ServerError::Shared(err) => err.id(),
            _ => None,
        }
    }

    pub fn transform(plugin: &str, id: &str, message: impl std::fmt::Display) -> Self {
        ServerError::Transform {
            plugin: plugin.to_string(),
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}
