//! # dpack-graph
//!
//! Foundation crate for the dpack dev server:
//!
//! - [`runtime`]: the filesystem abstraction every other crate goes through
//! - [`url`]: served url and module id conventions (`/@id/`, `/@fs/`, query markers)
//! - [`ModuleGraph`]: url/id/file indices over [`ModuleNode`]s and their edges
//! - [`hmr`]: update propagation through accept boundaries
//! - [`lexer`]: import/export and `import.meta.hot` extraction

pub mod error;
pub mod graph;
pub mod hmr;
pub mod lexer;
pub mod module;
pub mod runtime;
pub mod url;
pub mod utils;

pub use error::{GraphError, Result};
pub use graph::{
    ModuleGraph, ModuleInfo, ResolvedUrl, ResolvedUrlId, SharedModuleGraph, UrlResolver,
    resolve_url,
};
pub use hmr::{HmrBoundary, HmrOutcome, Update, UpdateKind, plan_updates, propagate_update};
pub use lexer::{ImportKind, ImportRecord, LexedModule, NamedBinding, lex_module};
pub use module::{FxIndexSet, ModuleId, ModuleKind, ModuleNode, TransformResult};
pub use runtime::{FileMetadata, NativeRuntime, Runtime, RuntimeError, RuntimeResult};
