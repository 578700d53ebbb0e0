//! # dpack-resolve
//!
//! Maps import specifiers to canonical ids for the dev server: files on
//! disk, packages in `node_modules` (with `exports` maps, main fields and
//! nested `a > b` chains), externals and virtual markers.
//!
//! Bare imports that land in `node_modules` are handed to the dependency
//! optimizer through [`DepsOptimizerHandle`], which returns the
//! pre-bundled location before the bundle exists.

pub mod alias;
pub mod error;
pub mod exports;
pub mod fs_resolve;
pub mod markers;
pub mod node_resolve;
pub mod optimizer_handle;
pub mod options;
pub mod package;
pub mod resolver;

pub use alias::apply_alias;
pub use error::{ResolveError, Result};
pub use exports::{ExportConditions, ExportsMiss, resolve_exports};
pub use fs_resolve::{FsProbe, has_esm_syntax, split_file_and_postfix};
pub use markers::{is_marker_id, load_marker_module};
pub use node_resolve::{is_node_builtin, is_optimizable};
pub use optimizer_handle::{DepsOptimizerHandle, OptimizedDepRef};
pub use options::{BROWSER_EXTERNAL_ID, OPTIONAL_PEER_DEP_ID, ResolveOptions, ResolveRequest};
pub use package::{PackageCache, PackageData};
pub use resolver::{Resolved, Resolver};
