//! # dpack-optimizer
//!
//! Dependency pre-bundling for the dpack dev server.
//!
//! - [`scan`]: finds the bare imports reachable from the project's entries
//! - [`DepsOptimizer`]: bundles them with a [`DepBundler`] into
//!   `<cacheDir>/deps`, one ESM file per dependency, and keeps that
//!   directory current as new imports show up at request time
//! - [`Processing`]: the gate a request waits on before reading a bundle
//! - [`OptimizerRegistry`]: one optimizer per resolved config

pub mod bundler;
pub mod error;
pub mod hash;
pub mod interop;
pub mod metadata;
pub mod optimizer;
pub mod processing;
pub mod registry;
pub mod scan;

pub use bundler::{
    BundleOutput, BundleRequest, BundledChunk, DepBundler, DepEntry, DepPreBundlePlugin,
    RolldownDepBundler, replace_defines,
};
pub use error::{
    ERR_OPTIMIZE_DEPS_PROCESSING_ERROR, ERR_OUTDATED_OPTIMIZED_DEP, OptimizeError, Result,
};
pub use interop::{ExportsData, needs_interop};
pub use metadata::{DepOptimizationMetadata, METADATA_FILE, OptimizedDepInfo};
pub use optimizer::{DepsOptimizer, OptimizerEvent, OptimizerState};
pub use processing::{Processing, ProcessingHandle, ProcessingState, processing};
pub use registry::OptimizerRegistry;
pub use scan::{ScanResult, compute_entries, scan_imports};
