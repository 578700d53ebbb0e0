//! The resolver: specifier + importer -> canonical id.

use parking_lot::RwLock;
use std::path::Path;
use std::sync::{Arc, Weak};

use dpack_graph::Runtime;
use dpack_graph::url::{
    DEP_VERSION_RE, FS_PREFIX, clean_url, fs_path_from_id, inject_query, is_bare_import,
    is_data_url, is_external_url, is_ts_request,
};
use dpack_graph::utils::normalize_path;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::fs_resolve::FsProbe;
use crate::node_resolve::{is_node_builtin, is_optimizable, node_builtin_external};
use crate::optimizer_handle::DepsOptimizerHandle;
use crate::options::{BROWSER_EXTERNAL_ID, ResolveOptions, ResolveRequest};
use crate::package::PackageCache;

static NODE_MODULES_IN_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|/)node_modules/").expect("static regex"));
static WORD_START_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w").expect("static regex"));
static WINDOWS_ABSOLUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]:[/\\]").expect("static regex"));

/// A resolved id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: String,
    /// Left to the browser (`https://...`), never loaded by the server
    pub external: bool,
}

impl Resolved {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: false,
        }
    }

    pub fn external(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: true,
        }
    }
}

fn is_non_drive_relative_absolute(id: &str) -> bool {
    if cfg!(windows) {
        WINDOWS_ABSOLUTE_RE.is_match(id)
    } else {
        id.starts_with('/')
    }
}

pub struct Resolver {
    options: ResolveOptions,
    runtime: Arc<dyn Runtime>,
    packages: Arc<PackageCache>,
    deps_optimizer: RwLock<Option<Weak<dyn DepsOptimizerHandle>>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("root", &self.options.root)
            .field("has_deps_optimizer", &self.deps_optimizer().is_some())
            .finish()
    }
}

impl Resolver {
    pub fn new(options: ResolveOptions, runtime: Arc<dyn Runtime>) -> Self {
        Self::with_package_cache(options, runtime, Arc::new(PackageCache::new()))
    }

    pub fn with_package_cache(
        options: ResolveOptions,
        runtime: Arc<dyn Runtime>,
        packages: Arc<PackageCache>,
    ) -> Self {
        Self {
            options,
            runtime,
            packages,
            deps_optimizer: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn package_cache(&self) -> &Arc<PackageCache> {
        &self.packages
    }

    /// Attach the optimizer consulted for bare imports.
    pub fn set_deps_optimizer(&self, optimizer: Weak<dyn DepsOptimizerHandle>) {
        *self.deps_optimizer.write() = Some(optimizer);
    }

    pub fn deps_optimizer(&self) -> Option<Arc<dyn DepsOptimizerHandle>> {
        self.deps_optimizer.read().as_ref().and_then(Weak::upgrade)
    }

    fn call_options(&self, importer: Option<&str>, request: ResolveRequest) -> ResolveOptions {
        let mut options = self.options.clone();
        options.scan = request.scan || options.scan;
        options.is_require = request.is_require;
        options.is_from_ts_importer =
            options.is_from_ts_importer || importer.is_some_and(|i| is_ts_request(clean_url(i)));
        options
    }

    /// Probe a filesystem path with this resolver's extensions.
    pub fn try_fs_resolve(&self, fs_path: &str) -> Result<Option<String>> {
        FsProbe {
            runtime: self.runtime.as_ref(),
            packages: &self.packages,
            options: &self.options,
        }
        .try_fs_resolve(fs_path)
    }

    /// Resolve `id` imported from `importer`.
    ///
    /// Precedence: optimized dep urls, `/@fs/` paths, root-relative paths,
    /// relative specifiers, drive-relative paths, absolute paths, external
    /// urls, data urls, bare imports.
    pub async fn resolve(
        &self,
        id: &str,
        importer: Option<&str>,
        request: ResolveRequest,
    ) -> Result<Option<Resolved>> {
        if id.starts_with(BROWSER_EXTERNAL_ID) {
            return Ok(Some(Resolved::new(id)));
        }
        if id.starts_with('\0') {
            return Ok(None);
        }

        let options = self.call_options(importer, request);
        let probe = FsProbe {
            runtime: self.runtime.as_ref(),
            packages: &self.packages,
            options: &options,
        };
        let deps_optimizer = if options.scan {
            None
        } else {
            self.deps_optimizer()
        };
        let optimizer = deps_optimizer.as_deref();
        let root = options.root.trim_end_matches('/');

        if options.as_src {
            if let Some(optimizer) = optimizer {
                if optimizer.is_optimized_dep_url(id) {
                    let optimized = if id.starts_with(FS_PREFIX) {
                        fs_path_from_id(id)
                    } else {
                        normalize_path(format!("{root}{id}"))
                    };
                    return Ok(Some(Resolved::new(optimized)));
                }
            }

            if id.starts_with(FS_PREFIX) {
                let fs_path = fs_path_from_id(id);
                let res = probe.try_fs_resolve(&fs_path)?.unwrap_or(fs_path);
                let res = self.ensure_version_query(&res, id, optimizer);
                tracing::debug!(id = %id, resolved = %res, "[@fs]");
                return Ok(Some(Resolved::new(res)));
            }

            if id.starts_with('/') {
                if let Some(res) = probe.try_fs_resolve(&format!("{root}{id}"))? {
                    tracing::debug!(id = %id, resolved = %res, "[url]");
                    return Ok(Some(Resolved::new(self.ensure_version_query(
                        &res, id, optimizer,
                    ))));
                }
            }
        }

        let importer_is_html = importer.is_some_and(|i| clean_url(i).ends_with(".html"));
        if id.starts_with('.')
            || ((options.prefer_relative || importer_is_html) && WORD_START_RE.is_match(id))
        {
            let basedir = importer
                .map(clean_url)
                .and_then(|i| Path::new(i).parent())
                .unwrap_or_else(|| Path::new(&options.root));
            let fs_path = normalize_path(basedir.join(id));

            if let Some(optimizer) = optimizer {
                if optimizer.is_optimized_dep_file(&fs_path) {
                    if !DEP_VERSION_RE.is_match(&fs_path) {
                        if let Some(info) = optimizer.dep_info_from_file(&fs_path) {
                            if !info.browser_hash.is_empty() {
                                return Ok(Some(Resolved::new(inject_query(
                                    &fs_path,
                                    &format!("v={}", info.browser_hash),
                                ))));
                            }
                        }
                    }
                    return Ok(Some(Resolved::new(fs_path)));
                }
            }

            if let Some(res) = probe.try_fs_resolve(&fs_path)? {
                let res = self.ensure_version_query(&res, id, optimizer);
                tracing::debug!(id = %id, resolved = %res, "[relative]");
                return Ok(Some(Resolved::new(res)));
            }
        }

        // `/foo` on windows is relative to the importer's drive
        if cfg!(windows) && id.starts_with('/') {
            let basedir = importer
                .map(clean_url)
                .and_then(|i| Path::new(i).parent())
                .unwrap_or_else(|| Path::new(&options.root));
            let fs_path = normalize_path(basedir.join(id));
            if let Some(res) = probe.try_fs_resolve(&fs_path)? {
                return Ok(Some(Resolved::new(res)));
            }
        }

        if is_non_drive_relative_absolute(id) {
            if let Some(res) = probe.try_fs_resolve(id)? {
                let res = self.ensure_version_query(&res, id, optimizer);
                tracing::debug!(id = %id, resolved = %res, "[fs]");
                return Ok(Some(Resolved::new(res)));
            }
        }

        if is_external_url(id) {
            return Ok(Some(Resolved::external(id)));
        }

        if is_data_url(id) {
            return Ok(None);
        }

        if is_bare_import(id) {
            if options.as_src {
                if let Some(optimizer) = optimizer {
                    if let Some(res) = self.try_optimized_resolve(&probe, optimizer, id, importer).await? {
                        return Ok(Some(Resolved::new(res)));
                    }
                }
            }

            if let Some(res) = probe.try_node_resolve(id, importer, optimizer)? {
                tracing::debug!(id = %id, resolved = %res.id, "[node]");
                return Ok(Some(res));
            }

            if is_node_builtin(id) {
                tracing::debug!(id = %id, "externalized node built-in for the browser");
                return Ok(Some(Resolved::new(node_builtin_external(
                    id,
                    options.is_production,
                ))));
            }
        }

        tracing::debug!(id = %id, importer = ?importer, "unresolved");
        Ok(None)
    }

    /// Look a bare id up in the optimizer's metadata, including deps that
    /// were optimized as part of a nested chain (`pkg > dep`).
    async fn try_optimized_resolve(
        &self,
        probe: &FsProbe<'_>,
        optimizer: &dyn DepsOptimizerHandle,
        id: &str,
        importer: Option<&str>,
    ) -> Result<Option<String>> {
        optimizer.scan_processing().await;

        if let Some(info) = optimizer.dep_info_from_id(id) {
            return Ok(Some(info.optimized_id()));
        }
        let Some(importer) = importer else {
            return Ok(None);
        };

        // Resolved lazily, and at most once
        let mut nested_src: Option<Option<String>> = None;
        for info in optimizer.dep_infos() {
            let Some(src) = &info.src else {
                continue;
            };
            if !info.id.ends_with(id) {
                continue;
            }
            if nested_src.is_none() {
                nested_src = Some(
                    probe
                        .try_node_resolve(id, Some(importer), None)
                        .ok()
                        .flatten()
                        .map(|r| r.id),
                );
            }
            match nested_src.as_ref().and_then(Option::as_ref) {
                Some(resolved) if resolved == src => return Ok(Some(info.optimized_id())),
                Some(_) => {}
                None => break,
            }
        }
        Ok(None)
    }

    /// Direct imports of node_modules files get the same version query a
    /// bare import would, so the browser caches them by generation.
    fn ensure_version_query(
        &self,
        resolved: &str,
        id: &str,
        optimizer: Option<&dyn DepsOptimizerHandle>,
    ) -> String {
        let Some(optimizer) = optimizer else {
            return resolved.to_string();
        };
        let is_node_module = NODE_MODULES_IN_PATH_RE.is_match(&normalize_path(id))
            || NODE_MODULES_IN_PATH_RE.is_match(resolved);
        if is_node_module && !DEP_VERSION_RE.is_match(resolved) {
            let browser_hash = optimizer.browser_hash();
            if !browser_hash.is_empty() && is_optimizable(resolved) {
                return inject_query(resolved, &format!("v={browser_hash}"));
            }
        }
        resolved.to_string()
    }
}
