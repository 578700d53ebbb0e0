//! package.json data and the caches around it.
//!
//! Package lookups happen for nearly every bare import, so results are
//! cached twice: once by the `(id, basedir, preserve_symlinks)` triple that
//! located the package, and once by the real path of its package.json so two
//! lookups that land on the same package share one [`PackageData`] (and its
//! resolved-entry cache).

use dashmap::DashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dpack_graph::Runtime;
use dpack_graph::utils::normalize_path;

use crate::error::{ResolveError, Result};

/// A parsed package.json plus the directory it lives in.
#[derive(Debug)]
pub struct PackageData {
    /// Normalized package directory
    pub dir: String,
    pub data: Value,
    resolved: DashMap<String, String>,
}

impl PackageData {
    pub fn new(dir: impl Into<String>, data: Value) -> Self {
        Self {
            dir: dir.into(),
            data,
            resolved: DashMap::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(Value::as_str)
    }

    pub fn version(&self) -> Option<&str> {
        self.data.get("version").and_then(Value::as_str)
    }

    /// A top-level string field such as `main`, `module` or `jsnext:main`.
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    pub fn exports(&self) -> Option<&Value> {
        self.data.get("exports").filter(|v| !v.is_null())
    }

    pub fn browser(&self) -> Option<&Value> {
        self.data.get("browser")
    }

    /// Whether `dep` is declared as an optional peer dependency.
    pub fn is_optional_peer_dep(&self, dep: &str) -> bool {
        let declared = self
            .data
            .get("peerDependencies")
            .and_then(|p| p.get(dep))
            .is_some();
        let optional = self
            .data
            .get("peerDependenciesMeta")
            .and_then(|m| m.get(dep))
            .and_then(|m| m.get("optional"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        declared && optional
    }

    pub fn get_resolved(&self, key: &str) -> Option<String> {
        self.resolved.get(key).map(|v| v.clone())
    }

    pub fn set_resolved(&self, key: &str, entry: String) {
        self.resolved.insert(key.to_string(), entry);
    }
}

/// `node_modules` directories searched from `basedir`, nearest first.
/// Directories that are themselves named `node_modules` are skipped so
/// lookups never produce `node_modules/node_modules`.
pub fn node_modules_paths(basedir: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    basedir
        .ancestors()
        .filter(|dir| dir.file_name().is_none_or(|name| name != "node_modules"))
        .map(|dir| dir.join("node_modules"))
}

#[derive(Debug, Default)]
pub struct PackageCache {
    by_lookup: DashMap<String, Arc<PackageData>>,
    by_path: DashMap<String, Arc<PackageData>>,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.by_lookup.clear();
        self.by_path.clear();
    }

    /// Locate `<id>/package.json` by walking the `node_modules` chain up
    /// from `basedir`.
    pub fn resolve_package_data(
        &self,
        runtime: &dyn Runtime,
        id: &str,
        basedir: &Path,
        preserve_symlinks: bool,
    ) -> Result<Option<Arc<PackageData>>> {
        let key = format!("{id}&{}&{preserve_symlinks}", normalize_path(basedir));
        if let Some(pkg) = self.by_lookup.get(&key) {
            return Ok(Some(pkg.clone()));
        }

        let Some(pkg_path) = node_modules_paths(basedir)
            .map(|dir| dir.join(id).join("package.json"))
            .find(|candidate| runtime.is_file(candidate))
        else {
            return Ok(None);
        };

        let pkg = self.load_package_data(runtime, &pkg_path, preserve_symlinks)?;
        self.by_lookup.insert(key, pkg.clone());
        Ok(Some(pkg))
    }

    /// Read and cache the package.json at `pkg_path`.
    pub fn load_package_data(
        &self,
        runtime: &dyn Runtime,
        pkg_path: &Path,
        preserve_symlinks: bool,
    ) -> Result<Arc<PackageData>> {
        let pkg_path = if preserve_symlinks {
            pkg_path.to_path_buf()
        } else {
            runtime.canonicalize(pkg_path)?
        };
        let key = normalize_path(&pkg_path);
        if let Some(pkg) = self.by_path.get(&key) {
            return Ok(pkg.clone());
        }

        let content = runtime.read_to_string_sync(&pkg_path)?;
        let data: Value =
            serde_json::from_str(&content).map_err(|e| ResolveError::InvalidPackageJson {
                path: key.clone(),
                message: e.to_string(),
            })?;
        let dir = pkg_path
            .parent()
            .map(normalize_path)
            .unwrap_or_else(|| key.clone());

        let pkg = Arc::new(PackageData::new(dir, data));
        self.by_path.insert(key, pkg.clone());
        Ok(pkg)
    }

    /// CommonJS-style resolution of a bare `id` from `basedir`: the package's
    /// `main` (or `index.js`), or a file below the package for deep ids.
    /// Used where only the physical location of a dependency matters.
    pub fn resolve_from(
        &self,
        runtime: &dyn Runtime,
        id: &str,
        basedir: &Path,
        preserve_symlinks: bool,
        extensions: &[String],
    ) -> Option<String> {
        let (pkg_name, subpath) = dpack_graph::url::split_deep_import(id).unwrap_or((id, ""));

        for node_modules in node_modules_paths(basedir) {
            let pkg_dir = node_modules.join(pkg_name);
            if !runtime.is_dir(&pkg_dir) {
                continue;
            }

            let target = if subpath.is_empty() {
                let main = runtime
                    .is_file(&pkg_dir.join("package.json"))
                    .then(|| {
                        self.load_package_data(runtime, &pkg_dir.join("package.json"), true)
                            .ok()
                    })
                    .flatten()
                    .and_then(|pkg| pkg.field_str("main").map(str::to_string))
                    .unwrap_or_else(|| "index.js".to_string());
                pkg_dir.join(main)
            } else {
                pkg_dir.join(subpath)
            };

            let found = probe_cjs_file(runtime, &target, extensions)?;
            return Some(if preserve_symlinks {
                normalize_path(&found)
            } else {
                runtime
                    .canonicalize(&found)
                    .map(normalize_path)
                    .unwrap_or_else(|_| normalize_path(&found))
            });
        }
        None
    }
}

fn probe_cjs_file(runtime: &dyn Runtime, target: &Path, extensions: &[String]) -> Option<PathBuf> {
    if runtime.is_file(target) {
        return Some(target.to_path_buf());
    }
    let base = target.to_string_lossy();
    extensions
        .iter()
        .map(|ext| PathBuf::from(format!("{base}{ext}")))
        .chain(
            extensions
                .iter()
                .map(|ext| target.join(format!("index{ext}"))),
        )
        .find(|candidate| runtime.is_file(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpack_graph::NativeRuntime;
    use std::fs;
    use tempfile::TempDir;

    fn write_pkg(root: &Path, name: &str, json: &str) {
        let dir = root.join("node_modules").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), json).unwrap();
    }

    #[test]
    fn test_resolve_package_data_walks_up() {
        let temp = TempDir::new().unwrap();
        write_pkg(temp.path(), "dep", r#"{ "name": "dep", "version": "1.0.0" }"#);
        fs::create_dir_all(temp.path().join("src/deep")).unwrap();

        let cache = PackageCache::new();
        let runtime = NativeRuntime::new();
        let pkg = cache
            .resolve_package_data(&runtime, "dep", &temp.path().join("src/deep"), false)
            .unwrap()
            .unwrap();
        assert_eq!(pkg.name(), Some("dep"));
        assert_eq!(pkg.version(), Some("1.0.0"));
        assert!(pkg.dir.ends_with("/node_modules/dep"));

        // Same package through a different lookup shares the instance
        let again = cache
            .resolve_package_data(&runtime, "dep", temp.path(), false)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&pkg, &again));
    }

    #[test]
    fn test_missing_package_is_none() {
        let temp = TempDir::new().unwrap();
        let cache = PackageCache::new();
        let found = cache
            .resolve_package_data(&NativeRuntime::new(), "nope", temp.path(), false)
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_invalid_package_json() {
        let temp = TempDir::new().unwrap();
        write_pkg(temp.path(), "bad", "{ nope");
        let err = PackageCache::new()
            .resolve_package_data(&NativeRuntime::new(), "bad", temp.path(), false)
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidPackageJson { .. }));
    }

    #[test]
    fn test_optional_peer_dep() {
        let pkg = PackageData::new(
            "/x",
            serde_json::json!({
                "peerDependencies": { "a": "*", "b": "*" },
                "peerDependenciesMeta": { "a": { "optional": true } }
            }),
        );
        assert!(pkg.is_optional_peer_dep("a"));
        assert!(!pkg.is_optional_peer_dep("b"));
        assert!(!pkg.is_optional_peer_dep("c"));
    }

    #[test]
    fn test_node_modules_paths_skip_node_modules_dirs() {
        let paths: Vec<_> = node_modules_paths(Path::new("/a/node_modules/b")).collect();
        assert_eq!(paths[0], PathBuf::from("/a/node_modules/b/node_modules"));
        assert_eq!(paths[1], PathBuf::from("/a/node_modules"));
        assert!(!paths.contains(&PathBuf::from("/a/node_modules/node_modules")));
    }

    #[test]
    fn test_resolve_from_main_and_subpath() {
        let temp = TempDir::new().unwrap();
        write_pkg(temp.path(), "cjs", r#"{ "main": "lib/main" }"#);
        let lib = temp.path().join("node_modules/cjs/lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("main.js"), "").unwrap();
        fs::write(lib.join("other.js"), "").unwrap();

        let cache = PackageCache::new();
        let runtime = NativeRuntime::new();
        let exts = vec![".js".to_string()];
        let main = cache
            .resolve_from(&runtime, "cjs", temp.path(), false, &exts)
            .unwrap();
        assert!(main.ends_with("/node_modules/cjs/lib/main.js"));
        let other = cache
            .resolve_from(&runtime, "cjs/lib/other", temp.path(), false, &exts)
            .unwrap();
        assert!(other.ends_with("/node_modules/cjs/lib/other.js"));
        assert!(
            cache
                .resolve_from(&runtime, "missing", temp.path(), false, &exts)
                .is_none()
        );
    }
}
