//! Bare specifier resolution through `node_modules`.

use std::path::Path;

use dpack_graph::url::{OPTIMIZABLE_ENTRY_RE, SPECIAL_QUERY_RE, clean_url, extname, inject_query, is_bare_import};
use dpack_graph::utils::lookup_file;

use crate::error::Result;
use crate::fs_resolve::FsProbe;
use crate::optimizer_handle::DepsOptimizerHandle;
use crate::options::{BROWSER_EXTERNAL_ID, OPTIONAL_PEER_DEP_ID};
use crate::resolver::Resolved;

const NODE_BUILTINS: &[&str] = &[
    "assert", "async_hooks", "buffer", "child_process", "cluster", "console", "constants",
    "crypto", "dgram", "diagnostics_channel", "dns", "domain", "events", "fs", "http", "http2",
    "https", "inspector", "module", "net", "os", "path", "perf_hooks", "process", "punycode",
    "querystring", "readline", "repl", "stream", "string_decoder", "sys", "timers", "tls",
    "trace_events", "tty", "url", "util", "v8", "vm", "wasi", "worker_threads", "zlib",
];

/// `fs`, `node:fs`, `fs/promises`
pub fn is_node_builtin(id: &str) -> bool {
    let id = id.strip_prefix("node:").unwrap_or(id);
    let name = id.split('/').next().unwrap_or(id);
    NODE_BUILTINS.contains(&name)
}

pub(crate) fn node_builtin_external(id: &str, is_production: bool) -> String {
    if is_production {
        BROWSER_EXTERNAL_ID.to_string()
    } else {
        format!("{BROWSER_EXTERNAL_ID}:{id}")
    }
}

/// Files the optimizer can pre-bundle
pub fn is_optimizable(file: &str) -> bool {
    OPTIMIZABLE_ENTRY_RE.is_match(clean_url(file))
}

/// `a > b > c` -> (`a > b`, `c`)
fn split_nested(id: &str) -> (&str, &str) {
    match id.rfind('>') {
        Some(i) => (id[..i].trim(), id[i + 1..].trim()),
        None => ("", id),
    }
}

/// Every prefix of `nested_path` that could name a package, shortest first.
/// `@scope/pkg/a/b` -> [`@scope/pkg`, `@scope/pkg/a`, `@scope/pkg/a/b`].
/// Segments with an extension are skipped past the first one.
fn possible_package_ids(nested_path: &str) -> Vec<&str> {
    let mut ids = Vec::new();
    let mut end = 0;
    for (index, part) in nested_path.split('/').enumerate() {
        if part.is_empty() {
            break;
        }
        end += if index == 0 { part.len() } else { part.len() + 1 };
        let skip = if ids.is_empty() {
            part.starts_with('@')
        } else {
            !extname(part).is_empty()
        };
        if !skip {
            ids.push(&nested_path[..end]);
        }
    }
    ids
}

impl FsProbe<'_> {
    /// Resolve `pkg > dep` chains by hopping through each package's
    /// location.
    fn nested_resolve_from(&self, chain: &str, basedir: &Path) -> Option<String> {
        let mut current = basedir.to_path_buf();
        for pkg in chain.split('>').map(str::trim) {
            let next = self.packages.resolve_from(
                self.runtime,
                pkg,
                &current,
                self.options.preserve_symlinks,
                &self.options.extensions,
            )?;
            current = next.into();
        }
        Some(dpack_graph::utils::normalize_path(current))
    }

    fn optional_peer_dep(&self, id: &str, basedir: &Path) -> Result<Option<Resolved>> {
        if id.contains('\0') || !is_bare_import(id) || is_node_builtin(id) {
            return Ok(None);
        }
        let Some(main_pkg_path) = lookup_file(basedir, &["package.json"], |path| {
            self.packages
                .load_package_data(self.runtime, path, self.options.preserve_symlinks)
                .is_ok_and(|pkg| pkg.name().is_some())
        }) else {
            return Ok(None);
        };
        let main_pkg =
            self.packages
                .load_package_data(self.runtime, &main_pkg_path, self.options.preserve_symlinks)?;
        if main_pkg.is_optional_peer_dep(id) {
            let parent = main_pkg.name().unwrap_or_default();
            return Ok(Some(Resolved::new(format!(
                "{OPTIONAL_PEER_DEP_ID}:{id}:{parent}"
            ))));
        }
        Ok(None)
    }

    /// Full node resolution of a bare `id`. With an optimizer present,
    /// optimizable dependencies are registered and their optimized id
    /// returned instead of the source path.
    pub fn try_node_resolve(
        &self,
        id: &str,
        importer: Option<&str>,
        deps_optimizer: Option<&dyn DepsOptimizerHandle>,
    ) -> Result<Option<Resolved>> {
        let (nested_root, nested_path) = split_nested(id);
        let possible_ids = possible_package_ids(nested_path);
        let root = Path::new(&self.options.root);

        let deduped = self
            .options
            .dedupe
            .iter()
            .any(|d| possible_ids.contains(&d.as_str()));
        let importer_dir = importer
            .map(clean_url)
            .filter(|i| Path::new(i).is_absolute() && self.runtime.exists(Path::new(i)))
            .and_then(|i| Path::new(i).parent());
        let mut basedir = match importer_dir {
            Some(dir) if !deduped => dir.to_path_buf(),
            _ => root.to_path_buf(),
        };

        if !nested_root.is_empty() {
            match self.nested_resolve_from(nested_root, &basedir) {
                Some(dir) => basedir = dir.into(),
                None => {
                    tracing::debug!(id = %id, "could not resolve nested dependency chain");
                    return Ok(None);
                }
            }
        }

        let mut nearest = None;
        for pkg_id in possible_ids.iter().rev() {
            if let Some(pkg) = self.packages.resolve_package_data(
                self.runtime,
                pkg_id,
                &basedir,
                self.options.preserve_symlinks,
            )? {
                nearest = Some((*pkg_id, pkg));
                break;
            }
        }

        let Some((nearest_id, nearest_pkg)) = nearest else {
            if basedir.as_path() != root {
                return self.optional_peer_dep(nested_path, &basedir);
            }
            return Ok(None);
        };

        // The outermost package owns the public subpath map
        let (pkg_id, pkg) = match possible_ids.first() {
            Some(&root_id) if root_id != nearest_id => match self.packages.resolve_package_data(
                self.runtime,
                root_id,
                &basedir,
                self.options.preserve_symlinks,
            )? {
                Some(root_pkg) if root_pkg.exports().is_some() => (root_id, root_pkg),
                _ => (nearest_id, nearest_pkg),
            },
            _ => (nearest_id, nearest_pkg),
        };

        let resolved = if pkg_id != nested_path {
            let relative = format!(".{}", &nested_path[pkg_id.len()..]);
            self.resolve_deep_import(&relative, &pkg)?
        } else {
            Some(self.resolve_package_entry(pkg_id, &pkg)?)
        };
        let Some(mut resolved) = resolved else {
            return Ok(None);
        };

        let deps_optimizer = match deps_optimizer {
            Some(optimizer) if !self.options.scan && resolved.contains("node_modules") => optimizer,
            _ => return Ok(Some(Resolved::new(resolved))),
        };

        let is_js_type = is_optimizable(&resolved);
        let skip_optimization = !is_js_type
            || importer.is_some_and(|i| i.contains("node_modules"))
            || deps_optimizer.is_excluded(pkg_id)
            || deps_optimizer.is_excluded(nested_path)
            || SPECIAL_QUERY_RE.is_match(&resolved);

        if skip_optimization {
            let browser_hash = deps_optimizer.browser_hash();
            if is_js_type && !browser_hash.is_empty() {
                resolved = inject_query(&resolved, &format!("v={browser_hash}"));
            }
        } else {
            let info = deps_optimizer.register_missing_import(id, &resolved);
            tracing::debug!(id = %id, file = %info.file, "registered missing import");
            resolved = info.optimized_id();
        }

        Ok(Some(Resolved::new(resolved)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_nested() {
        assert_eq!(split_nested("a > b > c"), ("a > b", "c"));
        assert_eq!(split_nested("lodash"), ("", "lodash"));
    }

    #[test]
    fn test_possible_package_ids() {
        assert_eq!(possible_package_ids("lodash"), vec!["lodash"]);
        assert_eq!(
            possible_package_ids("@scope/pkg/a/b"),
            vec!["@scope/pkg", "@scope/pkg/a", "@scope/pkg/a/b"]
        );
        assert_eq!(
            possible_package_ids("pkg/dist/index.js"),
            vec!["pkg", "pkg/dist"]
        );
        assert_eq!(possible_package_ids("socket.io"), vec!["socket.io"]);
    }

    #[test]
    fn test_node_builtins() {
        assert!(is_node_builtin("fs"));
        assert!(is_node_builtin("node:path"));
        assert!(is_node_builtin("fs/promises"));
        assert!(!is_node_builtin("lodash"));
        assert_eq!(node_builtin_external("fs", false), "__dpack-browser-external:fs");
    }
}
