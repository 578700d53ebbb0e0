//! Filesystem probing and package entry resolution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::Path;

use dpack_graph::Runtime;
use dpack_graph::url::{is_possible_ts_output, potential_ts_src_paths};
use dpack_graph::utils::normalize_path;

use crate::error::{ResolveError, Result};
use crate::exports::{ExportConditions, ExportsMiss, resolve_exports};
use crate::options::{BROWSER_EXTERNAL_ID, ResolveOptions};
use crate::package::{PackageCache, PackageData};

static ESM_SYNTAX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^\s*|[}{();,\n]\s*)(import\s*[\w*{]|export\b)").expect("static regex")
});

/// Best-effort check for `import`/`export` statements in a module.
pub fn has_esm_syntax(code: &str) -> bool {
    ESM_SYNTAX_RE.is_match(code)
}

/// `a/b.js?raw#x` -> (`a/b.js`, `?raw#x`). A leading `?` or `#` is part of the file.
pub fn split_file_and_postfix(path: &str) -> (&str, &str) {
    match path.find(['?', '#']) {
        Some(i) if i > 0 => (&path[..i], &path[i..]),
        _ => (path, ""),
    }
}

/// Join a package-relative entry onto the package directory.
fn join_entry(dir: &str, entry: &str) -> String {
    normalize_path(Path::new(dir).join(entry.trim_start_matches("./")))
}

/// Look a path up in an object-shaped `browser` field.
///
/// `Some(None)` means the path is mapped to `false` (excluded for browsers).
pub fn map_with_browser_field(
    relative_path: &str,
    map: &serde_json::Map<String, Value>,
) -> Option<Option<String>> {
    let normalized = normalize_relative(relative_path);
    for (key, value) in map {
        let key_norm = normalize_relative(key);
        let matches = normalized == key_norm
            || equal_without_suffix(&normalized, &key_norm, ".js")
            || equal_without_suffix(&normalized, &key_norm, "/index.js");
        if matches {
            return match value {
                Value::String(target) => Some(Some(target.clone())),
                Value::Bool(false) => Some(None),
                _ => None,
            };
        }
    }
    None
}

fn normalize_relative(path: &str) -> String {
    let cleaned = normalize_path(path);
    if path.starts_with("./") && !cleaned.starts_with('.') {
        format!("./{cleaned}")
    } else {
        cleaned
    }
}

fn equal_without_suffix(path: &str, key: &str, suffix: &str) -> bool {
    key.strip_suffix(suffix).is_some_and(|k| k == path)
}

/// Filesystem side of the resolver, borrowed for the duration of one
/// resolution.
pub struct FsProbe<'a> {
    pub runtime: &'a dyn Runtime,
    pub packages: &'a PackageCache,
    pub options: &'a ResolveOptions,
}

impl FsProbe<'_> {
    fn real_path(&self, file: &str) -> String {
        if self.options.preserve_symlinks {
            return normalize_path(file);
        }
        self.runtime
            .canonicalize(Path::new(file))
            .map(normalize_path)
            .unwrap_or_else(|_| normalize_path(file))
    }

    pub(crate) fn export_conditions(&self) -> ExportConditions {
        let custom = &self.options.conditions;
        ExportConditions {
            is_production: self.options.is_production,
            is_require: self.options.is_require && !custom.iter().any(|c| c == "import"),
            browser: !custom.iter().any(|c| c == "node"),
            custom: custom.clone(),
        }
    }

    /// Probe `fs_path` as a file, with each extension, then as a directory.
    pub fn try_fs_resolve(&self, fs_path: &str) -> Result<Option<String>> {
        self.try_fs_resolve_with(fs_path, true)
    }

    pub fn try_fs_resolve_with(&self, fs_path: &str, try_index: bool) -> Result<Option<String>> {
        let (file, postfix) = split_file_and_postfix(fs_path);
        let has_postfix = !postfix.is_empty();

        // `a?b.js` could be a real file name
        if has_postfix {
            if let Some(res) = self.try_resolve_file(fs_path, "", false)? {
                return Ok(Some(res));
            }
        }
        if let Some(res) = self.try_resolve_file(file, postfix, false)? {
            return Ok(Some(res));
        }

        for ext in &self.options.extensions {
            if has_postfix {
                if let Some(res) = self.try_resolve_file(&format!("{fs_path}{ext}"), "", false)? {
                    return Ok(Some(res));
                }
            }
            if let Some(res) = self.try_resolve_file(&format!("{file}{ext}"), postfix, false)? {
                return Ok(Some(res));
            }
        }

        if has_postfix {
            if let Some(res) = self.try_resolve_file(fs_path, "", try_index)? {
                return Ok(Some(res));
            }
        }
        self.try_resolve_file(file, postfix, try_index)
    }

    fn try_resolve_file(&self, file: &str, postfix: &str, try_index: bool) -> Result<Option<String>> {
        let path = Path::new(file);
        if self.runtime.is_file(path) {
            return Ok(Some(format!("{}{postfix}", self.real_path(file))));
        }

        if try_index && self.runtime.is_dir(path) {
            if !self.options.skip_package_json {
                let pkg_path = path.join("package.json");
                if self.runtime.is_file(&pkg_path) {
                    let pkg = self.packages.load_package_data(
                        self.runtime,
                        &pkg_path,
                        self.options.preserve_symlinks,
                    )?;
                    return self.resolve_package_entry(file, &pkg).map(Some);
                }
            }
            if let Some(index) = self.try_fs_resolve(&format!("{file}/index"))? {
                return Ok(Some(format!("{index}{postfix}")));
            }
        }

        if self.options.is_from_ts_importer && is_possible_ts_output(file) {
            for src in potential_ts_src_paths(file) {
                if let Some(res) = self.try_resolve_file(&src, postfix, try_index)? {
                    return Ok(Some(res));
                }
            }
        }
        Ok(None)
    }

    /// Pick the entry file of a package.
    ///
    /// `exports` first, then a string `browser` field, then the configured
    /// main fields and `main`, then the `index.*` defaults.
    pub fn resolve_package_entry(&self, id: &str, pkg: &PackageData) -> Result<String> {
        if let Some(cached) = pkg.get_resolved(".") {
            return Ok(cached);
        }

        let entry_failure = |details: Option<String>| ResolveError::PackageEntry {
            id: id.to_string(),
            details,
        };

        let mut entry_point: Option<String> = None;
        if let Some(exports) = pkg.exports() {
            let name = pkg.name().unwrap_or(id);
            entry_point = Some(
                resolve_exports(exports, name, ".", &self.export_conditions())
                    .map_err(|miss| entry_failure(Some(miss.to_string())))?,
            );
        }

        let wants_fallback = |entry: &Option<String>| {
            entry.as_deref().is_none_or(|e| e.ends_with(".mjs"))
        };

        if wants_fallback(&entry_point) {
            if let Some(browser_entry) = self.browser_string_entry(pkg) {
                entry_point = Some(self.choose_browser_or_module(pkg, browser_entry)?);
            }
        }

        if wants_fallback(&entry_point) {
            if let Some(field) = self
                .options
                .main_fields
                .iter()
                .filter(|f| f.as_str() != "browser")
                .find_map(|f| pkg.field_str(f))
            {
                entry_point = Some(field.to_string());
            }
        }

        let entry_point = entry_point.or_else(|| pkg.field_str("main").map(str::to_string));
        let candidates = match entry_point {
            Some(entry) => vec![entry],
            None => vec!["index.js".into(), "index.json".into(), "index.node".into()],
        };

        for entry in candidates {
            let entry = match pkg.browser() {
                Some(Value::Object(map)) => match map_with_browser_field(&entry, map) {
                    Some(Some(mapped)) => mapped,
                    _ => entry,
                },
                _ => entry,
            };
            if let Some(resolved) = self.try_fs_resolve(&join_entry(&pkg.dir, &entry))? {
                tracing::debug!(package = %id, entry = %resolved, "resolved package entry");
                pkg.set_resolved(".", resolved.clone());
                return Ok(resolved);
            }
        }

        Err(entry_failure(None))
    }

    fn browser_string_entry<'p>(&self, pkg: &'p PackageData) -> Option<&'p str> {
        match pkg.browser()? {
            Value::String(entry) => Some(entry),
            Value::Object(map) => map.get(".").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Some packages point `module` at Node ESM and `browser` at a UMD
    /// build, others the reverse. Read the browser entry and keep it only
    /// if it looks like ESM.
    fn choose_browser_or_module(&self, pkg: &PackageData, browser_entry: &str) -> Result<String> {
        let module = pkg.field_str("module");
        let prefers_module = !self.options.is_require
            && self.options.main_fields.iter().any(|f| f == "module")
            && module.is_some_and(|m| m != browser_entry);
        if !prefers_module {
            return Ok(browser_entry.to_string());
        }

        let Some(resolved) = self.try_fs_resolve(&join_entry(&pkg.dir, browser_entry))? else {
            return Ok(browser_entry.to_string());
        };
        let content = self.runtime.read_to_string_sync(Path::new(&resolved))?;
        if has_esm_syntax(&content) {
            Ok(browser_entry.to_string())
        } else {
            Ok(module.unwrap_or(browser_entry).to_string())
        }
    }

    /// Resolve `./sub/path` inside `pkg`. Returns the browser-external marker
    /// when the `browser` field maps the path to `false`.
    pub fn resolve_deep_import(&self, relative_id: &str, pkg: &PackageData) -> Result<Option<String>> {
        if let Some(cached) = pkg.get_resolved(relative_id) {
            return Ok(Some(cached));
        }

        let pkg_name = pkg.name().unwrap_or("");
        let mut target = relative_id.to_string();
        let has_exports = pkg.exports().is_some();

        if let Some(exports) = pkg.exports() {
            let not_exported = || ResolveError::SubpathNotExported {
                subpath: relative_id.to_string(),
                pkg_json: format!("{}/package.json", pkg.dir),
            };
            if !exports.is_object() {
                return Err(not_exported());
            }
            let (file, postfix) = split_file_and_postfix(relative_id);
            match resolve_exports(exports, pkg_name, file, &self.export_conditions()) {
                Ok(exported) => target = format!("{exported}{postfix}"),
                Err(ExportsMiss::Missing { .. }) => return Err(not_exported()),
                Err(miss @ ExportsMiss::NoConditions { .. }) => {
                    tracing::debug!(subpath = %relative_id, "{miss}");
                    return Err(not_exported());
                }
            }
        } else if let Some(Value::Object(map)) = pkg.browser() {
            let (file, postfix) = split_file_and_postfix(relative_id);
            match map_with_browser_field(file, map) {
                Some(Some(mapped)) => target = format!("{mapped}{postfix}"),
                Some(None) => {
                    let bare = format!("{pkg_name}{}", &relative_id[1..]);
                    return Ok(Some(format!("{BROWSER_EXTERNAL_ID}:{bare}")));
                }
                None => {}
            }
        }

        let resolved = self.try_fs_resolve_with(&join_entry(&pkg.dir, &target), !has_exports)?;
        if let Some(resolved) = &resolved {
            pkg.set_resolved(relative_id, resolved.clone());
        }
        Ok(resolved)
    }
}
