//! CommonJS interop detection.
//!
//! A pre-bundled dep "needs interop" when importers cannot take named
//! bindings from it directly and must go through its default export.

use std::path::Path;

use dpack_graph::utils::{module_list_contains, strip_bom};
use dpack_graph::{Runtime, lex_module};

use crate::metadata::OptimizedDepInfo;

/// Export shape of a dependency entry, read before bundling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportsData {
    pub has_module_syntax: bool,
    pub exports: Vec<String>,
    pub has_export_all: bool,
}

impl ExportsData {
    fn is_single_default_export(&self) -> bool {
        is_single_default_export(&self.exports) && !self.has_export_all
    }
}

fn is_single_default_export(exports: &[String]) -> bool {
    exports.len() == 1 && exports[0] == "default"
}

/// Read and lex a dependency entry. Sources that fail to parse are treated
/// as CommonJS.
pub async fn parse_exports_data(runtime: &dyn Runtime, src: &str) -> ExportsData {
    let Ok(code) = runtime.read_to_string(Path::new(src)).await else {
        return ExportsData::default();
    };
    match lex_module(strip_bom(&code), src) {
        Ok(lexed) => ExportsData {
            has_module_syntax: lexed.has_module_syntax,
            exports: lexed.exports,
            has_export_all: lexed.has_export_all,
        },
        Err(err) => {
            tracing::debug!(src = %src, error = %err, "treating unparsable dependency entry as CommonJS");
            ExportsData::default()
        }
    }
}

/// Decide interop for `id`.
///
/// `output_exports` is the export list the bundler produced for the
/// dep's entry chunk. Without it the answer is the pre-bundle estimate.
pub fn needs_interop(
    id: &str,
    data: &ExportsData,
    output_exports: Option<&[String]>,
    configured: &[String],
) -> bool {
    if module_list_contains(configured, id) {
        return true;
    }
    if !data.has_module_syntax {
        return true;
    }
    if let Some(generated) = output_exports {
        // the bundler collapsed an ESM entry with named exports into a
        // single default
        if is_single_default_export(generated)
            && !data.is_single_default_export()
            && !data.exports.iter().any(|e| e == "__esModule")
        {
            return true;
        }
    }
    false
}

/// Ids whose pre-bundle estimate (made when they were discovered) differs
/// from what the new bundle actually needs. Importers already rewritten
/// with the wrong shape have to reload.
pub fn find_interop_mismatches<'a>(
    discovered: impl IntoIterator<Item = &'a OptimizedDepInfo>,
    optimized: &indexmap::IndexMap<String, OptimizedDepInfo>,
) -> Vec<String> {
    let mut mismatches = Vec::new();
    for dep in discovered {
        let Some(estimate) = dep.needs_interop else {
            continue;
        };
        if let Some(actual) = optimized.get(&dep.id).and_then(|info| info.needs_interop) {
            if actual != estimate {
                mismatches.push(dep.id.clone());
            }
        }
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpack_graph::NativeRuntime;
    use indexmap::IndexMap;
    use std::fs;
    use tempfile::TempDir;

    fn esm(exports: &[&str]) -> ExportsData {
        ExportsData {
            has_module_syntax: true,
            exports: exports.iter().map(|s| s.to_string()).collect(),
            has_export_all: false,
        }
    }

    #[test]
    fn test_cjs_needs_interop() {
        assert!(needs_interop("lodash", &ExportsData::default(), None, &[]));
    }

    #[test]
    fn test_configured_needs_interop() {
        let configured = vec!["react".to_string()];
        assert!(needs_interop("react", &esm(&["a"]), None, &configured));
        assert!(needs_interop("react/jsx-runtime", &esm(&["a"]), None, &configured));
        assert!(!needs_interop("react-dom", &esm(&["a"]), None, &configured));
    }

    #[test]
    fn test_collapsed_default_needs_interop() {
        let collapsed = vec!["default".to_string()];
        assert!(needs_interop("dep", &esm(&["a", "b"]), Some(&collapsed), &[]));
        assert!(!needs_interop("dep", &esm(&["default"]), Some(&collapsed), &[]));
        assert!(!needs_interop("dep", &esm(&["a", "__esModule"]), Some(&collapsed), &[]));

        let named = vec!["a".to_string(), "b".to_string()];
        assert!(!needs_interop("dep", &esm(&["a", "b"]), Some(&named), &[]));
    }

    #[test]
    fn test_find_interop_mismatches() {
        let mut guessed = OptimizedDepInfo::new("dep", "/c/dep.js", "b");
        guessed.needs_interop = Some(false);
        let mut unknown = OptimizedDepInfo::new("other", "/c/other.js", "b");
        unknown.needs_interop = None;

        let mut optimized = IndexMap::new();
        let mut actual = OptimizedDepInfo::new("dep", "/c/dep.js", "b");
        actual.needs_interop = Some(true);
        optimized.insert("dep".to_string(), actual);
        let mut other = OptimizedDepInfo::new("other", "/c/other.js", "b");
        other.needs_interop = Some(true);
        optimized.insert("other".to_string(), other);

        assert_eq!(find_interop_mismatches([&guessed, &unknown], &optimized), vec!["dep"]);
    }

    #[tokio::test]
    async fn test_parse_exports_data() {
        let temp = TempDir::new().unwrap();
        let esm_file = temp.path().join("esm.js");
        fs::write(&esm_file, "export const a = 1;\nexport default a;\n").unwrap();
        let cjs_file = temp.path().join("cjs.js");
        fs::write(&cjs_file, "module.exports = { a: 1 };\n").unwrap();

        let runtime = NativeRuntime::new();
        let data = parse_exports_data(&runtime, &esm_file.to_string_lossy()).await;
        assert!(data.has_module_syntax);
        assert_eq!(data.exports, vec!["a", "default"]);

        let data = parse_exports_data(&runtime, &cjs_file.to_string_lossy()).await;
        assert!(!data.has_module_syntax);

        let data = parse_exports_data(&runtime, "/does/not/exist.js").await;
        assert_eq!(data, ExportsData::default());
    }
}
