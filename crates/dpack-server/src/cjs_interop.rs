//! Rewrites for importing pre-bundled CommonJS dependencies.
//!
//! A CommonJS dep is bundled to a single default export holding its
//! `module.exports`. Named imports from it have to be read off that
//! object, so each such statement becomes a namespace import plus local
//! `const` bindings.

use dpack_graph::{ImportKind, ImportRecord};

const RESERVED: &[&str] = &[
    "break", "case", "class", "catch", "const", "continue", "debugger", "default", "delete",
    "do", "else", "export", "extends", "finally", "for", "function", "if", "import", "in",
    "instanceof", "let", "new", "return", "super", "switch", "this", "throw", "try", "typeof",
    "var", "void", "while", "with", "yield", "enum", "await", "implements", "package",
    "protected", "static", "interface", "private", "public", "arguments", "eval", "null",
    "true", "false", "undefined", "NaN", "Infinity",
];

/// Turn any string into a valid JS identifier.
pub fn make_legal_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) || RESERVED.contains(&ident.as_str()) {
        ident.insert(0, '_');
    }
    ident
}

fn quote(url: &str) -> String {
    serde_json::to_string(url).unwrap_or_else(|_| format!("\"{url}\""))
}

/// `import(url)` exposing the CommonJS exports as the namespace.
pub fn interop_dynamic_import(url: &str) -> String {
    format!(
        "import({}).then(m => m.default && m.default.__esModule ? m.default : ({{ ...m.default, default: m.default }}))",
        quote(url)
    )
}

/// Replacement for a static import or re-export of a CommonJS dep.
///
/// Returns `None` when the statement cannot be rewritten (`export *`) and
/// only its specifier should change.
pub fn interop_named_imports(
    record: &ImportRecord,
    statement: &str,
    raw_url: &str,
    url: &str,
    import_index: usize,
) -> Option<String> {
    let ns = make_legal_identifier(&format!("__dpack__cjsImport{import_index}_{raw_url}"));
    let terminator = if statement.trim_end().ends_with(';') { ";" } else { "" };
    let mut lines = vec![format!("import * as {ns} from {}", quote(url))];
    let mut export_names = Vec::new();

    match record.kind {
        ImportKind::Dynamic => return None,
        ImportKind::ExportAll => {
            let exported = record.namespace_binding.as_ref()?;
            let local = make_legal_identifier(&format!("__dpack__cjsExport_{exported}"));
            lines.push(format!("const {local} = {ns}.default"));
            export_names.push(format!("{local} as {exported}"));
        }
        ImportKind::Static => {
            if record.default_binding.is_none()
                && record.namespace_binding.is_none()
                && record.named.is_empty()
            {
                return Some(format!("import {}{terminator}", quote(url)));
            }
            if let Some(local) = &record.default_binding {
                lines.push(format!(
                    "const {local} = {ns}.default && {ns}.default.__esModule ? {ns}.default.default : {ns}.default"
                ));
            }
            if let Some(local) = &record.namespace_binding {
                lines.push(format!("const {local} = {ns}.default"));
            }
            for binding in &record.named {
                let access = named_access(&ns, &binding.imported);
                lines.push(format!("const {} = {access}", binding.local));
            }
        }
        ImportKind::ReExport => {
            if record.named.is_empty() {
                return Some(format!("import {}{terminator}", quote(url)));
            }
            for binding in &record.named {
                let access = named_access(&ns, &binding.imported);
                if binding.local == "default" {
                    let local = make_legal_identifier(&format!("__dpack__cjsExportDefault_{import_index}"));
                    lines.push(format!("const {local} = {access}"));
                    lines.push(format!("export default {local}"));
                } else {
                    let local = make_legal_identifier(&format!("__dpack__cjsExport_{}", binding.local));
                    lines.push(format!("const {local} = {access}"));
                    export_names.push(format!("{local} as {}", binding.local));
                }
            }
        }
    }

    if !export_names.is_empty() {
        lines.push(format!("export {{ {} }}", export_names.join(", ")));
    }
    Some(format!("{}{terminator}", lines.join("; ")))
}

fn named_access(ns: &str, imported: &str) -> String {
    if imported == "default" {
        format!("{ns}.default && {ns}.default.__esModule ? {ns}.default.default : {ns}.default")
    } else {
        format!("{ns}.default[{}]", quote(imported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpack_graph::lex_module;

    fn rewrite(source: &str) -> Option<String> {
        let lexed = lex_module(source, "/src/main.js").unwrap();
        let record = &lexed.imports[0];
        let statement = &source[record.statement_start..record.statement_end];
        let raw = record.specifier.clone().unwrap();
        interop_named_imports(record, statement, &raw, "/deps/cjsdep.js?v=1", 0)
    }

    #[test]
    fn test_named_imports_read_from_namespace() {
        let out = rewrite(r#"import { foo, bar as baz } from "cjsdep";"#).unwrap();
        assert_eq!(
            out,
            r#"import * as __dpack__cjsImport0_cjsdep from "/deps/cjsdep.js?v=1"; const foo = __dpack__cjsImport0_cjsdep.default["foo"]; const baz = __dpack__cjsImport0_cjsdep.default["bar"];"#
        );
        assert!(!out.contains("export *"));
    }

    #[test]
    fn test_default_and_namespace_imports() {
        let out = rewrite(r#"import React, * as All from "react""#).unwrap();
        assert!(out.starts_with(r#"import * as __dpack__cjsImport0_react from "/deps/cjsdep.js?v=1"; "#));
        assert!(out.contains(
            "const React = __dpack__cjsImport0_react.default && __dpack__cjsImport0_react.default.__esModule ? __dpack__cjsImport0_react.default.default : __dpack__cjsImport0_react.default"
        ));
        assert!(out.contains("const All = __dpack__cjsImport0_react.default"));
        assert!(!out.ends_with(';'));
    }

    #[test]
    fn test_re_exports_forward_through_locals() {
        let out = rewrite(r#"export { a as b, default } from "cjsdep";"#).unwrap();
        assert!(out.contains(r#"const __dpack__cjsExport_b = __dpack__cjsImport0_cjsdep.default["a"]"#));
        assert!(out.contains("const __dpack__cjsExportDefault_0 = "));
        assert!(out.contains("export default __dpack__cjsExportDefault_0"));
        assert!(out.contains("export { __dpack__cjsExport_b as b }"));
    }

    #[test]
    fn test_side_effect_import_and_export_all() {
        assert_eq!(
            rewrite(r#"import "cjsdep";"#).unwrap(),
            r#"import "/deps/cjsdep.js?v=1";"#
        );
        assert_eq!(rewrite(r#"export * from "cjsdep";"#), None);
        let ns = rewrite(r#"export * as utils from "cjsdep";"#).unwrap();
        assert!(ns.contains("export { __dpack__cjsExport_utils as utils }"));
    }

    #[test]
    fn test_dynamic_import() {
        assert_eq!(
            interop_dynamic_import("/deps/a.js?v=1"),
            r#"import("/deps/a.js?v=1").then(m => m.default && m.default.__esModule ? m.default : ({ ...m.default, default: m.default }))"#
        );
    }

    #[test]
    fn test_make_legal_identifier() {
        assert_eq!(make_legal_identifier("@scope/pkg-name"), "_scope_pkg_name");
        assert_eq!(make_legal_identifier("1abc"), "_1abc");
        assert_eq!(make_legal_identifier("default"), "_default");
    }
}
