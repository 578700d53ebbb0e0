//! Import/export lexing for served modules.
//!
//! One oxc parse per module yields every import record with the byte spans
//! needed to splice rewritten specifiers back into the source, the export
//! names used for interop decisions, and the `import.meta.hot` accept
//! calls that decide HMR boundaries.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, ArrayExpressionElement, BindingPatternKind, CallExpression, Declaration,
    Expression, ImportDeclarationSpecifier, ImportExpression, MetaProperty, ModuleDeclaration,
    ModuleExportName, StringLiteral,
};
use oxc_ast_visit::{Visit, walk};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import x from 'a'`, `import 'a'`
    Static,
    /// `import('a')`
    Dynamic,
    /// `export { a } from 'a'`
    ReExport,
    /// `export * from 'a'`, `export * as ns from 'a'`
    ExportAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBinding {
    /// Name on the imported module's side
    pub imported: String,
    /// Name in this module (the exported name for re-exports)
    pub local: String,
}

/// One import-like statement or expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub kind: ImportKind,
    /// `None` for `import(expr)` with a non-literal argument
    pub specifier: Option<String>,
    /// Span of the specifier text, quotes excluded. For dynamic imports
    /// this is the argument expression (quotes included).
    pub start: usize,
    pub end: usize,
    pub statement_start: usize,
    pub statement_end: usize,
    pub default_binding: Option<String>,
    pub namespace_binding: Option<String>,
    pub named: Vec<NamedBinding>,
}

impl ImportRecord {
    pub fn is_dynamic(&self) -> bool {
        self.kind == ImportKind::Dynamic
    }

    /// Names this statement pulls from the imported module, or `None` when
    /// it takes the whole namespace.
    pub fn imported_names(&self) -> Option<Vec<String>> {
        if self.namespace_binding.is_some() || self.kind == ImportKind::ExportAll {
            return None;
        }
        if self.kind == ImportKind::Dynamic {
            return None;
        }
        let mut names: Vec<String> = self.named.iter().map(|b| b.imported.clone()).collect();
        if self.default_binding.is_some() {
            names.push("default".to_string());
        }
        Some(names)
    }
}

/// A string argument of `import.meta.hot.accept(...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedDep {
    pub url: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotAccept {
    /// `accept()` or `accept(cb)`
    pub self_accepts: bool,
    pub deps: Vec<AcceptedDep>,
    /// `acceptExports([...])`, merged across calls
    pub exports: Option<Vec<String>>,
}

/// Everything import analysis and the optimizer need from one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexedModule {
    pub imports: Vec<ImportRecord>,
    pub exports: Vec<String>,
    /// Any import/export declaration or `import.meta`
    pub has_module_syntax: bool,
    pub has_export_all: bool,
    pub uses_import_meta: bool,
    pub uses_hot: bool,
    pub hot: HotAccept,
}

fn export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(ident) => ident.name.to_string(),
        ModuleExportName::IdentifierReference(ident) => ident.name.to_string(),
        ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
    }
}

/// Span of a string literal's contents.
fn inner_span(lit: &StringLiteral<'_>) -> (usize, usize) {
    let start = lit.span.start as usize;
    let end = lit.span.end as usize;
    (start + 1, end.saturating_sub(1).max(start + 1))
}

fn source_type_for(filename: &str) -> SourceType {
    let path = crate::url::clean_url(filename);
    SourceType::from_path(path)
        .unwrap_or_else(|_| SourceType::mjs())
        .with_module(true)
}

fn is_import_meta(expr: &Expression<'_>) -> bool {
    matches!(expr, Expression::MetaProperty(meta)
        if meta.meta.name.as_str() == "import" && meta.property.name.as_str() == "meta")
}

/// `import.meta.hot.<method>`
fn hot_method<'b>(callee: &'b Expression<'_>) -> Option<&'b str> {
    let Expression::StaticMemberExpression(method) = callee else {
        return None;
    };
    let Expression::StaticMemberExpression(hot) = &method.object else {
        return None;
    };
    if hot.property.name.as_str() != "hot" || !is_import_meta(&hot.object) {
        return None;
    }
    Some(method.property.name.as_str())
}

struct DynamicCollector {
    imports: Vec<ImportRecord>,
    uses_import_meta: bool,
    uses_hot: bool,
    hot: HotAccept,
}

impl DynamicCollector {
    fn record_accept(&mut self, call: &CallExpression<'_>) {
        match call.arguments.first() {
            None => self.hot.self_accepts = true,
            Some(Argument::StringLiteral(lit)) => {
                let (start, end) = inner_span(lit);
                self.hot.deps.push(AcceptedDep {
                    url: lit.value.to_string(),
                    start,
                    end,
                });
            }
            Some(Argument::ArrayExpression(array)) => {
                for element in &array.elements {
                    if let ArrayExpressionElement::StringLiteral(lit) = element {
                        let (start, end) = inner_span(lit);
                        self.hot.deps.push(AcceptedDep {
                            url: lit.value.to_string(),
                            start,
                            end,
                        });
                    }
                }
            }
            Some(_) => self.hot.self_accepts = true,
        }
    }

    fn record_accept_exports(&mut self, call: &CallExpression<'_>) {
        let mut names = Vec::new();
        match call.arguments.first() {
            Some(Argument::StringLiteral(lit)) => names.push(lit.value.to_string()),
            Some(Argument::ArrayExpression(array)) => {
                for element in &array.elements {
                    if let ArrayExpressionElement::StringLiteral(lit) = element {
                        names.push(lit.value.to_string());
                    }
                }
            }
            _ => {}
        }
        self.hot.exports.get_or_insert_with(Vec::new).extend(names);
    }
}

impl<'a> Visit<'a> for DynamicCollector {
    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        let span = expr.source.span();
        let (start, end) = (span.start as usize, span.end as usize);
        let specifier = match &expr.source {
            Expression::StringLiteral(lit) => Some(lit.value.to_string()),
            Expression::TemplateLiteral(tpl) if tpl.expressions.is_empty() => {
                tpl.quasis.first().map(|q| q.value.raw.to_string())
            }
            _ => None,
        };
        self.imports.push(ImportRecord {
            kind: ImportKind::Dynamic,
            specifier,
            start,
            end,
            statement_start: expr.span.start as usize,
            statement_end: expr.span.end as usize,
            default_binding: None,
            namespace_binding: None,
            named: Vec::new(),
        });
        walk::walk_import_expression(self, expr);
    }

    fn visit_meta_property(&mut self, meta: &MetaProperty<'a>) {
        if meta.meta.name.as_str() == "import" && meta.property.name.as_str() == "meta" {
            self.uses_import_meta = true;
        }
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        match hot_method(&call.callee) {
            Some("accept") => {
                self.uses_hot = true;
                self.record_accept(call);
            }
            Some("acceptExports") => {
                self.uses_hot = true;
                self.record_accept_exports(call);
            }
            Some(_) => self.uses_hot = true,
            None => {}
        }
        walk::walk_call_expression(self, call);
    }
}

fn declared_names(decl: &Declaration<'_>, out: &mut Vec<String>) {
    match decl {
        Declaration::VariableDeclaration(var) => {
            for declarator in &var.declarations {
                if let BindingPatternKind::BindingIdentifier(ident) = &declarator.id.kind {
                    out.push(ident.name.to_string());
                }
            }
        }
        Declaration::FunctionDeclaration(func) => {
            if let Some(id) = &func.id {
                out.push(id.name.to_string());
            }
        }
        Declaration::ClassDeclaration(class) => {
            if let Some(id) = &class.id {
                out.push(id.name.to_string());
            }
        }
        Declaration::TSEnumDeclaration(enumeration) => out.push(enumeration.id.name.to_string()),
        _ => {}
    }
}

/// Lex `source`. `filename` picks the dialect (ts, jsx, ...).
pub fn lex_module(source: &str, filename: &str) -> Result<LexedModule> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type_for(filename)).parse();
    if let Some(error) = ret.errors.first() {
        return Err(GraphError::Parse {
            file: filename.to_string(),
            message: error.to_string(),
        });
    }

    let mut lexed = LexedModule::default();
    for stmt in &ret.program.body {
        let Some(module_decl) = stmt.as_module_declaration() else {
            continue;
        };
        lexed.has_module_syntax = true;
        let statement_start = module_decl.span().start as usize;
        let statement_end = module_decl.span().end as usize;

        match module_decl {
            ModuleDeclaration::ImportDeclaration(import) => {
                if import.import_kind.is_type() {
                    continue;
                }
                let (start, end) = inner_span(&import.source);
                let mut record = ImportRecord {
                    kind: ImportKind::Static,
                    specifier: Some(import.source.value.to_string()),
                    start,
                    end,
                    statement_start,
                    statement_end,
                    default_binding: None,
                    namespace_binding: None,
                    named: Vec::new(),
                };
                for spec in import.specifiers.iter().flatten() {
                    match spec {
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                            record.default_binding = Some(default.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(ns) => {
                            record.namespace_binding = Some(ns.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportSpecifier(named) => {
                            if named.import_kind.is_type() {
                                continue;
                            }
                            record.named.push(NamedBinding {
                                imported: export_name(&named.imported),
                                local: named.local.name.to_string(),
                            });
                        }
                    }
                }
                lexed.imports.push(record);
            }
            ModuleDeclaration::ExportNamedDeclaration(export) => {
                if export.export_kind.is_type() {
                    continue;
                }
                if let Some(decl) = &export.declaration {
                    declared_names(decl, &mut lexed.exports);
                }
                let bindings: Vec<NamedBinding> = export
                    .specifiers
                    .iter()
                    .filter(|s| !s.export_kind.is_type())
                    .map(|s| NamedBinding {
                        imported: export_name(&s.local),
                        local: export_name(&s.exported),
                    })
                    .collect();
                lexed.exports.extend(bindings.iter().map(|b| b.local.clone()));
                if let Some(src) = &export.source {
                    let (start, end) = inner_span(src);
                    lexed.imports.push(ImportRecord {
                        kind: ImportKind::ReExport,
                        specifier: Some(src.value.to_string()),
                        start,
                        end,
                        statement_start,
                        statement_end,
                        default_binding: None,
                        namespace_binding: None,
                        named: bindings,
                    });
                }
            }
            ModuleDeclaration::ExportAllDeclaration(all) => {
                if all.export_kind.is_type() {
                    continue;
                }
                let namespace = all.exported.as_ref().map(export_name);
                match &namespace {
                    Some(name) => lexed.exports.push(name.clone()),
                    None => lexed.has_export_all = true,
                }
                let (start, end) = inner_span(&all.source);
                lexed.imports.push(ImportRecord {
                    kind: ImportKind::ExportAll,
                    specifier: Some(all.source.value.to_string()),
                    start,
                    end,
                    statement_start,
                    statement_end,
                    default_binding: None,
                    namespace_binding: namespace,
                    named: Vec::new(),
                });
            }
            ModuleDeclaration::ExportDefaultDeclaration(_) => {
                lexed.exports.push("default".to_string());
            }
            _ => {}
        }
    }

    let mut collector = DynamicCollector {
        imports: Vec::new(),
        uses_import_meta: false,
        uses_hot: false,
        hot: HotAccept::default(),
    };
    collector.visit_program(&ret.program);
    lexed.uses_import_meta = collector.uses_import_meta;
    lexed.uses_hot = collector.uses_hot;
    lexed.hot = collector.hot;
    lexed.has_module_syntax |= collector.uses_import_meta;
    lexed.imports.extend(collector.imports);
    lexed.imports.sort_by_key(|r| r.start);

    Ok(lexed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_import_spans() {
        let source = "import foo, { a as b } from 'dep';\nconsole.log(foo, b);";
        let lexed = lex_module(source, "/src/main.js").unwrap();
        assert_eq!(lexed.imports.len(), 1);
        let record = &lexed.imports[0];
        assert_eq!(&source[record.start..record.end], "dep");
        assert_eq!(record.default_binding.as_deref(), Some("foo"));
        assert_eq!(
            record.named,
            vec![NamedBinding {
                imported: "a".into(),
                local: "b".into()
            }]
        );
        assert_eq!(
            &source[record.statement_start..record.statement_end],
            "import foo, { a as b } from 'dep';"
        );
    }

    #[test]
    fn test_dynamic_import() {
        let source = "const m = import('./lazy.js');\nconst n = import(name);";
        let lexed = lex_module(source, "/src/main.js").unwrap();
        assert_eq!(lexed.imports.len(), 2);
        assert_eq!(lexed.imports[0].specifier.as_deref(), Some("./lazy.js"));
        assert_eq!(
            &source[lexed.imports[0].start..lexed.imports[0].end],
            "'./lazy.js'"
        );
        assert_eq!(lexed.imports[1].specifier, None);
        assert!(lexed.imports[1].is_dynamic());
    }

    #[test]
    fn test_exports_and_reexports() {
        let source = "export const a = 1;\nexport function b() {}\nexport { c as d } from './c.js';\nexport * from './e.js';\nexport default 1;";
        let lexed = lex_module(source, "/src/x.js").unwrap();
        assert_eq!(lexed.exports, vec!["a", "b", "d", "default"]);
        assert!(lexed.has_export_all);
        assert_eq!(lexed.imports[0].kind, ImportKind::ReExport);
        assert_eq!(lexed.imports[1].kind, ImportKind::ExportAll);
    }

    #[test]
    fn test_cjs_has_no_module_syntax() {
        let lexed = lex_module("module.exports = { a: require('a') };", "/x/index.js").unwrap();
        assert!(!lexed.has_module_syntax);
        assert!(lexed.imports.is_empty());
    }

    #[test]
    fn test_hot_accept_forms() {
        let source = "import.meta.hot.accept();\nimport.meta.hot.accept(['./a.js', './b.js'], () => {});\nimport.meta.hot.acceptExports(['x']);";
        let lexed = lex_module(source, "/src/x.js").unwrap();
        assert!(lexed.uses_hot);
        assert!(lexed.uses_import_meta);
        assert!(lexed.hot.self_accepts);
        let deps: Vec<_> = lexed.hot.deps.iter().map(|d| d.url.as_str()).collect();
        assert_eq!(deps, vec!["./a.js", "./b.js"]);
        assert_eq!(lexed.hot.exports, Some(vec!["x".to_string()]));
    }

    #[test]
    fn test_type_only_imports_are_skipped() {
        let source = "import type { T } from './types';\nimport { type U, v } from './v';";
        let lexed = lex_module(source, "/src/x.ts").unwrap();
        assert_eq!(lexed.imports.len(), 1);
        assert_eq!(lexed.imports[0].named.len(), 1);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = lex_module("import {", "/src/bad.js").unwrap_err();
        assert!(err.to_string().contains("/src/bad.js"));
    }
}
