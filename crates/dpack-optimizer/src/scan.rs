//! Dependency scanner.
//!
//! Crawls the project from its entry points and records every bare import
//! that lands on an optimizable file in `node_modules`. Scanning is best
//! effort: unresolvable bare imports are collected in `missing`, parse
//! failures are skipped, and nothing is transformed.

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

use dpack_config::ResolvedConfig;
use dpack_graph::url::{
    KNOWN_ASSET_RE, SPECIAL_QUERY_RE, clean_url, is_bare_import, is_css_request, is_data_url,
    is_external_url,
};
use dpack_graph::utils::{module_list_contains, normalize_path, strip_bom};
use dpack_graph::lex_module;
use dpack_resolve::{
    BROWSER_EXTERNAL_ID, OPTIONAL_PEER_DEP_ID, ResolveRequest, Resolver, is_optimizable,
};

use crate::error::{OptimizeError, Result};

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b(?P<attrs>[^>]*)>(?P<body>.*?)</script>").expect("static regex")
});
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static TYPE_MODULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\btype\s*=\s*["']?module\b"#).expect("static regex"));
static SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bsrc\s*=\s*(?:"([^"]+)"|'([^']+)'|([^\s'">]+))"#).expect("static regex")
});
static LANG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\blang\s*=\s*["']?(ts|tsx|jsx)\b"#).expect("static regex")
});
static HTML_TYPES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:html|htm|vue|svelte|astro)$").expect("static regex"));
static JS_TYPES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:[cm]?[jt]sx?)$").expect("static regex"));

/// Deps found by a scan, keyed and ordered by bare id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Bare id -> resolved entry file
    pub deps: BTreeMap<String, String>,
    /// Bare id -> first importer that could not resolve it
    pub missing: BTreeMap<String, String>,
}

impl ScanResult {
    /// Turn unresolved imports into the aggregated "are they installed?" error.
    pub fn missing_error(&self) -> Option<OptimizeError> {
        if self.missing.is_empty() {
            return None;
        }
        Some(OptimizeError::MissingDeps(
            self.missing
                .iter()
                .map(|(id, importer)| (id.clone(), importer.clone()))
                .collect(),
        ))
    }
}

fn is_scannable(file: &str) -> bool {
    HTML_TYPES_RE.is_match(file) || JS_TYPES_RE.is_match(file)
}

/// Entry points: configured globs, or every html file under the root.
/// `node_modules`, the cache dir and gitignored files are skipped.
pub fn compute_entries(config: &ResolvedConfig) -> Result<Vec<String>> {
    let root = config.root_path();
    let patterns: Vec<String> = if config.optimize_deps.entries.is_empty() {
        vec!["**/*.html".to_string()]
    } else {
        config.optimize_deps.entries.clone()
    };

    let mut overrides = OverrideBuilder::new(root);
    for pattern in &patterns {
        overrides
            .add(pattern)
            .map_err(|e| OptimizeError::Processing(format!("invalid entry glob {pattern}: {e}")))?;
    }
    let overrides = overrides
        .build()
        .map_err(|e| OptimizeError::Processing(format!("invalid entry globs: {e}")))?;

    let cache_dir = config.cache_dir.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .hidden(true)
        .require_git(false)
        .overrides(overrides)
        .filter_entry(move |entry| {
            let path = normalize_path(entry.path());
            entry.file_name() != "node_modules" && path != cache_dir
        })
        .build();

    let mut entries: Vec<String> = walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| normalize_path(entry.path()))
        .filter(|file| is_scannable(file))
        .collect();
    entries.sort();
    Ok(entries)
}

/// A `<script>` block found in an html-like file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScriptBlock {
    Src(String),
    Inline { code: String, lang: &'static str },
}

/// Module scripts in html, every script in single-file components.
pub(crate) fn extract_scripts(file: &str, content: &str) -> Vec<ScriptBlock> {
    let is_html = file.ends_with(".html") || file.ends_with(".htm");
    let content = COMMENT_RE.replace_all(content, "");
    let mut blocks = Vec::new();
    for caps in SCRIPT_RE.captures_iter(&content) {
        let attrs = caps.name("attrs").map(|m| m.as_str()).unwrap_or_default();
        if is_html && !TYPE_MODULE_RE.is_match(attrs) {
            continue;
        }
        if let Some(src) = SRC_RE
            .captures(attrs)
            .and_then(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        {
            blocks.push(ScriptBlock::Src(src.as_str().to_string()));
            continue;
        }
        let body = caps.name("body").map(|m| m.as_str()).unwrap_or_default();
        if body.trim().is_empty() {
            continue;
        }
        let lang = match LANG_RE
            .captures(attrs)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
            .as_deref()
        {
            Some("ts") => "ts",
            Some("tsx") => "tsx",
            Some("jsx") => "jsx",
            _ => "js",
        };
        blocks.push(ScriptBlock::Inline {
            code: body.to_string(),
            lang,
        });
    }
    blocks
}

struct Crawler<'a> {
    config: &'a ResolvedConfig,
    resolver: &'a Resolver,
    result: ScanResult,
    seen: FxHashSet<String>,
    queue: VecDeque<String>,
}

impl<'a> Crawler<'a> {
    fn enqueue(&mut self, file: String) {
        if self.seen.insert(file.clone()) {
            self.queue.push_back(file);
        }
    }

    async fn crawl(&mut self) {
        while let Some(file) = self.queue.pop_front() {
            let code = match self.resolver.runtime().read_to_string(Path::new(&file)).await {
                Ok(code) => code,
                Err(err) => {
                    debug!(file = %file, error = %err, "scan: unreadable file");
                    continue;
                }
            };
            let code = strip_bom(&code);

            if HTML_TYPES_RE.is_match(&file) {
                for (index, block) in extract_scripts(&file, code).into_iter().enumerate() {
                    match block {
                        ScriptBlock::Src(src) => self.visit_specifier(&src, &file).await,
                        ScriptBlock::Inline { code, lang } => {
                            let virtual_id = format!("{file}?id={index}");
                            self.visit_source(&code, &format!("{file}.{lang}"), &virtual_id, &file)
                                .await;
                        }
                    }
                }
            } else {
                self.visit_source(code, &file, &file, &file).await;
            }
        }
    }

    /// Lex `code` and visit its static and literal dynamic imports.
    /// `importer` is the real file imports resolve against.
    async fn visit_source(&mut self, code: &str, lex_as: &str, display_id: &str, importer: &str) {
        let lexed = match lex_module(code, lex_as) {
            Ok(lexed) => lexed,
            Err(err) => {
                debug!(id = %display_id, error = %err, "scan: skipping unparsable module");
                return;
            }
        };
        for record in lexed.imports {
            if let Some(specifier) = record.specifier {
                self.visit_specifier(&specifier, importer).await;
            }
        }
    }

    async fn visit_specifier(&mut self, specifier: &str, importer: &str) {
        if is_external_url(specifier) || is_data_url(specifier) {
            return;
        }
        if is_css_request(specifier)
            || KNOWN_ASSET_RE.is_match(specifier)
            || SPECIAL_QUERY_RE.is_match(specifier)
        {
            return;
        }
        let bare = is_bare_import(specifier);
        if bare && module_list_contains(&self.config.optimize_deps.exclude, specifier) {
            return;
        }

        let resolved = self
            .resolver
            .resolve(
                specifier,
                Some(importer),
                ResolveRequest {
                    scan: true,
                    is_require: false,
                },
            )
            .await;
        let resolved = match resolved {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                if bare {
                    self.result
                        .missing
                        .entry(specifier.to_string())
                        .or_insert_with(|| importer.to_string());
                }
                return;
            }
            Err(err) => {
                debug!(specifier = %specifier, importer = %importer, error = %err, "scan: resolve failed");
                if bare {
                    self.result
                        .missing
                        .entry(specifier.to_string())
                        .or_insert_with(|| importer.to_string());
                }
                return;
            }
        };
        if resolved.external
            || resolved.id.starts_with(BROWSER_EXTERNAL_ID)
            || resolved.id.starts_with(OPTIONAL_PEER_DEP_ID)
        {
            return;
        }

        let file = clean_url(&resolved.id).to_string();
        if file.contains("/node_modules/") {
            if bare && is_optimizable(&file) {
                self.result.deps.entry(specifier.to_string()).or_insert(file);
            }
            return;
        }
        if is_scannable(&file) {
            self.enqueue(file);
        }
    }
}

/// Scan the project for bare imports worth pre-bundling.
pub async fn scan_imports(config: &ResolvedConfig, resolver: &Resolver) -> Result<ScanResult> {
    let start = Instant::now();
    let entries = compute_entries(config)?;
    if entries.is_empty() {
        warn!(
            "Could not auto-determine entry point from optimizeDeps.entries or html files. \
             Skipping dependency pre-bundling."
        );
        return Ok(ScanResult::default());
    }
    debug!(count = entries.len(), "scan: crawling entries");

    let mut crawler = Crawler {
        config,
        resolver,
        result: ScanResult::default(),
        seen: FxHashSet::default(),
        queue: VecDeque::new(),
    };
    for entry in entries {
        crawler.enqueue(entry);
    }
    crawler.crawl().await;

    let result = crawler.result;
    debug!(
        deps = result.deps.len(),
        missing = result.missing.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "scan: done"
    );
    Ok(result)
}
