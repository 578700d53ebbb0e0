//! Rolldown plugin that resolves bare imports inside dependencies with the
//! dev server's resolver and serves its virtual marker modules.

use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;
use rolldown_common::{ImportKind as RdImportKind, ModuleType, ResolvedExternal};
use rolldown_plugin::{
    HookLoadArgs, HookLoadOutput, HookLoadReturn, HookResolveIdArgs, HookResolveIdOutput,
    HookResolveIdReturn, HookTransformArgs, HookTransformOutput, HookTransformReturn, HookUsage,
    Plugin, PluginContext, SharedTransformPluginContext,
};
use std::borrow::Cow;
use std::sync::Arc;

use dpack_graph::url::{KNOWN_ASSET_TYPES, clean_url, is_bare_import, is_external_url};
use dpack_graph::utils::module_list_contains;
use dpack_resolve::{ResolveRequest, Resolver, is_marker_id, load_marker_module};

/// Imports a dependency may contain that the pre-bundle must leave alone.
static EXTERNAL_TYPES_RE: Lazy<Regex> = Lazy::new(|| {
    let types = [
        "css", "less", "sass", "scss", "styl", "stylus", "pcss", "postcss", "wasm", "vue",
        "svelte", "marko", "astro", "imba", "jsx", "tsx",
    ];
    let all: Vec<&str> = types.iter().copied().chain(KNOWN_ASSET_TYPES.iter().copied()).collect();
    Regex::new(&format!(r"\.({})(?:$|\?)", all.join("|"))).expect("static regex")
});

#[derive(Debug)]
pub struct DepPreBundlePlugin {
    resolver: Arc<Resolver>,
    external: Vec<String>,
    /// `(needle, replacement)` pairs applied to every module
    replacements: Arc<Vec<(String, String)>>,
    is_production: bool,
}

impl DepPreBundlePlugin {
    pub fn new(
        resolver: Arc<Resolver>,
        external: Vec<String>,
        define: &indexmap::IndexMap<String, String>,
        is_production: bool,
    ) -> Self {
        let node_env = if is_production { "production" } else { "development" };
        let mut replacements = vec![(
            "process.env.NODE_ENV".to_string(),
            format!("\"{node_env}\""),
        )];
        for (key, value) in define {
            if key != "process.env.NODE_ENV" {
                replacements.push((key.clone(), value.clone()));
            }
        }
        Self {
            resolver,
            external,
            replacements: Arc::new(replacements),
            is_production,
        }
    }
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

/// Replace whole-expression occurrences of each needle. Returns `None`
/// when nothing matched.
pub fn replace_defines(code: &str, replacements: &[(String, String)]) -> Option<String> {
    let mut current: Option<String> = None;
    for (needle, replacement) in replacements {
        let source = current.as_deref().unwrap_or(code);
        let bytes = source.as_bytes();
        let mut out = String::with_capacity(source.len());
        let mut last = 0;
        let mut replaced = false;
        for start in memmem::find_iter(bytes, needle.as_bytes()) {
            if start < last {
                continue;
            }
            let end = start + needle.len();
            let before_ok = start == 0 || {
                let b = bytes[start - 1];
                !is_ident_byte(b) && b != b'.'
            };
            let after_ok = end == bytes.len() || !is_ident_byte(bytes[end]);
            if !before_ok || !after_ok {
                continue;
            }
            out.push_str(&source[last..start]);
            out.push_str(replacement);
            last = end;
            replaced = true;
        }
        if replaced {
            out.push_str(&source[last..]);
            current = Some(out);
        }
    }
    current
}

impl Plugin for DepPreBundlePlugin {
    fn name(&self) -> Cow<'static, str> {
        "dpack:dep-pre-bundle".into()
    }

    fn register_hook_usage(&self) -> HookUsage {
        HookUsage::ResolveId | HookUsage::Load | HookUsage::Transform
    }

    fn resolve_id(
        &self,
        _ctx: &PluginContext,
        args: &HookResolveIdArgs,
    ) -> impl std::future::Future<Output = HookResolveIdReturn> + Send {
        let specifier = args.specifier.to_string();
        let importer = args.importer.map(|i| i.to_string());
        let is_require = matches!(args.kind, RdImportKind::Require);
        let resolver = Arc::clone(&self.resolver);
        let external = self.external.clone();

        async move {
            let request = ResolveRequest {
                scan: true,
                is_require,
            };

            if is_marker_id(&specifier) {
                return Ok(Some(HookResolveIdOutput {
                    id: specifier.into(),
                    external: Some(ResolvedExternal::Bool(false)),
                    ..Default::default()
                }));
            }

            if EXTERNAL_TYPES_RE.is_match(&specifier) {
                let id = match resolver.resolve(&specifier, importer.as_deref(), request).await {
                    Ok(Some(resolved)) => resolved.id,
                    _ => specifier,
                };
                return Ok(Some(HookResolveIdOutput {
                    id: id.into(),
                    external: Some(ResolvedExternal::Bool(true)),
                    ..Default::default()
                }));
            }

            if !is_bare_import(&specifier) {
                return Ok(None);
            }
            if module_list_contains(&external, &specifier) {
                return Ok(Some(HookResolveIdOutput {
                    id: specifier.into(),
                    external: Some(ResolvedExternal::Bool(true)),
                    ..Default::default()
                }));
            }

            match resolver.resolve(&specifier, importer.as_deref(), request).await {
                Ok(Some(resolved)) => {
                    let external = resolved.external || is_external_url(&resolved.id);
                    let id = if external {
                        resolved.id
                    } else if is_marker_id(&resolved.id) {
                        resolved.id
                    } else {
                        clean_url(&resolved.id).to_string()
                    };
                    Ok(Some(HookResolveIdOutput {
                        id: id.into(),
                        external: Some(ResolvedExternal::Bool(external)),
                        ..Default::default()
                    }))
                }
                Ok(None) => Ok(None),
                Err(err) => {
                    tracing::debug!(specifier = %specifier, error = %err, "pre-bundle resolve failed");
                    Ok(None)
                }
            }
        }
    }

    fn load(
        &self,
        _ctx: &PluginContext,
        args: &HookLoadArgs<'_>,
    ) -> impl std::future::Future<Output = HookLoadReturn> + Send {
        let id = args.id.to_string();
        let is_production = self.is_production;

        async move {
            let Some(code) = load_marker_module(&id, is_production) else {
                return Ok(None);
            };
            Ok(Some(HookLoadOutput {
                code: code.into(),
                module_type: Some(ModuleType::Js),
                ..Default::default()
            }))
        }
    }

    fn transform(
        &self,
        _ctx: SharedTransformPluginContext,
        args: &HookTransformArgs<'_>,
    ) -> impl std::future::Future<Output = HookTransformReturn> + Send {
        let code = args.code.to_string();
        let replacements = Arc::clone(&self.replacements);

        async move {
            Ok(replace_defines(&code, &replacements).map(|code| HookTransformOutput {
                code: Some(code),
                map: None,
                side_effects: None,
                module_type: None,
            }))
        }
    }
}
