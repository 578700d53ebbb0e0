//! User-facing configuration schema.
//!
//! Keys are camelCase in JSON and TOML. Every section has serde defaults so
//! a partial file deserializes cleanly.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::defaults::*;

/// Top level configuration as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfig {
    /// Project root, defaults to the current directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    pub base: String,
    pub mode: String,
    /// Dependency cache, defaults to `node_modules/.dpack` next to the nearest package.json
    #[serde(alias = "cachedir", skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Static files served as-is, relative to the root
    #[serde(alias = "publicdir")]
    pub public_dir: String,
    #[serde(alias = "loglevel")]
    pub log_level: LogLevel,
    #[serde(alias = "clearscreen")]
    pub clear_screen: bool,
    /// Global constant replacements
    pub define: IndexMap<String, String>,
    #[serde(alias = "envdir", skip_serializing_if = "Option::is_none")]
    pub env_dir: Option<PathBuf>,
    pub resolve: ResolveConfig,
    #[serde(alias = "optimizedeps")]
    pub optimize_deps: OptimizeDepsConfig,
    pub server: ServerConfig,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            root: None,
            base: default_base(),
            mode: default_mode(),
            cache_dir: None,
            public_dir: default_public_dir(),
            log_level: LogLevel::default(),
            clear_screen: true,
            define: IndexMap::new(),
            env_dir: None,
            resolve: ResolveConfig::default(),
            optimize_deps: OptimizeDepsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// `tracing` filter directive for this level
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// One alias rule: an exact specifier or a `find/` prefix is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRule {
    pub find: String,
    pub replacement: String,
}

/// Aliases may be written as an ordered list or as a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AliasOptions {
    List(Vec<AliasRule>),
    Map(IndexMap<String, String>),
}

impl Default for AliasOptions {
    fn default() -> Self {
        AliasOptions::List(Vec::new())
    }
}

impl AliasOptions {
    pub fn into_rules(self) -> Vec<AliasRule> {
        match self {
            AliasOptions::List(rules) => rules,
            AliasOptions::Map(map) => map
                .into_iter()
                .map(|(find, replacement)| AliasRule { find, replacement })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveConfig {
    pub alias: AliasOptions,
    /// Extra `exports` conditions
    pub conditions: Vec<String>,
    #[serde(alias = "mainfields")]
    pub main_fields: Vec<String>,
    pub extensions: Vec<String>,
    /// Packages always resolved from the project root
    pub dedupe: Vec<String>,
    #[serde(alias = "preservesymlinks")]
    pub preserve_symlinks: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            alias: AliasOptions::default(),
            conditions: Vec::new(),
            main_fields: default_main_fields(),
            extensions: default_extensions(),
            dedupe: Vec::new(),
            preserve_symlinks: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizeDepsConfig {
    /// Entry globs for the dependency scanner, relative to the root
    pub entries: Vec<String>,
    /// Dependencies pre-bundled even if the scanner does not find them
    pub include: Vec<String>,
    /// Dependencies never pre-bundled
    pub exclude: Vec<String>,
    /// Dependencies always treated as CommonJS
    #[serde(alias = "needsinterop")]
    pub needs_interop: Vec<String>,
    /// Ignore cached metadata and re-bundle
    pub force: bool,
    /// Window for batching newly discovered dependencies into one run
    #[serde(alias = "debouncems")]
    pub debounce_ms: u64,
}

impl Default for OptimizeDepsConfig {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            needs_interop: Vec::new(),
            force: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// `hmr: false` disables the channel; an object customizes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HmrOptions {
    Enabled(bool),
    Custom(HmrConfig),
}

impl Default for HmrOptions {
    fn default() -> Self {
        HmrOptions::Enabled(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HmrConfig {
    pub path: String,
    /// Client ping interval in milliseconds
    pub timeout: u64,
    pub overlay: bool,
}

impl Default for HmrConfig {
    fn default() -> Self {
        Self {
            path: default_hmr_path(),
            timeout: default_hmr_timeout(),
            overlay: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    /// Extra ignore patterns
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(alias = "strictport")]
    pub strict_port: bool,
    pub hmr: HmrOptions,
    pub watch: WatchConfig,
    #[serde(alias = "pretransformrequests")]
    pub pre_transform_requests: bool,
    pub headers: IndexMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            strict_port: false,
            hmr: HmrOptions::default(),
            watch: WatchConfig::default(),
            pre_transform_requests: true,
            headers: IndexMap::new(),
        }
    }
}

/// Values passed on the command line. Only fields that are set override
/// the lower layers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<InlineServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_deps: Option<InlineOptimizeDepsConfig>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineOptimizeDepsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: UserConfig =
            serde_json::from_str(r#"{ "server": { "port": 4000 }, "optimizeDeps": { "include": ["lodash"] } }"#)
                .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.optimize_deps.include, vec!["lodash"]);
        assert_eq!(config.optimize_deps.debounce_ms, 100);
        assert_eq!(config.resolve.main_fields, vec!["module", "jsnext:main", "jsnext"]);
    }

    #[test]
    fn test_alias_accepts_list_and_map() {
        let list: ResolveConfig = serde_json::from_str(
            r#"{ "alias": [{ "find": "@", "replacement": "/src" }] }"#,
        )
        .unwrap();
        let map: ResolveConfig =
            serde_json::from_str(r#"{ "alias": { "@": "/src" } }"#).unwrap();
        assert_eq!(list.alias.into_rules(), map.alias.into_rules());
    }

    #[test]
    fn test_hmr_accepts_bool_or_object() {
        let off: ServerConfig = serde_json::from_str(r#"{ "hmr": false }"#).unwrap();
        assert_eq!(off.hmr, HmrOptions::Enabled(false));

        let custom: ServerConfig =
            serde_json::from_str(r#"{ "hmr": { "overlay": false } }"#).unwrap();
        match custom.hmr {
            HmrOptions::Custom(c) => {
                assert!(!c.overlay);
                assert_eq!(c.path, "/__dpack_hmr");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_inline_config_skips_unset_fields() {
        let inline = InlineConfig {
            server: Some(InlineServerConfig {
                port: Some(5000),
                host: None,
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&inline).unwrap();
        assert_eq!(json, serde_json::json!({ "server": { "port": 5000 } }));
    }
}
