//! The immutable configuration every server component reads.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dpack_graph::utils::{lookup_file, normalize_path};

use crate::error::{ConfigError, Result};
use crate::loading::LoadedConfig;
use crate::search_root::search_for_workspace_root;
use crate::types::{
    AliasRule, HmrConfig, HmrOptions, InlineConfig, LogLevel, OptimizeDepsConfig, UserConfig,
};

static NEXT_CONFIG_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one resolved config. Per-config state such as the
/// dependency optimizer is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigId(u64);

impl ConfigId {
    fn next() -> Self {
        ConfigId(NEXT_CONFIG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedResolveOptions {
    pub alias: Vec<AliasRule>,
    pub conditions: Vec<String>,
    pub main_fields: Vec<String>,
    pub extensions: Vec<String>,
    pub dedupe: Vec<String>,
    pub preserve_symlinks: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedServerOptions {
    pub host: String,
    pub port: u16,
    pub strict_port: bool,
    /// `None` when HMR is disabled
    pub hmr: Option<HmrConfig>,
    pub watch_ignored: Vec<String>,
    pub pre_transform_requests: bool,
    pub headers: IndexMap<String, String>,
    /// Directories `/@fs/` requests may read from
    pub fs_allow: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub id: ConfigId,
    /// Absolute forward-slash project root
    pub root: String,
    pub base: String,
    pub mode: String,
    pub is_production: bool,
    pub cache_dir: String,
    pub public_dir: String,
    pub env_dir: String,
    pub log_level: LogLevel,
    pub clear_screen: bool,
    pub define: IndexMap<String, String>,
    pub config_file: Option<String>,
    pub config_file_dependencies: Vec<String>,
    pub resolve: ResolvedResolveOptions,
    pub optimize_deps: OptimizeDepsConfig,
    pub server: ResolvedServerOptions,
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn resolve_base(base: &str) -> String {
    if base.is_empty() || base == "./" {
        return "/".to_string();
    }
    let mut out = if base.starts_with('/') {
        base.to_string()
    } else {
        format!("/{base}")
    };
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

impl ResolvedConfig {
    /// Load every layer and resolve the result against the filesystem.
    pub fn load(inline: InlineConfig, config_path: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let root_hint = inline
            .root
            .as_deref()
            .map(|r| absolutize(&cwd, r))
            .unwrap_or_else(|| cwd.clone());
        let loaded = UserConfig::load(&root_hint, &inline, config_path)?;
        Self::from_loaded(loaded, &cwd)
    }

    /// Resolve an already loaded config. Relative paths in it are taken
    /// relative to `cwd`.
    pub fn from_loaded(loaded: LoadedConfig, cwd: &Path) -> Result<Self> {
        let LoadedConfig {
            config,
            config_file,
        } = loaded;

        let root_path = config
            .root
            .as_deref()
            .map(|r| absolutize(cwd, r))
            .unwrap_or_else(|| cwd.to_path_buf());
        if !root_path.is_dir() {
            return Err(ConfigError::InvalidRoot {
                path: root_path,
                reason: "not a directory".to_string(),
            });
        }
        let root = normalize_path(&root_path);
        let root_path = PathBuf::from(&root);

        let cache_dir = match &config.cache_dir {
            Some(dir) => normalize_path(absolutize(&root_path, dir)),
            None => match lookup_file(&root_path, &["package.json"], |_| true) {
                Some(pkg) => normalize_path(
                    pkg.parent()
                        .unwrap_or(&root_path)
                        .join("node_modules/.dpack"),
                ),
                None => normalize_path(root_path.join(".dpack")),
            },
        };

        let env_dir = config
            .env_dir
            .as_deref()
            .map(|d| normalize_path(absolutize(&root_path, d)))
            .unwrap_or_else(|| root.clone());

        let config_file = config_file.map(normalize_path);
        let config_file_dependencies = config_file.iter().cloned().collect();

        let hmr = match &config.server.hmr {
            HmrOptions::Enabled(true) => Some(HmrConfig::default()),
            HmrOptions::Enabled(false) => None,
            HmrOptions::Custom(custom) => Some(custom.clone()),
        };

        let fs_allow = vec![normalize_path(search_for_workspace_root(&root_path))];

        Ok(Self {
            id: ConfigId::next(),
            base: resolve_base(&config.base),
            is_production: config.mode == "production",
            mode: config.mode,
            public_dir: normalize_path(root_path.join(&config.public_dir)),
            cache_dir,
            env_dir,
            log_level: config.log_level,
            clear_screen: config.clear_screen,
            define: config.define,
            config_file,
            config_file_dependencies,
            resolve: ResolvedResolveOptions {
                alias: config.resolve.alias.into_rules(),
                conditions: config.resolve.conditions,
                main_fields: config.resolve.main_fields,
                extensions: config.resolve.extensions,
                dedupe: config.resolve.dedupe,
                preserve_symlinks: config.resolve.preserve_symlinks,
            },
            optimize_deps: config.optimize_deps,
            server: ResolvedServerOptions {
                host: config.server.host,
                port: config.server.port,
                strict_port: config.server.strict_port,
                hmr,
                watch_ignored: config.server.watch.ignored,
                pre_transform_requests: config.server.pre_transform_requests,
                headers: config.server.headers,
                fs_allow,
            },
            root,
        })
    }

    pub fn root_path(&self) -> &Path {
        Path::new(&self.root)
    }

    /// Directory holding the committed pre-bundled dependencies
    pub fn deps_cache_dir(&self) -> String {
        format!("{}/deps", self.cache_dir)
    }

    /// A change to this file means the server must restart.
    pub fn is_config_dependency(&self, file: &str) -> bool {
        self.config_file.as_deref() == Some(file)
            || self.config_file_dependencies.iter().any(|d| d == file)
    }

    /// `.env`, `.env.local`, `.env.development`, ... inside the env dir
    pub fn is_env_file(&self, file: &str) -> bool {
        let Some((dir, name)) = file.rsplit_once('/') else {
            return false;
        };
        dir == self.env_dir && name.starts_with(".env")
    }

    /// Whether `/@fs/` may serve `file`
    pub fn is_fs_allowed(&self, file: &str) -> bool {
        self.server.fs_allow.iter().any(|dir| {
            file == dir
                || file
                    .strip_prefix(dir.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
