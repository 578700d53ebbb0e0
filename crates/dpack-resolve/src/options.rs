use dpack_config::ResolvedConfig;

/// Marker id for modules a package's `browser` field maps to `false`
pub const BROWSER_EXTERNAL_ID: &str = "__dpack-browser-external";

/// Marker id for optional peer dependencies that are not installed
pub const OPTIONAL_PEER_DEP_ID: &str = "__dpack-optional-peer-dep";

/// Options that shape one resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Normalized project root
    pub root: String,
    pub is_production: bool,
    pub main_fields: Vec<String>,
    pub conditions: Vec<String>,
    pub extensions: Vec<String>,
    pub dedupe: Vec<String>,
    pub preserve_symlinks: bool,
    /// Resolving for the dev server (as opposed to the scanner's bundler)
    pub as_src: bool,
    /// Treat `foo` as `./foo` before trying it as a package
    pub prefer_relative: bool,
    pub try_index: bool,
    pub is_require: bool,
    /// The importer is TypeScript, so `./a.js` may really be `./a.ts`
    pub is_from_ts_importer: bool,
    /// Scanner mode: never consult or feed the optimizer
    pub scan: bool,
    pub skip_package_json: bool,
}

impl ResolveOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            root: config.root.clone(),
            is_production: config.is_production,
            main_fields: config.resolve.main_fields.clone(),
            conditions: config.resolve.conditions.clone(),
            extensions: config.resolve.extensions.clone(),
            dedupe: config.resolve.dedupe.clone(),
            preserve_symlinks: config.resolve.preserve_symlinks,
            as_src: true,
            prefer_relative: false,
            try_index: true,
            is_require: false,
            is_from_ts_importer: false,
            scan: false,
            skip_package_json: false,
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            root: String::from("/"),
            is_production: false,
            main_fields: dpack_graph::url::DEFAULT_MAIN_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            conditions: Vec::new(),
            extensions: dpack_graph::url::DEFAULT_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dedupe: Vec::new(),
            preserve_symlinks: false,
            as_src: true,
            prefer_relative: false,
            try_index: true,
            is_require: false,
            is_from_ts_importer: false,
            scan: false,
            skip_package_json: false,
        }
    }
}

/// Per-call flags that differ from the resolver's base options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveRequest {
    pub scan: bool,
    pub is_require: bool,
}
