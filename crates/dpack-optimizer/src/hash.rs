//! Hashes that decide when pre-bundled deps are stale.

use serde::Serialize;

use dpack_config::ResolvedConfig;
use dpack_graph::Runtime;
use dpack_graph::utils::{get_hash, lookup_file};

const LOCKFILES: &[&str] = &["package-lock.json", "yarn.lock", "pnpm-lock.yaml", "bun.lockb"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedConfig<'a> {
    mode: &'a str,
    root: &'a str,
    main_fields: &'a [String],
    conditions: &'a [String],
    extensions: &'a [String],
    dedupe: &'a [String],
    preserve_symlinks: bool,
    include: &'a [String],
    exclude: &'a [String],
    needs_interop: &'a [String],
}

/// Hash of the nearest lockfile plus every config value that changes what
/// the pre-bundle contains.
pub fn get_dep_hash(config: &ResolvedConfig, runtime: &dyn Runtime) -> String {
    let lockfile = lookup_file(config.root_path(), LOCKFILES, |_| true)
        .and_then(|path| runtime.read_to_string_sync(&path).ok())
        .unwrap_or_default();

    let hashed = HashedConfig {
        mode: &config.mode,
        root: &config.root,
        main_fields: &config.resolve.main_fields,
        conditions: &config.resolve.conditions,
        extensions: &config.resolve.extensions,
        dedupe: &config.resolve.dedupe,
        preserve_symlinks: config.resolve.preserve_symlinks,
        include: &config.optimize_deps.include,
        exclude: &config.optimize_deps.exclude,
        needs_interop: &config.optimize_deps.needs_interop,
    };
    let config_json = serde_json::to_string(&hashed).unwrap_or_default();
    get_hash(format!("{lockfile}{config_json}"))
}

/// Browser hash for a generation that bundled `deps` (id, src) pairs.
pub fn get_optimized_browser_hash<'a>(
    hash: &str,
    deps: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    timestamp: &str,
) -> String {
    let map: indexmap::IndexMap<&str, &str> = deps
        .into_iter()
        .map(|(id, src)| (id, src.unwrap_or_default()))
        .collect();
    let json = serde_json::to_string(&map).unwrap_or_default();
    get_hash(format!("{hash}{json}{timestamp}"))
}

/// Browser hash handed out for deps discovered since the last commit: the
/// committed deps plus the new ones, so it changes whenever the set grows.
pub fn get_discovered_browser_hash<'a>(
    hash: &str,
    known: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    missing: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    timestamp: &str,
) -> String {
    get_optimized_browser_hash(hash, known.into_iter().chain(missing), timestamp)
}

/// Content hash of one output file, stable across runs for equal code.
pub fn get_file_hash(main_hash: &str, code: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(main_hash.as_bytes());
    hasher.update(code.as_bytes());
    hasher.finalize().to_hex()[..8].to_string()
}
