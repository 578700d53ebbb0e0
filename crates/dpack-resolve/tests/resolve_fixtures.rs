use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use dpack_graph::NativeRuntime;
use dpack_graph::url::flatten_id;
use dpack_graph::utils::normalize_path;
use dpack_resolve::{
    DepsOptimizerHandle, OptimizedDepRef, ResolveOptions, ResolveRequest, Resolved, Resolver,
};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

struct Fixture {
    _temp: TempDir,
    root: String,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = normalize_path(temp.path().canonicalize().unwrap());
        Self { _temp: temp, root }
    }

    fn write(&self, rel: &str, content: &str) {
        write(Path::new(&self.root), rel, content);
    }

    fn path(&self, rel: &str) -> String {
        format!("{}/{rel}", self.root)
    }

    fn resolver(&self) -> Resolver {
        let options = ResolveOptions {
            root: self.root.clone(),
            ..Default::default()
        };
        Resolver::new(options, Arc::new(NativeRuntime::new()))
    }
}

#[derive(Default)]
struct FakeOptimizer {
    cache_dir: String,
    registered: Mutex<Vec<(String, String)>>,
    excluded: Vec<String>,
}

impl FakeOptimizer {
    fn dep(&self, id: &str, src: &str) -> OptimizedDepRef {
        OptimizedDepRef {
            id: id.to_string(),
            file: format!("{}/{}.js", self.cache_dir, flatten_id(id)),
            src: Some(src.to_string()),
            browser_hash: "abc123".to_string(),
        }
    }
}

#[async_trait]
impl DepsOptimizerHandle for FakeOptimizer {
    async fn scan_processing(&self) {}

    fn browser_hash(&self) -> String {
        "abc123".to_string()
    }

    fn is_optimized_dep_file(&self, id: &str) -> bool {
        id.starts_with(&self.cache_dir)
    }

    fn is_optimized_dep_url(&self, _url: &str) -> bool {
        false
    }

    fn dep_info_from_id(&self, id: &str) -> Option<OptimizedDepRef> {
        self.registered
            .lock()
            .iter()
            .find(|(dep, _)| dep == id)
            .map(|(dep, src)| self.dep(dep, src))
    }

    fn dep_info_from_file(&self, file: &str) -> Option<OptimizedDepRef> {
        self.dep_infos().into_iter().find(|d| d.file == file)
    }

    fn dep_infos(&self) -> Vec<OptimizedDepRef> {
        self.registered
            .lock()
            .iter()
            .map(|(dep, src)| self.dep(dep, src))
            .collect()
    }

    fn register_missing_import(&self, id: &str, resolved: &str) -> OptimizedDepRef {
        self.registered
            .lock()
            .push((id.to_string(), resolved.to_string()));
        self.dep(id, resolved)
    }

    fn is_excluded(&self, id: &str) -> bool {
        self.excluded.iter().any(|e| e == id)
    }
}

async fn resolve(resolver: &Resolver, id: &str, importer: &str) -> Option<Resolved> {
    resolver
        .resolve(id, Some(importer), ResolveRequest::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_relative_ts_source_round_trip() {
    let fx = Fixture::new();
    fx.write("src/a.js", "import './x'");
    fx.write("src/x.ts", "export const x = 1");
    let resolver = fx.resolver();
    let importer = fx.path("src/a.js");

    let first = resolve(&resolver, "./x", &importer).await.unwrap();
    assert_eq!(first.id, fx.path("src/x.ts"));
    assert!(!first.external);

    let second = resolve(&resolver, &first.id, &importer).await.unwrap();
    assert_eq!(second.id, first.id);
}

#[tokio::test]
async fn test_js_specifier_from_ts_importer_finds_ts_source() {
    let fx = Fixture::new();
    fx.write("src/main.ts", "");
    fx.write("src/util.ts", "");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "./util.js", &fx.path("src/main.ts"))
        .await
        .unwrap();
    assert_eq!(resolved.id, fx.path("src/util.ts"));
}

#[tokio::test]
async fn test_root_relative_and_fs_prefix() {
    let fx = Fixture::new();
    fx.write("src/main.js", "");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "/src/main.js", &fx.path("index.html"))
        .await
        .unwrap();
    assert_eq!(resolved.id, fx.path("src/main.js"));

    let fs_id = format!("/@fs{}", fx.path("src/main"));
    let resolved = resolve(&resolver, &fs_id, &fx.path("index.html")).await.unwrap();
    assert_eq!(resolved.id, fx.path("src/main.js"));
}

#[tokio::test]
async fn test_html_importer_treats_word_ids_as_relative() {
    let fx = Fixture::new();
    fx.write("main.js", "");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "main.js", &fx.path("index.html"))
        .await
        .unwrap();
    assert_eq!(resolved.id, fx.path("main.js"));
}

#[tokio::test]
async fn test_external_and_data_urls() {
    let fx = Fixture::new();
    let resolver = fx.resolver();
    let importer = fx.path("src/a.js");

    let external = resolve(&resolver, "https://cdn.example.com/x.js", &importer)
        .await
        .unwrap();
    assert!(external.external);
    assert!(resolve(&resolver, "data:text/javascript,export default 1", &importer)
        .await
        .is_none());
}

#[tokio::test]
async fn test_bare_import_uses_exports_then_module() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write(
        "node_modules/with-exports/package.json",
        r#"{ "name": "with-exports", "exports": { ".": { "import": "./esm/index.js", "require": "./cjs/index.js" } } }"#,
    );
    fx.write("node_modules/with-exports/esm/index.js", "");
    fx.write(
        "node_modules/with-module/package.json",
        r#"{ "name": "with-module", "main": "index.cjs", "module": "index.mjs" }"#,
    );
    fx.write("node_modules/with-module/index.mjs", "");
    let resolver = fx.resolver();
    let importer = fx.path("src/a.js");

    let resolved = resolve(&resolver, "with-exports", &importer).await.unwrap();
    assert_eq!(resolved.id, fx.path("node_modules/with-exports/esm/index.js"));

    let resolved = resolve(&resolver, "with-module", &importer).await.unwrap();
    assert_eq!(resolved.id, fx.path("node_modules/with-module/index.mjs"));
}

#[tokio::test]
async fn test_deep_import_through_exports_pattern() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write(
        "node_modules/kit/package.json",
        r#"{ "name": "kit", "exports": { ".": "./index.js", "./features/*": "./dist/features/*.js" } }"#,
    );
    fx.write("node_modules/kit/dist/features/auth.js", "");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "kit/features/auth", &fx.path("src/a.js"))
        .await
        .unwrap();
    assert_eq!(resolved.id, fx.path("node_modules/kit/dist/features/auth.js"));

    let err = resolver
        .resolve("kit/private", Some(&fx.path("src/a.js")), ResolveRequest::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("is not defined by \"exports\""));
}

#[tokio::test]
async fn test_outermost_exports_map_wins() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write(
        "node_modules/outer/package.json",
        r#"{ "name": "outer", "exports": { "./sub": "./lib/sub.js" } }"#,
    );
    fx.write("node_modules/outer/lib/sub.js", "");
    fx.write(
        "node_modules/outer/sub/package.json",
        r#"{ "name": "outer-sub", "main": "wrong.js" }"#,
    );
    fx.write("node_modules/outer/sub/wrong.js", "");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "outer/sub", &fx.path("src/a.js")).await.unwrap();
    assert_eq!(resolved.id, fx.path("node_modules/outer/lib/sub.js"));
}

#[tokio::test]
async fn test_nested_chain_resolves_inner_copy() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write("node_modules/dep/package.json", r#"{ "name": "dep", "version": "2.0.0" }"#);
    fx.write("node_modules/dep/index.js", "");
    fx.write("node_modules/host/package.json", r#"{ "name": "host", "main": "index.js" }"#);
    fx.write("node_modules/host/index.js", "");
    fx.write(
        "node_modules/host/node_modules/dep/package.json",
        r#"{ "name": "dep", "version": "1.0.0" }"#,
    );
    fx.write("node_modules/host/node_modules/dep/index.js", "");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "host > dep", &fx.path("src/a.js")).await.unwrap();
    assert_eq!(resolved.id, fx.path("node_modules/host/node_modules/dep/index.js"));
}

#[tokio::test]
async fn test_optional_peer_dependency_marker() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write(
        "node_modules/lib/package.json",
        r#"{
            "name": "lib",
            "peerDependencies": { "maybe": "*" },
            "peerDependenciesMeta": { "maybe": { "optional": true } }
        }"#,
    );
    fx.write("node_modules/lib/index.js", "import 'maybe'");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "maybe", &fx.path("node_modules/lib/index.js"))
        .await
        .unwrap();
    assert_eq!(resolved.id, "__dpack-optional-peer-dep:maybe:lib");
}

#[tokio::test]
async fn test_node_builtin_is_browser_external() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    let resolver = fx.resolver();

    let resolved = resolve(&resolver, "node:fs", &fx.path("src/a.js")).await.unwrap();
    assert_eq!(resolved.id, "__dpack-browser-external:node:fs");
}

#[tokio::test]
async fn test_missing_import_registered_with_optimizer() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write("node_modules/lodash-es/package.json", r#"{ "name": "lodash-es", "module": "lodash.js" }"#);
    fx.write("node_modules/lodash-es/lodash.js", "export default {}");
    let resolver = fx.resolver();

    let optimizer: Arc<dyn DepsOptimizerHandle> = Arc::new(FakeOptimizer {
        cache_dir: fx.path("node_modules/.dpack/deps"),
        ..Default::default()
    });
    resolver.set_deps_optimizer(Arc::downgrade(&optimizer));

    let resolved = resolve(&resolver, "lodash-es", &fx.path("src/a.js")).await.unwrap();
    assert_eq!(
        resolved.id,
        format!("{}?v=abc123", fx.path("node_modules/.dpack/deps/lodash-es.js"))
    );

    // Known now, answered from metadata
    let again = resolve(&resolver, "lodash-es", &fx.path("src/a.js")).await.unwrap();
    assert_eq!(again.id, resolved.id);
}

#[tokio::test]
async fn test_excluded_dep_gets_version_query() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write("node_modules/esm-only/package.json", r#"{ "name": "esm-only", "module": "index.js" }"#);
    fx.write("node_modules/esm-only/index.js", "export const a = 1");
    let resolver = fx.resolver();

    let optimizer: Arc<dyn DepsOptimizerHandle> = Arc::new(FakeOptimizer {
        cache_dir: fx.path("node_modules/.dpack/deps"),
        excluded: vec!["esm-only".to_string()],
        ..Default::default()
    });
    resolver.set_deps_optimizer(Arc::downgrade(&optimizer));

    let resolved = resolve(&resolver, "esm-only", &fx.path("src/a.js")).await.unwrap();
    assert_eq!(
        resolved.id,
        format!("{}?v=abc123", fx.path("node_modules/esm-only/index.js"))
    );
}

#[tokio::test]
async fn test_scan_mode_ignores_optimizer() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    fx.write("node_modules/dep/package.json", r#"{ "name": "dep" }"#);
    fx.write("node_modules/dep/index.js", "");
    let resolver = fx.resolver();

    let optimizer: Arc<dyn DepsOptimizerHandle> = Arc::new(FakeOptimizer {
        cache_dir: fx.path("node_modules/.dpack/deps"),
        ..Default::default()
    });
    resolver.set_deps_optimizer(Arc::downgrade(&optimizer));

    let resolved = resolver
        .resolve(
            "dep",
            Some(&fx.path("src/a.js")),
            ResolveRequest {
                scan: true,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.id, fx.path("node_modules/dep/index.js"));
}

#[tokio::test]
async fn test_unresolvable_bare_import_is_none() {
    let fx = Fixture::new();
    fx.write("src/a.js", "");
    let resolver = fx.resolver();
    assert!(resolve(&resolver, "not-installed", &fx.path("src/a.js")).await.is_none());
}
