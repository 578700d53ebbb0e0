use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dpack_config::{LoadedConfig, ResolvedConfig, UserConfig};
use dpack_graph::utils::normalize_path;
use dpack_graph::{NativeRuntime, Runtime};
use dpack_optimizer::{
    BundleOutput, BundleRequest, BundledChunk, DepBundler, DepsOptimizer,
    ERR_OPTIMIZE_DEPS_PROCESSING_ERROR, METADATA_FILE, OptimizeError, OptimizerEvent,
    OptimizerRegistry, OptimizerState, Result,
};
use dpack_resolve::{DepsOptimizerHandle, ResolveOptions, Resolver};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Emits `// <id>` plus the entry source for every entry. CommonJS entries
/// come out as a single default export, like a real pre-bundle.
#[derive(Debug, Default)]
struct FakeBundler {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl DepBundler for FakeBundler {
    async fn bundle(&self, request: BundleRequest) -> Result<BundleOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(OptimizeError::Bundle("fake bundler failure".into()));
        }
        let chunks = request
            .entries
            .iter()
            .map(|entry| {
                let source = fs::read_to_string(&entry.src).unwrap_or_default();
                let exports = if source.contains("module.exports") {
                    vec!["default".to_string()]
                } else {
                    vec!["default".to_string(), "named".to_string()]
                };
                BundledChunk {
                    file_name: format!("{}.js", entry.flat_id),
                    code: format!("// {}\nexport default {{}}\n", entry.id),
                    is_entry: true,
                    entry_name: Some(entry.flat_id.clone()),
                    exports,
                    imports: Vec::new(),
                }
            })
            .collect();
        Ok(BundleOutput { chunks })
    }
}

/// Records the entry count of every run and can hold one run open until
/// the test releases it. Output embeds `revision` so a bump changes every
/// file hash.
#[derive(Debug, Default)]
struct GatedBundler {
    runs: Mutex<Vec<usize>>,
    revision: AtomicUsize,
    hold_next: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl DepBundler for GatedBundler {
    async fn bundle(&self, request: BundleRequest) -> Result<BundleOutput> {
        self.runs.lock().push(request.entries.len());
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let revision = self.revision.load(Ordering::SeqCst);
        let chunks = request
            .entries
            .iter()
            .map(|entry| BundledChunk {
                file_name: format!("{}.js", entry.flat_id),
                code: format!("// {} r{revision}\nexport default {{}}\n", entry.id),
                is_entry: true,
                entry_name: Some(entry.flat_id.clone()),
                exports: vec!["default".to_string()],
                imports: Vec::new(),
            })
            .collect();
        Ok(BundleOutput { chunks })
    }
}

struct Project {
    _temp: TempDir,
    root: String,
}

impl Project {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap().join("app");
        fs::create_dir_all(&root).unwrap();
        let project = Self {
            _temp: temp,
            root: normalize_path(root),
        };
        project.write("package.json", r#"{"name":"app","dependencies":{"lodash":"^4.0.0"}}"#);
        project.write(
            "index.html",
            r#"<!doctype html><html><body><script type="module" src="/main.js"></script></body></html>"#,
        );
        project.write(
            "main.js",
            "import _ from \"lodash\"\nimport \"not-installed\"\nimport { util } from \"./util.js\"\n",
        );
        project.write("util.js", "export const util = 1\n");
        project.write(
            "node_modules/lodash/package.json",
            r#"{"name":"lodash","version":"4.17.21","main":"index.js"}"#,
        );
        project.write("node_modules/lodash/index.js", "module.exports = { chunk() {} }\n");
        project.write(
            "node_modules/dayjs/package.json",
            r#"{"name":"dayjs","version":"1.11.0","module":"esm/index.js"}"#,
        );
        project.write("node_modules/dayjs/esm/index.js", "export default function dayjs() {}\n");
        project
    }

    fn write(&self, rel: &str, content: &str) {
        let path = Path::new(&self.root).join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn path(&self, rel: &str) -> String {
        format!("{}/{rel}", self.root)
    }

    fn config(&self, force: bool) -> Arc<ResolvedConfig> {
        self.config_with_debounce(force, 10)
    }

    fn config_with_debounce(&self, force: bool, debounce_ms: u64) -> Arc<ResolvedConfig> {
        let mut user = UserConfig::default();
        user.optimize_deps.debounce_ms = debounce_ms;
        user.optimize_deps.force = force;
        Arc::new(
            ResolvedConfig::from_loaded(
                LoadedConfig {
                    config: user,
                    config_file: None,
                },
                Path::new(&self.root),
            )
            .unwrap(),
        )
    }

    fn optimizer<B: DepBundler + 'static>(
        &self,
        config: Arc<ResolvedConfig>,
        bundler: Arc<B>,
    ) -> Arc<DepsOptimizer> {
        let runtime: Arc<dyn Runtime> = Arc::new(NativeRuntime::new());
        let resolver = Arc::new(Resolver::new(
            ResolveOptions::from_config(&config),
            Arc::clone(&runtime),
        ));
        DepsOptimizer::new(config, runtime, resolver, bundler)
    }
}

#[tokio::test]
async fn test_cold_start_scans_and_commits() {
    let project = Project::new();
    let bundler = Arc::new(FakeBundler::default());
    let optimizer = project.optimizer(project.config(false), Arc::clone(&bundler));
    let mut events = optimizer.subscribe();

    optimizer.init().await.unwrap();
    optimizer.wait_for_first_run().await.unwrap();

    assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(optimizer.state(), OptimizerState::Idle);

    let metadata = optimizer.metadata();
    let lodash = metadata.optimized.get("lodash").expect("lodash optimized");
    assert_eq!(lodash.file, project.path("node_modules/.dpack/deps/lodash.js"));
    assert_eq!(lodash.src.as_deref(), Some(project.path("node_modules/lodash/index.js").as_str()));
    assert_eq!(lodash.needs_interop, Some(true));
    assert!(!metadata.optimized.contains_key("not-installed"));
    assert!(metadata.discovered.is_empty());

    assert!(Path::new(&lodash.file).is_file());
    let written =
        fs::read_to_string(project.path(&format!("node_modules/.dpack/deps/{METADATA_FILE}"))).unwrap();
    assert!(written.contains("\"lodash\""));

    // the first run never reloads: nothing optimized was served before it
    assert_eq!(
        events.try_recv().unwrap(),
        OptimizerEvent::Optimized {
            deps: vec!["lodash".to_string()]
        }
    );
}

#[tokio::test]
async fn test_missing_import_is_batched_into_next_run() {
    let project = Project::new();
    let bundler = Arc::new(FakeBundler::default());
    let optimizer = project.optimizer(project.config(false), Arc::clone(&bundler));
    optimizer.init().await.unwrap();
    optimizer.wait_for_first_run().await.unwrap();
    let first_hash = optimizer.metadata().browser_hash;
    let lodash_hash = optimizer.metadata().optimized["lodash"].file_hash.clone();

    let dep = optimizer.register_missing_import("dayjs", &project.path("node_modules/dayjs/esm/index.js"));
    assert_eq!(dep.file, project.path("node_modules/.dpack/deps/dayjs.js"));
    assert_ne!(dep.browser_hash, first_hash);

    // asking again before the run returns the same location
    let again = optimizer.register_missing_import("dayjs", &project.path("node_modules/dayjs/esm/index.js"));
    assert_eq!(again, dep);

    // waits for the batched run to commit
    let code = optimizer.load_optimized_dep(&dep.optimized_id()).await.unwrap();
    assert!(code.starts_with("// dayjs"));

    assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);
    let metadata = optimizer.metadata();
    assert!(metadata.optimized.contains_key("dayjs"));
    assert_ne!(metadata.browser_hash, first_hash);
    // no reload: urls already handed out keep their hash
    assert_eq!(metadata.optimized["dayjs"].browser_hash, dep.browser_hash);
    assert_eq!(metadata.optimized["lodash"].file_hash, lodash_hash);
    assert_eq!(metadata.dep_info_list, vec!["lodash".to_string(), "dayjs".to_string()]);
}

#[tokio::test]
async fn test_stale_reload_run_is_folded_into_next_run() {
    let project = Project::new();
    let bundler = Arc::new(GatedBundler::default());
    // long enough that the in-flight run finishes before the discovery timer fires
    let optimizer = project.optimizer(project.config_with_debounce(false, 200), Arc::clone(&bundler));
    optimizer.init().await.unwrap();
    optimizer.wait_for_first_run().await.unwrap();
    let mut events = optimizer.subscribe();

    // every output changes, so this run would need a page reload
    bundler.revision.store(1, Ordering::SeqCst);
    bundler.hold_next.store(true, Ordering::SeqCst);
    let run = tokio::spawn({
        let optimizer = Arc::clone(&optimizer);
        async move { optimizer.rerun().await }
    });
    bundler.entered.notified().await;

    let dep = optimizer.register_missing_import("dayjs", &project.path("node_modules/dayjs/esm/index.js"));
    bundler.release.notify_one();
    run.await.unwrap().unwrap();

    // nothing from the discarded run was committed
    let metadata = optimizer.metadata();
    assert!(!metadata.optimized.contains_key("dayjs"));
    assert!(metadata.discovered.contains_key("dayjs"));
    let lodash = fs::read_to_string(project.path("node_modules/.dpack/deps/lodash.js")).unwrap();
    assert!(lodash.contains("r0"), "{lodash}");

    // one reload, after the run that picked up dayjs commits
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, OptimizerEvent::FullReload);
    assert!(events.try_recv().is_err());
    assert_eq!(*bundler.runs.lock(), vec![1, 1, 2]);

    let metadata = optimizer.metadata();
    assert!(metadata.optimized.contains_key("dayjs"));
    assert!(metadata.discovered.is_empty());
    let dayjs = fs::read_to_string(&dep.file).unwrap();
    assert!(dayjs.starts_with("// dayjs r1"), "{dayjs}");

    let cache = Path::new(&project.root).join("node_modules/.dpack");
    let names: Vec<String> = fs::read_dir(cache)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["deps".to_string()]);
}

#[tokio::test]
async fn test_unchanged_rerun_is_a_no_op() {
    let project = Project::new();
    let bundler = Arc::new(FakeBundler::default());
    let optimizer = project.optimizer(project.config(false), Arc::clone(&bundler));
    optimizer.init().await.unwrap();
    optimizer.wait_for_first_run().await.unwrap();
    let before = optimizer.metadata();

    let mut events = optimizer.subscribe();
    optimizer.rerun().await.unwrap();
    let after = optimizer.metadata();

    assert_eq!(
        before.optimized["lodash"].file_hash,
        after.optimized["lodash"].file_hash
    );
    assert_eq!(
        before.optimized["lodash"].browser_hash,
        after.optimized["lodash"].browser_hash
    );
    assert!(matches!(events.try_recv().unwrap(), OptimizerEvent::Optimized { .. }));
}

#[tokio::test]
async fn test_cached_metadata_is_reused() {
    let project = Project::new();
    let bundler = Arc::new(FakeBundler::default());
    let first = project.optimizer(project.config(false), Arc::clone(&bundler));
    first.init().await.unwrap();
    first.wait_for_first_run().await.unwrap();
    first.close().await;

    let second = project.optimizer(project.config(false), Arc::clone(&bundler));
    second.init().await.unwrap();
    assert_eq!(second.state(), OptimizerState::Idle);
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        second.metadata().optimized["lodash"].file,
        project.path("node_modules/.dpack/deps/lodash.js")
    );

    // force ignores the cache
    let forced = project.optimizer(project.config(true), Arc::clone(&bundler));
    forced.init().await.unwrap();
    forced.wait_for_first_run().await.unwrap();
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_lockfile_change_invalidates_cache() {
    let project = Project::new();
    let bundler = Arc::new(FakeBundler::default());
    let first = project.optimizer(project.config(false), Arc::clone(&bundler));
    first.init().await.unwrap();
    first.wait_for_first_run().await.unwrap();

    project.write("package-lock.json", r#"{"lockfileVersion":3}"#);
    let second = project.optimizer(project.config(false), Arc::clone(&bundler));
    second.init().await.unwrap();
    assert_ne!(second.state(), OptimizerState::Idle);
    second.wait_for_first_run().await.unwrap();
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_run_rejects_and_clears_discovered() {
    let project = Project::new();
    let bundler = Arc::new(FakeBundler::default());
    bundler.fail.store(true, Ordering::SeqCst);
    let optimizer = project.optimizer(project.config(false), Arc::clone(&bundler));
    optimizer.init().await.unwrap();

    let err = optimizer.wait_for_first_run().await.unwrap_err();
    assert_eq!(err.code(), Some(ERR_OPTIMIZE_DEPS_PROCESSING_ERROR));
    assert!(err.to_string().contains("fake bundler failure"));

    let metadata = optimizer.metadata();
    assert!(metadata.discovered.is_empty());
    assert!(metadata.optimized.is_empty());
    // nothing half-written next to the cache
    let cache = Path::new(&project.root).join("node_modules/.dpack");
    if cache.is_dir() {
        for entry in fs::read_dir(cache).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(!name.to_string_lossy().starts_with("deps_temp_"));
        }
    }
}

#[tokio::test]
async fn test_load_optimized_dep_checks_version() {
    let project = Project::new();
    let bundler = Arc::new(FakeBundler::default());
    let optimizer = project.optimizer(project.config(false), Arc::clone(&bundler));
    optimizer.init().await.unwrap();
    optimizer.wait_for_first_run().await.unwrap();

    let info = optimizer.dep_info_from_id("lodash").unwrap();
    let code = optimizer
        .load_optimized_dep(&info.optimized_id())
        .await
        .unwrap();
    assert!(code.starts_with("// lodash"));

    let stale = format!("{}?v=00000000", info.file);
    let err = optimizer.load_optimized_dep(&stale).await.unwrap_err();
    assert!(matches!(err, OptimizeError::Outdated { .. }));
}

#[tokio::test]
async fn test_optimized_dep_paths() {
    let project = Project::new();
    let optimizer = project.optimizer(project.config(false), Arc::new(FakeBundler::default()));

    assert!(optimizer.is_optimized_dep_file(&project.path("node_modules/.dpack/deps/vue.js")));
    assert!(!optimizer.is_optimized_dep_file(&project.path("node_modules/vue/index.js")));
    assert!(optimizer.is_optimized_dep_url("/node_modules/.dpack/deps/vue.js?v=1234"));
    assert!(optimizer.is_optimized_dep_url(&format!(
        "/@fs{}",
        project.path("node_modules/.dpack/deps/vue.js")
    )));
    assert!(!optimizer.is_optimized_dep_url("/src/main.js"));
}

#[tokio::test]
async fn test_registry_keys_by_config() {
    let project = Project::new();
    let registry = OptimizerRegistry::new();
    let config = project.config(false);
    let runtime: Arc<dyn Runtime> = Arc::new(NativeRuntime::new());
    let resolver = Arc::new(Resolver::new(
        ResolveOptions::from_config(&config),
        Arc::clone(&runtime),
    ));
    let bundler: Arc<dyn DepBundler> = Arc::new(FakeBundler::default());

    let (a, created) = registry.get_or_create(&config, Arc::clone(&runtime), Arc::clone(&resolver), Arc::clone(&bundler));
    assert!(created);
    let (b, created) = registry.get_or_create(&config, Arc::clone(&runtime), Arc::clone(&resolver), Arc::clone(&bundler));
    assert!(!created);
    assert!(Arc::ptr_eq(&a, &b));
    assert!(resolver.deps_optimizer().is_some());

    registry.close(config.id).await;
    assert!(registry.is_empty());
    assert_eq!(a.state(), OptimizerState::Closed);
}
