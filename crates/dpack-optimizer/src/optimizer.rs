//! The dependency optimizer.
//!
//! One instance per resolved config. It keeps every bare import the app
//! uses available as a pre-bundled ESM file under `<cacheDir>/deps`:
//!
//! 1. on start, reuse `_metadata.json` when its hash still matches,
//!    otherwise seed `optimizeDeps.include` and scan the project in the
//!    background
//! 2. bundle the full known set into a temporary directory
//! 3. commit by replacing the deps directory, then open the processing
//!    gates of every dep that was waiting
//!
//! Deps found at request time are registered through
//! [`DepsOptimizerHandle::register_missing_import`] and batched into the
//! next run after a debounce window. Runs never overlap.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use dpack_config::ResolvedConfig;
use dpack_graph::Runtime;
use dpack_graph::url::{DEP_VERSION_RE, FS_PREFIX, clean_url, flatten_id, normalize_id};
use dpack_graph::utils::{module_list_contains, now_ms, root_relative};
use dpack_resolve::{DepsOptimizerHandle, OptimizedDepRef, ResolveRequest, Resolver};

use crate::bundler::{BundleOutput, BundleRequest, DepBundler, DepEntry};
use crate::error::{OptimizeError, Result};
use crate::hash::{
    get_dep_hash, get_discovered_browser_hash, get_file_hash, get_optimized_browser_hash,
};
use crate::interop::{find_interop_mismatches, needs_interop, parse_exports_data};
use crate::metadata::{DepOptimizationMetadata, METADATA_FILE, OptimizedDepInfo};
use crate::processing::{
    Processing, ProcessingHandle, ProcessingQueue, processing, reject_all, resolve_all,
};
use crate::scan::scan_imports;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    Cold,
    Scanning,
    Bundling,
    Committing,
    Idle,
    Closed,
}

/// Broadcast to the server after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizerEvent {
    /// Already-served optimized urls are stale; reload the page.
    FullReload,
    /// A run committed without invalidating anything served so far.
    Optimized { deps: Vec<String> },
}

struct RunOutput {
    metadata: DepOptimizationMetadata,
    temp_dir: String,
}

pub struct DepsOptimizer {
    config: Arc<ResolvedConfig>,
    runtime: Arc<dyn Runtime>,
    resolver: Arc<Resolver>,
    bundler: Arc<dyn DepBundler>,
    weak: Weak<DepsOptimizer>,

    metadata: RwLock<DepOptimizationMetadata>,
    /// Bumped on every commit so loads can tell the ledger moved under them
    generation: AtomicU64,
    state: Mutex<OptimizerState>,
    session_timestamp: String,
    deps_cache_dir: String,

    run_lock: tokio::sync::Mutex<()>,
    debounce: Mutex<Option<AbortHandle>>,
    queue: Mutex<ProcessingQueue>,
    new_deps_discovered: AtomicBool,
    scanning: AtomicBool,
    scan_gate: Mutex<Processing>,
    first_run_gate: Mutex<Processing>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    events: broadcast::Sender<OptimizerEvent>,
}

impl std::fmt::Debug for DepsOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepsOptimizer")
            .field("deps_cache_dir", &self.deps_cache_dir)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl DepsOptimizer {
    /// Create an optimizer and attach it to `resolver`.
    pub fn new(
        config: Arc<ResolvedConfig>,
        runtime: Arc<dyn Runtime>,
        resolver: Arc<Resolver>,
        bundler: Arc<dyn DepBundler>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        let deps_cache_dir = config.deps_cache_dir();
        let optimizer = Arc::new_cyclic(|weak| DepsOptimizer {
            config,
            runtime,
            resolver: Arc::clone(&resolver),
            bundler,
            weak: weak.clone(),
            metadata: RwLock::new(DepOptimizationMetadata::default()),
            generation: AtomicU64::new(0),
            state: Mutex::new(OptimizerState::Cold),
            session_timestamp: now_ms().to_string(),
            deps_cache_dir,
            run_lock: tokio::sync::Mutex::new(()),
            debounce: Mutex::new(None),
            queue: Mutex::new(ProcessingQueue::default()),
            new_deps_discovered: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            scan_gate: Mutex::new(Processing::ready()),
            first_run_gate: Mutex::new(Processing::ready()),
            scan_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            events,
        });
        let handle: Weak<dyn DepsOptimizerHandle> = Arc::downgrade(&optimizer) as Weak<dyn DepsOptimizerHandle>;
        resolver.set_deps_optimizer(handle);
        optimizer
    }

    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.config
    }

    pub fn state(&self) -> OptimizerState {
        *self.state.lock()
    }

    fn set_state(&self, state: OptimizerState) {
        *self.state.lock() = state;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OptimizerEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the ledger.
    pub fn metadata(&self) -> DepOptimizationMetadata {
        self.metadata.read().clone()
    }

    pub fn deps_cache_dir(&self) -> &str {
        &self.deps_cache_dir
    }

    /// Load cached metadata or start a cold run in the background.
    pub async fn init(&self) -> Result<()> {
        let main_hash = get_dep_hash(&self.config, self.runtime.as_ref());

        if !self.config.optimize_deps.force {
            if let Some(cached) = self.load_cached_metadata(&main_hash).await {
                debug!(deps = cached.optimized.len(), "reusing cached optimized dependencies");
                *self.metadata.write() = cached;
                self.set_state(OptimizerState::Idle);
                return Ok(());
            }
        } else {
            info!("forced re-optimization of dependencies");
        }

        let browser_hash = get_optimized_browser_hash(
            &main_hash,
            std::iter::empty(),
            &self.session_timestamp,
        );
        *self.metadata.write() = DepOptimizationMetadata::new(main_hash, browser_hash);

        let unresolved = self.add_manually_included().await;
        if !unresolved.is_empty() {
            error!("{}", OptimizeError::UnresolvedInclude(unresolved));
        }

        let Some(this) = self.weak.upgrade() else {
            return Err(OptimizeError::Closed);
        };
        let (scan_handle, scan_gate) = processing();
        let (first_run_handle, first_run_gate) = processing();
        *self.scan_gate.lock() = scan_gate;
        *self.first_run_gate.lock() = first_run_gate;
        self.scanning.store(true, Ordering::SeqCst);
        self.set_state(OptimizerState::Scanning);

        let task = tokio::spawn(async move {
            this.run_scan(scan_handle).await;
            match this.rerun().await {
                Ok(()) => first_run_handle.resolve(),
                Err(err) => first_run_handle.reject(err.to_string()),
            }
        });
        *self.scan_task.lock() = Some(task);
        Ok(())
    }

    async fn load_cached_metadata(&self, main_hash: &str) -> Option<DepOptimizationMetadata> {
        let path = Path::new(&self.deps_cache_dir).join(METADATA_FILE);
        let content = self.runtime.read_to_string(&path).await.ok()?;
        match DepOptimizationMetadata::parse(&content, &self.deps_cache_dir) {
            Ok(cached) if cached.hash == main_hash => Some(cached),
            Ok(_) => {
                debug!("optimized dependencies hash changed, re-optimizing");
                None
            }
            Err(err) => {
                warn!(error = %err, "ignoring unreadable {METADATA_FILE}");
                None
            }
        }
    }

    /// Seed `optimizeDeps.include`. Returns the ids that did not resolve.
    async fn add_manually_included(&self) -> Vec<String> {
        let mut unresolved = Vec::new();
        for id in &self.config.optimize_deps.include {
            let id = normalize_id(id);
            let request = ResolveRequest {
                scan: true,
                is_require: false,
            };
            match self.resolver.resolve(&id, None, request).await {
                Ok(Some(resolved)) if !resolved.external => {
                    let mut metadata = self.metadata.write();
                    if metadata.dep_info(&id).is_none() {
                        self.add_missing_dep(&mut metadata, &id, clean_url(&resolved.id));
                    }
                }
                _ => unresolved.push(id),
            }
        }
        unresolved
    }

    async fn run_scan(&self, handle: ProcessingHandle) {
        let start = Instant::now();
        match scan_imports(&self.config, &self.resolver).await {
            Ok(result) => {
                if let Some(err) = result.missing_error() {
                    error!("{err}");
                }
                let mut metadata = self.metadata.write();
                for (id, src) in &result.deps {
                    if metadata.dep_info(id).is_none() {
                        self.add_missing_dep(&mut metadata, id, src);
                    }
                }
                debug!(
                    deps = result.deps.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "dependency scan merged"
                );
            }
            Err(err) => error!("failed to scan for dependencies: {err}"),
        }
        self.scanning.store(false, Ordering::SeqCst);
        handle.resolve();
    }

    /// Add a discovered dep under the lock. Its final location is known
    /// now; its bundle appears when the next run commits.
    fn add_missing_dep(
        &self,
        metadata: &mut DepOptimizationMetadata,
        id: &str,
        resolved: &str,
    ) -> OptimizedDepInfo {
        let file = format!("{}/{}.js", self.deps_cache_dir, flatten_id(id));
        let browser_hash = get_discovered_browser_hash(
            &metadata.hash,
            metadata
                .optimized
                .values()
                .chain(metadata.discovered.values())
                .map(|info| (info.id.as_str(), info.src.as_deref())),
            [(id, Some(resolved))],
            &self.session_timestamp,
        );
        let mut info = OptimizedDepInfo::new(id, file, browser_hash);
        info.src = Some(resolved.to_string());
        info.processing = self.queue.lock().next();
        metadata.add_discovered(info.clone());
        info
    }

    /// Schedule a run after the debounce window, replacing any pending one.
    fn debounced_rerun(&self) {
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let delay = Duration::from_millis(self.config.optimize_deps.debounce_ms);
        let mut slot = self.debounce.lock();
        if let Some(pending) = slot.take() {
            pending.abort();
        }
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // detached so a later reschedule cannot abort a started run
            tokio::spawn(async move {
                if let Err(err) = this.rerun().await {
                    debug!(error = %err, "optimizer run failed");
                }
            });
        });
        *slot = Some(timer.abort_handle());
    }

    /// Bundle every known dep and commit the result.
    pub async fn rerun(&self) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(OptimizeError::Closed);
        }

        self.new_deps_discovered.store(false, Ordering::SeqCst);
        let handles = self.queue.lock().take();
        let (known, previous_generation) = {
            let metadata = self.metadata.read();
            (metadata.known_deps(), self.generation.load(Ordering::SeqCst))
        };
        self.set_state(OptimizerState::Bundling);
        let ids: Vec<&str> = known.iter().map(|d| d.id.as_str()).collect();
        debug!(deps = ?ids, "optimizing dependencies");

        let temp_dir = format!(
            "{}/deps_temp_{}",
            self.config.cache_dir,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let run = match self.run_optimizer(&known, &temp_dir).await {
            Ok(run) => run,
            Err(err) => {
                error!("error during dependency optimization: {err}");
                let _ = self.runtime.remove_dir_all(Path::new(&temp_dir)).await;
                self.metadata.write().clear_discovered();
                reject_all(handles, &err.to_string());
                self.set_state(OptimizerState::Idle);
                return Err(err);
            }
        };

        let (needs_reload, mut new_metadata) = {
            let current = self.metadata.read();
            let mismatches = find_interop_mismatches(
                current.discovered.values().filter(|d| ids.contains(&d.id.as_str())),
                &run.metadata.optimized,
            );
            if !mismatches.is_empty() {
                debug!(deps = ?mismatches, "interop of optimized dependencies changed");
            }
            let file_hash_changed = current.optimized.values().any(|old| {
                run.metadata.optimized.get(&old.id).map(|new| &new.file_hash) != Some(&old.file_hash)
            });
            let needs_reload =
                !mismatches.is_empty() || current.hash != run.metadata.hash || file_hash_changed;
            (needs_reload, run.metadata)
        };

        if needs_reload && self.new_deps_discovered.load(Ordering::SeqCst) {
            // already stale, fold into the next run
            debug!("new dependencies discovered while optimizing, rerunning");
            let _ = self.runtime.remove_dir_all(Path::new(&run.temp_dir)).await;
            self.queue.lock().carry(handles);
            self.set_state(OptimizerState::Idle);
            drop(_guard);
            self.debounced_rerun();
            return Ok(());
        }

        self.set_state(OptimizerState::Committing);
        if let Err(err) = self.commit(&run.temp_dir).await {
            error!("error committing optimized dependencies: {err}");
            let _ = self.runtime.remove_dir_all(Path::new(&run.temp_dir)).await;
            self.metadata.write().clear_discovered();
            reject_all(handles, &err.to_string());
            self.set_state(OptimizerState::Idle);
            return Err(err);
        }

        {
            let mut current = self.metadata.write();
            if !needs_reload {
                // urls handed out so far stay valid
                for info in new_metadata.optimized.values_mut() {
                    if let Some(old) = current
                        .optimized
                        .get(&info.id)
                        .or_else(|| current.discovered.get(&info.id))
                    {
                        info.browser_hash = old.browser_hash.clone();
                    }
                }
                for chunk in new_metadata.chunks.values_mut() {
                    chunk.browser_hash = current.browser_hash.clone();
                }
            }
            // deps registered while this run was bundling
            for info in current.discovered.values() {
                if !new_metadata.optimized.contains_key(&info.id) {
                    new_metadata.add_discovered(info.clone());
                }
            }
            *current = new_metadata;
        }
        self.generation.store(previous_generation + 1, Ordering::SeqCst);
        resolve_all(handles);
        self.set_state(OptimizerState::Idle);

        if needs_reload {
            info!(deps = ?ids, "optimized dependencies changed, reloading page");
            let _ = self.events.send(OptimizerEvent::FullReload);
        } else {
            if !ids.is_empty() {
                info!(deps = ?ids, "dependencies optimized");
            }
            let _ = self.events.send(OptimizerEvent::Optimized {
                deps: ids.iter().map(|id| id.to_string()).collect(),
            });
        }
        Ok(())
    }

    async fn run_optimizer(&self, known: &[OptimizedDepInfo], temp_dir: &str) -> Result<RunOutput> {
        let start = Instant::now();
        let hash = self.metadata.read().hash.clone();
        let entries: Vec<DepEntry> = known
            .iter()
            .filter_map(|dep| {
                dep.src.as_ref().map(|src| DepEntry {
                    id: dep.id.clone(),
                    flat_id: flatten_id(&dep.id),
                    src: src.clone(),
                })
            })
            .collect();

        let output = if entries.is_empty() {
            BundleOutput::default()
        } else {
            self.bundler
                .bundle(BundleRequest {
                    entries: entries.clone(),
                    root: self.config.root.clone(),
                    external: self.config.optimize_deps.exclude.clone(),
                    is_production: self.config.is_production,
                })
                .await?
        };

        let temp_path = Path::new(temp_dir);
        self.runtime.create_dir(temp_path, true).await?;

        let browser_hash = get_optimized_browser_hash(
            &hash,
            entries.iter().map(|e| (e.id.as_str(), Some(e.src.as_str()))),
            &self.session_timestamp,
        );
        let mut metadata = DepOptimizationMetadata::new(hash.clone(), browser_hash.clone());

        for entry in &entries {
            let chunk = output.entry(&entry.flat_id).ok_or_else(|| {
                OptimizeError::Bundle(format!("no output produced for \"{}\"", entry.id))
            })?;
            self.runtime
                .write_file(&temp_path.join(&chunk.file_name), chunk.code.as_bytes())
                .await?;

            let data = parse_exports_data(self.runtime.as_ref(), &entry.src).await;
            let mut info = OptimizedDepInfo::new(
                entry.id.clone(),
                format!("{}/{}", self.deps_cache_dir, chunk.file_name),
                browser_hash.clone(),
            );
            info.src = Some(entry.src.clone());
            info.file_hash = Some(get_file_hash(&hash, &chunk.code));
            info.needs_interop = Some(needs_interop(
                &entry.id,
                &data,
                Some(&chunk.exports),
                &self.config.optimize_deps.needs_interop,
            ));
            metadata.add_optimized(info);
        }

        for chunk in output.shared_chunks() {
            self.runtime
                .write_file(&temp_path.join(&chunk.file_name), chunk.code.as_bytes())
                .await?;
            let id = chunk
                .file_name
                .strip_suffix(".js")
                .unwrap_or(&chunk.file_name)
                .to_string();
            let mut info = OptimizedDepInfo::new(
                id,
                format!("{}/{}", self.deps_cache_dir, chunk.file_name),
                browser_hash.clone(),
            );
            info.file_hash = Some(get_file_hash(&hash, &chunk.code));
            metadata.add_chunk(info);
        }

        // the deps dir only ever holds ESM
        self.runtime
            .write_file(&temp_path.join("package.json"), br#"{"type":"module"}"#)
            .await?;
        let json = metadata.stringify(&self.deps_cache_dir)?;
        self.runtime
            .write_file(&temp_path.join(METADATA_FILE), json.as_bytes())
            .await?;

        debug!(
            deps = entries.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "dependency bundle written"
        );
        Ok(RunOutput {
            metadata,
            temp_dir: temp_dir.to_string(),
        })
    }

    /// Replace the committed deps dir with `temp_dir`.
    async fn commit(&self, temp_dir: &str) -> Result<()> {
        let deps_dir = Path::new(&self.deps_cache_dir);
        self.runtime.remove_dir_all(deps_dir).await?;
        if let Some(parent) = deps_dir.parent() {
            self.runtime.create_dir(parent, true).await?;
        }
        self.runtime.rename(Path::new(temp_dir), deps_dir).await?;
        Ok(())
    }

    /// Resolves when the background scan has merged its results.
    pub async fn wait_for_scan(&self) {
        let gate = self.scan_gate.lock().clone();
        let _ = gate.wait().await;
    }

    /// Resolves when the first run after a cold start has committed.
    pub async fn wait_for_first_run(&self) -> Result<()> {
        let gate = self.first_run_gate.lock().clone();
        gate.wait().await
    }

    /// Whether importers must go through the default export of the dep
    /// bundled at `file`. Deps not bundled yet get an estimate from their
    /// source, which is remembered so the run can detect a wrong guess.
    pub async fn needs_interop(&self, file: &str) -> Option<bool> {
        let file = clean_url(file);
        let (id, src, known) = {
            let metadata = self.metadata.read();
            let info = metadata.dep_info_from_file(file)?;
            (info.id.clone(), info.src.clone()?, info.needs_interop)
        };
        if let Some(known) = known {
            return Some(known);
        }
        let data = parse_exports_data(self.runtime.as_ref(), &src).await;
        let estimate = needs_interop(&id, &data, None, &self.config.optimize_deps.needs_interop);
        let mut metadata = self.metadata.write();
        if let Some(info) = metadata.discovered.get_mut(&id) {
            return Some(*info.needs_interop.get_or_insert(estimate));
        }
        metadata
            .optimized
            .get(&id)
            .and_then(|info| info.needs_interop)
            .or(Some(estimate))
    }

    /// Load a pre-bundled file for the dev server.
    ///
    /// Waits for the dep's bundle, and fails with [`OptimizeError::Outdated`]
    /// when the request pins a generation that is gone, or with
    /// [`OptimizeError::Processing`] when the run failed.
    pub async fn load_optimized_dep(&self, id: &str) -> Result<String> {
        let file = clean_url(id).to_string();
        let requested_hash = DEP_VERSION_RE
            .captures(id)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim_start_matches("v=").to_string());

        let generation = self.generation.load(Ordering::SeqCst);
        let info = self.metadata.read().dep_info_from_file(&file).cloned();
        if let Some(info) = info {
            if let Some(requested) = &requested_hash {
                if *requested != info.browser_hash {
                    return Err(OptimizeError::Outdated { url: id.to_string() });
                }
            }
            info.processing.wait().await?;
            if self.generation.load(Ordering::SeqCst) != generation {
                let current = self
                    .metadata
                    .read()
                    .dep_info_from_file(&file)
                    .map(|i| i.browser_hash.clone());
                if current.as_deref() != Some(info.browser_hash.as_str()) {
                    return Err(OptimizeError::Outdated { url: id.to_string() });
                }
            }
        }

        self.runtime
            .read_to_string(Path::new(&file))
            .await
            .map_err(|_| OptimizeError::Outdated { url: id.to_string() })
    }

    /// Stop scheduling runs and wait for in-flight work to settle.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(pending) = self.debounce.lock().take() {
            pending.abort();
        }
        let task = self.scan_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let _guard = self.run_lock.lock().await;
        let _ = self.queue.lock().take();
        self.set_state(OptimizerState::Closed);
        debug!("dependency optimizer closed");
    }
}

#[async_trait]
impl DepsOptimizerHandle for DepsOptimizer {
    async fn scan_processing(&self) {
        self.wait_for_scan().await;
    }

    fn browser_hash(&self) -> String {
        self.metadata.read().browser_hash.clone()
    }

    fn is_optimized_dep_file(&self, id: &str) -> bool {
        id.strip_prefix(self.deps_cache_dir.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    fn is_optimized_dep_url(&self, url: &str) -> bool {
        if let Some(path) = url.strip_prefix(FS_PREFIX.trim_end_matches('/')) {
            return self.is_optimized_dep_file(path);
        }
        root_relative(&self.deps_cache_dir, &self.config.root)
            .is_some_and(|dir| url.strip_prefix(dir.as_str()).is_some_and(|rest| rest.starts_with('/')))
    }

    fn dep_info_from_id(&self, id: &str) -> Option<OptimizedDepRef> {
        self.metadata.read().dep_info(id).map(OptimizedDepInfo::to_ref)
    }

    fn dep_info_from_file(&self, file: &str) -> Option<OptimizedDepRef> {
        self.metadata
            .read()
            .dep_info_from_file(clean_url(file))
            .map(OptimizedDepInfo::to_ref)
    }

    fn dep_infos(&self) -> Vec<OptimizedDepRef> {
        let metadata = self.metadata.read();
        metadata
            .optimized
            .values()
            .chain(metadata.discovered.values())
            .map(OptimizedDepInfo::to_ref)
            .collect()
    }

    fn register_missing_import(&self, id: &str, resolved: &str) -> OptimizedDepRef {
        let info = {
            let mut metadata = self.metadata.write();
            if let Some(known) = metadata.dep_info(id) {
                return known.to_ref();
            }
            self.add_missing_dep(&mut metadata, id, clean_url(resolved))
        };
        debug!(id = %id, "new dependency discovered");
        self.new_deps_discovered.store(true, Ordering::SeqCst);
        if !self.scanning.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst) {
            self.debounced_rerun();
        }
        info.to_ref()
    }

    fn is_excluded(&self, id: &str) -> bool {
        module_list_contains(&self.config.optimize_deps.exclude, id)
    }
}
