//! Server lifecycle.
//!
//! A [`ServerContext`] is everything built from one resolved config: the
//! module graph, the plugin pipeline, the optimizer and the file watcher.
//! The [`DevServer`] owns the listening socket and swaps contexts when the
//! config changes, so a restart never drops the port or the connected
//! pages.

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use dpack_config::{InlineConfig, ResolvedConfig};
use dpack_graph::utils::now_ms;
use dpack_graph::{ModuleGraph, NativeRuntime, Runtime, SharedModuleGraph};
use dpack_optimizer::{DepBundler, DepsOptimizer, OptimizerEvent, OptimizerRegistry, RolldownDepBundler};
use dpack_resolve::{DepsOptimizerHandle, ResolveOptions, Resolver};

use crate::error::{Result, ServerError};
use crate::hmr::{handle_file_change, update_modules};
use crate::middleware;
use crate::plugin::{Plugin, PluginContainer};
use crate::html::HtmlProxyCache;
use crate::plugins::create_plugins;
use crate::transform::PendingRequests;
use crate::watcher::{FileChange, FileWatcher};
use crate::ws::{self, ErrorPayload, HmrChannel, HmrPayload, ListenerId};

/// Event a page sends when a module gives up on a hot update.
pub const INVALIDATE_EVENT: &str = "dpack:invalidate";

/// How a [`DevServer`] builds each context.
#[derive(Clone)]
pub struct ServerOptions {
    pub inline: InlineConfig,
    pub config_path: Option<PathBuf>,
    pub runtime: Arc<dyn Runtime>,
    /// Bundler used for pre-bundling; Rolldown when unset
    pub bundler: Option<Arc<dyn DepBundler>>,
    /// Plugins added after the built-in ones
    pub plugins: Vec<Arc<dyn Plugin>>,
    /// Start a file watcher on the root
    pub watch: bool,
}

impl ServerOptions {
    pub fn new(inline: InlineConfig) -> Self {
        Self {
            inline,
            config_path: None,
            runtime: Arc::new(NativeRuntime::new()),
            bundler: None,
            plugins: Vec::new(),
            watch: true,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn DepBundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn without_watcher(mut self) -> Self {
        self.watch = false;
        self
    }
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("inline", &self.inline)
            .field("config_path", &self.config_path)
            .field("plugins", &self.plugins.len())
            .field("watch", &self.watch)
            .finish()
    }
}

/// Everything built from one resolved config.
pub struct ServerContext {
    pub config: Arc<ResolvedConfig>,
    pub runtime: Arc<dyn Runtime>,
    pub graph: SharedModuleGraph,
    pub container: Arc<PluginContainer>,
    pub hmr: Arc<HmrChannel>,
    pub optimizer: Arc<DepsOptimizer>,
    pub resolver: Arc<Resolver>,
    /// Inline module scripts of the pages served so far
    pub html_proxies: Arc<HtmlProxyCache>,
    pub(crate) pending: PendingRequests,
    watcher: Mutex<Option<FileWatcher>>,
    restart_tx: Option<mpsc::UnboundedSender<()>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    invalidate_listener: Mutex<Option<ListenerId>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("root", &self.config.root)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ServerContext {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ServerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Watch a file the pipeline loaded from outside the root.
    pub fn ensure_watched_file(&self, file: &str) {
        if file.is_empty() || file.contains('\0') || !file.starts_with('/') {
            return;
        }
        let root = self.config.root.as_str();
        let cache_dir = self.config.cache_dir.as_str();
        let inside = |dir: &str| {
            file.strip_prefix(dir)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        };
        if inside(root) || inside(cache_dir) || !self.runtime.is_file(Path::new(file)) {
            return;
        }

        self.container.add_watch_file(file);
        if let Some(watcher) = self.watcher.lock().as_ref() {
            if let Err(err) = watcher.add(Path::new(file)) {
                warn!(file = %file, error = %err, "failed to watch file");
            }
        }
    }

    /// Ask the owning [`DevServer`] for a restart.
    pub fn request_restart(&self) {
        match &self.restart_tx {
            Some(tx) if tx.send(()).is_ok() => {}
            _ => warn!("config changed but this server cannot restart itself"),
        }
    }

    /// Report an unexpected error to the log and the connected pages.
    pub fn report_error(&self, err: &ServerError) {
        error!(error = %err, "internal server error");
        self.hmr.send(HmrPayload::Error {
            err: ErrorPayload::from(err),
        });
    }

    /// Stop watching and close the plugin pipeline. The optimizer belongs
    /// to the registry and is closed by its owner.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watcher.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(id) = self.invalidate_listener.lock().take() {
            self.hmr.off(INVALIDATE_EVENT, id);
        }
        self.container.close().await;
        debug!(root = %self.config.root, "server context closed");
    }
}

/// Load the config and build a context from `options`.
pub async fn create_server(
    options: &ServerOptions,
    registry: &OptimizerRegistry,
    hmr: Arc<HmrChannel>,
    restart_tx: Option<mpsc::UnboundedSender<()>>,
) -> Result<Arc<ServerContext>> {
    let config = Arc::new(ResolvedConfig::load(
        options.inline.clone(),
        options.config_path.as_deref(),
    )?);
    create_server_with_config(config, options, registry, hmr, restart_tx).await
}

/// [`create_server`] for an already resolved config. The optimizer is
/// shared with an earlier context only when the config identity is the
/// same.
pub async fn create_server_with_config(
    config: Arc<ResolvedConfig>,
    options: &ServerOptions,
    registry: &OptimizerRegistry,
    hmr: Arc<HmrChannel>,
    restart_tx: Option<mpsc::UnboundedSender<()>>,
) -> Result<Arc<ServerContext>> {
    let runtime = Arc::clone(&options.runtime);
    let resolver = Arc::new(Resolver::new(
        ResolveOptions::from_config(&config),
        Arc::clone(&runtime),
    ));
    let bundler: Arc<dyn DepBundler> = match &options.bundler {
        Some(bundler) => Arc::clone(bundler),
        None => Arc::new(RolldownDepBundler::new(
            &config,
            Arc::clone(&runtime),
            Arc::clone(resolver.package_cache()),
        )),
    };
    let (optimizer, is_new) = registry.get_or_create(
        &config,
        Arc::clone(&runtime),
        Arc::clone(&resolver),
        bundler,
    );
    if !is_new {
        let handle: Weak<dyn DepsOptimizerHandle> = Arc::downgrade(&optimizer) as Weak<dyn DepsOptimizerHandle>;
        resolver.set_deps_optimizer(handle);
    }

    let graph = ModuleGraph::shared();
    let html_proxies = Arc::new(HtmlProxyCache::new());
    let plugins = create_plugins(
        &config,
        Arc::clone(&runtime),
        Arc::clone(&resolver),
        Arc::clone(&optimizer),
        Arc::clone(&html_proxies),
        options.plugins.clone(),
    );
    let container = Arc::new(PluginContainer::new(
        Arc::clone(&config),
        Arc::clone(&graph),
        plugins,
    ));

    let (watcher, changes) = if options.watch {
        let mut ignored = vec![config.cache_dir.clone()];
        ignored.extend(config.server.watch_ignored.iter().cloned());
        let (watcher, changes) = FileWatcher::new(config.root_path().to_path_buf(), ignored)?;
        (Some(watcher), Some(changes))
    } else {
        (None, None)
    };

    let server = Arc::new(ServerContext {
        config: Arc::clone(&config),
        runtime,
        graph,
        container: Arc::clone(&container),
        hmr: Arc::clone(&hmr),
        optimizer: Arc::clone(&optimizer),
        resolver,
        html_proxies,
        pending: PendingRequests::default(),
        watcher: Mutex::new(watcher),
        restart_tx,
        tasks: Mutex::new(Vec::new()),
        invalidate_listener: Mutex::new(None),
        closed: AtomicBool::new(false),
    });

    for plugin in container.plugins() {
        plugin.configure_server(&server);
    }
    container.build_start().await?;
    if is_new {
        optimizer.init().await?;
    }

    let mut tasks = vec![spawn_optimizer_events(&server, optimizer.subscribe())];
    if let Some(changes) = changes {
        tasks.push(spawn_watch_loop(&server, changes));
    }
    server.tasks.lock().extend(tasks);

    let listener = register_invalidate_listener(&server);
    *server.invalidate_listener.lock() = Some(listener);

    debug!(root = %config.root, "server context ready");
    Ok(server)
}

fn spawn_optimizer_events(
    server: &Arc<ServerContext>,
    mut events: broadcast::Receiver<OptimizerEvent>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(server);
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "optimizer events lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(server) = weak.upgrade() else {
                break;
            };
            match event {
                OptimizerEvent::FullReload => {
                    info!("optimized dependencies changed, reloading page");
                    server.graph.write().clear();
                    server.hmr.send(HmrPayload::full_reload());
                }
                OptimizerEvent::Optimized { deps } => {
                    debug!(deps = ?deps, "dependencies optimized without reload");
                }
            }
        }
    })
}

fn spawn_watch_loop(server: &Arc<ServerContext>, mut changes: mpsc::Receiver<FileChange>) -> JoinHandle<()> {
    let weak = Arc::downgrade(server);
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            let Some(server) = weak.upgrade() else {
                break;
            };
            if server.is_closed() {
                break;
            }
            if let Err(err) = handle_file_change(&server, change).await {
                server.report_error(&err);
            }
        }
    })
}

/// A page gave up on a hot update of `path`; propagate from its importers
/// instead.
fn register_invalidate_listener(server: &Arc<ServerContext>) -> ListenerId {
    let weak = Arc::downgrade(server);
    server.hmr.on(
        INVALIDATE_EVENT,
        Arc::new(move |data, _client| {
            let Some(server) = weak.upgrade() else {
                return;
            };
            let Some(path) = data
                .as_ref()
                .and_then(|d| d.get("path"))
                .and_then(|p| p.as_str())
            else {
                return;
            };
            let message = data
                .as_ref()
                .and_then(|d| d.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or_default();

            let (importers, timestamp) = {
                let graph = server.graph.read();
                let Some(node) = graph.module_by_url(path).and_then(|m| graph.node(m)) else {
                    return;
                };
                if node.is_self_accepting != Some(true) || node.last_hmr_timestamp == 0 {
                    return;
                }
                let importers: Vec<_> = node.importers.iter().copied().collect();
                (importers, node.last_hmr_timestamp.max(now_ms()))
            };
            info!(path = %path, message = %message, "hmr invalidate");
            update_modules(&server, path, &importers, timestamp);
        }),
    )
}

/// The listening dev server.
pub struct DevServer {
    options: ServerOptions,
    registry: OptimizerRegistry,
    hmr: Arc<HmrChannel>,
    current: RwLock<Arc<ServerContext>>,
    restart_lock: tokio::sync::Mutex<()>,
    restart_tx: mpsc::UnboundedSender<()>,
    restart_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DevServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServer")
            .field("context", &*self.current.read())
            .finish()
    }
}

impl DevServer {
    /// Load the config and build the first context.
    pub async fn new(options: ServerOptions) -> Result<Arc<Self>> {
        let registry = OptimizerRegistry::new();
        let hmr = Arc::new(HmrChannel::new());
        let (restart_tx, mut restart_rx) = mpsc::unbounded_channel();
        let context = create_server(&options, &registry, Arc::clone(&hmr), Some(restart_tx.clone())).await?;

        let server = Arc::new(Self {
            options,
            registry,
            hmr,
            current: RwLock::new(context),
            restart_lock: tokio::sync::Mutex::new(()),
            restart_tx,
            restart_task: Mutex::new(None),
        });

        let weak = Arc::downgrade(&server);
        let task = tokio::spawn(async move {
            while restart_rx.recv().await.is_some() {
                // Collapse a burst of change events into one restart
                while restart_rx.try_recv().is_ok() {}
                let Some(server) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = server.restart().await {
                    error!(error = %err, "server restart failed, keeping the previous server");
                    server.context().report_error(&err);
                }
            }
        });
        *server.restart_task.lock() = Some(task);
        Ok(server)
    }

    /// The context serving requests right now.
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.current.read())
    }

    pub fn config(&self) -> Arc<ResolvedConfig> {
        Arc::clone(&self.context().config)
    }

    pub fn hmr(&self) -> &Arc<HmrChannel> {
        &self.hmr
    }

    /// Handle for triggering a restart from outside.
    pub fn restart_handle(&self) -> mpsc::UnboundedSender<()> {
        self.restart_tx.clone()
    }

    /// Rebuild the context from a freshly loaded config. The new context is
    /// built before the old one is closed; on failure the old one keeps
    /// serving. Concurrent calls wait for the restart already running.
    pub async fn restart(&self) -> Result<()> {
        let Ok(_guard) = self.restart_lock.try_lock() else {
            let _wait = self.restart_lock.lock().await;
            return Ok(());
        };

        let started = std::time::Instant::now();
        let next = create_server(
            &self.options,
            &self.registry,
            Arc::clone(&self.hmr),
            Some(self.restart_tx.clone()),
        )
        .await?;

        let previous = std::mem::replace(&mut *self.current.write(), Arc::clone(&next));
        if previous.config.server.port != next.config.server.port
            || previous.config.server.host != next.config.server.host
        {
            warn!("host or port changed; restart dpack to listen on the new address");
        }
        previous.close().await;
        if previous.config.id != next.config.id {
            self.registry.close(previous.config.id).await;
        }

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "server restarted");
        self.hmr.send(HmrPayload::full_reload());
        Ok(())
    }

    /// Bind the configured address. Unless `strictPort` is set, the next
    /// free port is taken when the configured one is busy.
    pub async fn bind(&self) -> Result<TcpListener> {
        let config = self.config();
        let host = config.server.host.as_str();
        let mut port = config.server.port;
        loop {
            let addr = format!("{host}:{port}");
            match TcpListener::bind(&addr).await {
                Ok(listener) => return Ok(listener),
                Err(err)
                    if err.kind() == std::io::ErrorKind::AddrInUse
                        && !config.server.strict_port
                        && port < u16::MAX =>
                {
                    info!(port, "port is in use, trying another one");
                    port += 1;
                }
                Err(source) => return Err(ServerError::Bind { addr, source }),
            }
        }
    }

    /// The axum router serving every request through the current context.
    pub fn router(self: &Arc<Self>) -> Router {
        let hmr_path = self
            .config()
            .server
            .hmr
            .as_ref()
            .map(|hmr| hmr.path.clone());

        let mut router = Router::new();
        if let Some(path) = hmr_path {
            router = router.route(&path, get(handle_hmr));
        }
        router
            .fallback(handle_request)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(Arc::clone(self))
    }

    /// Serve on `listener` until `shutdown` resolves, then close.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(url = %server_url(addr, &self.config().base), "dev server running");

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        self.close().await;
        Ok(())
    }

    /// Close the current context and every optimizer.
    pub async fn close(&self) {
        if let Some(task) = self.restart_task.lock().take() {
            task.abort();
        }
        self.context().close().await;
        self.registry.close_all().await;
        self.hmr.close();
        info!("dev server closed");
    }
}

/// Address pages should open.
pub fn server_url(addr: SocketAddr, base: &str) -> String {
    let host = if addr.ip().is_unspecified() || addr.ip().is_loopback() {
        "localhost".to_string()
    } else {
        addr.ip().to_string()
    };
    format!("http://{host}:{}{base}", addr.port())
}

async fn handle_hmr(
    State(server): State<Arc<DevServer>>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    ws::upgrade(upgrade, &headers, Arc::clone(&server.hmr))
}

async fn handle_request(State(server): State<Arc<DevServer>>, request: Request) -> Response {
    let context = server.context();
    middleware::handle_request(&context, request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_prefers_localhost() {
        let addr: SocketAddr = "127.0.0.1:3002".parse().unwrap();
        assert_eq!(server_url(addr, "/"), "http://localhost:3002/");
        let addr: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(server_url(addr, "/app/"), "http://localhost:4000/app/");
        let addr: SocketAddr = "192.168.1.5:3002".parse().unwrap();
        assert_eq!(server_url(addr, "/"), "http://192.168.1.5:3002/");
    }

    #[test]
    fn test_options_builder() {
        let options = ServerOptions::new(InlineConfig::default())
            .with_config_path("/tmp/dpack.config.json")
            .without_watcher();
        assert!(!options.watch);
        assert_eq!(options.config_path, Some(PathBuf::from("/tmp/dpack.config.json")));
        assert!(options.bundler.is_none());
    }
}
