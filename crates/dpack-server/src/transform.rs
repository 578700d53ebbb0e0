//! The transform request pipeline: resolve, load, transform and cache one
//! served url.
//!
//! Concurrent requests for the same url share one in-flight transform. A
//! shared transform that did not start after the module was last
//! invalidated is stale; the next request starts a fresh one instead of
//! waiting on it.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use dpack_graph::url::{clean_url, remove_timestamp_query};
use dpack_graph::utils::now_ms;
use dpack_graph::{ModuleId, TransformResult, resolve_url};

use crate::error::{Result, ServerError};
use crate::plugin::ResolveIdOptions;
use crate::plugins::can_skip_import_analysis;
use crate::server::ServerContext;

type TransformOutcome = std::result::Result<Option<Arc<TransformResult>>, Arc<ServerError>>;
type SharedTransform = Shared<BoxFuture<'static, TransformOutcome>>;

struct PendingRequest {
    started: u64,
    seq: u64,
    request: SharedTransform,
}

/// In-flight transforms keyed by url and mode.
#[derive(Default)]
pub struct PendingRequests {
    requests: Mutex<FxHashMap<String, PendingRequest>>,
    seq: AtomicU64,
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("in_flight", &self.requests.lock().len())
            .finish()
    }
}

impl PendingRequests {
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish(&self, key: &str, seq: u64) {
        let mut requests = self.requests.lock();
        if requests.get(key).is_some_and(|p| p.seq == seq) {
            requests.remove(key);
        }
    }
}

/// Weak etag of transformed code.
pub fn etag(code: &str) -> String {
    let hash = blake3::hash(code.as_bytes()).to_hex();
    format!("W/\"{:x}-{}\"", code.len(), &hash[..16])
}

/// Transform `url`, joining an in-flight transform of the same url when it
/// is still current.
pub async fn transform_request(
    server: &Arc<ServerContext>,
    url: &str,
    html: bool,
) -> Result<Option<Arc<TransformResult>>> {
    server.ensure_open()?;
    let url = remove_timestamp_query(url);
    let key = if html { format!("html:{url}") } else { url.clone() };

    let invalidated_at = {
        let graph = server.graph.read();
        graph
            .module_by_url(&url)
            .and_then(|m| graph.node(m))
            .map_or(0, |n| n.last_invalidation_timestamp)
    };

    let request = {
        let mut requests = server.pending.requests.lock();
        let current = requests
            .get(&key)
            .filter(|pending| is_fresh(pending.started, invalidated_at))
            .map(|pending| pending.request.clone());
        match current {
            Some(request) => request,
            None => {
                if requests.contains_key(&key) {
                    debug!(url = %url, "in-flight transform is stale, starting a new one");
                }
                // The task removes its own entry, which it cannot do before
                // this lock is released.
                let seq = server.pending.seq.fetch_add(1, Ordering::Relaxed);
                let request = spawn_transform(server, &url, &key, seq);
                requests.insert(
                    key.clone(),
                    PendingRequest {
                        started: now_ms(),
                        seq,
                        request: request.clone(),
                    },
                );
                request
            }
        }
    };

    request.await.map_err(ServerError::Shared)
}

fn spawn_transform(server: &Arc<ServerContext>, url: &str, key: &str, seq: u64) -> SharedTransform {
    let task_server = Arc::clone(server);
    let task_url = url.to_string();
    let task_key = key.to_string();
    let handle = tokio::spawn(async move {
        let result = do_transform(&task_server, &task_url).await.map_err(Arc::new);
        task_server.pending.finish(&task_key, seq);
        result
    });

    let url = url.to_string();
    async move {
        match handle.await {
            Ok(result) => result,
            Err(join) if join.is_cancelled() => Err(Arc::new(ServerError::Closed)),
            Err(join) => Err(Arc::new(ServerError::transform("dpack", &url, join))),
        }
    }
    .boxed()
    .shared()
}

fn cached(server: &ServerContext, module: Option<ModuleId>) -> Option<Arc<TransformResult>> {
    let graph = server.graph.read();
    module
        .and_then(|m| graph.node(m))
        .and_then(|n| n.transform_result.clone())
}

async fn do_transform(server: &Arc<ServerContext>, url: &str) -> Result<Option<Arc<TransformResult>>> {
    let by_url = server.graph.read().module_by_url(url);
    if let Some(hit) = cached(server, by_url) {
        debug!(url = %url, "transform cache hit");
        return Ok(Some(hit));
    }

    let id = server
        .container
        .resolve_id(url, None, ResolveIdOptions::default())
        .await?
        .map_or_else(|| url.to_string(), |r| r.id);

    let by_id = server.graph.read().module_by_id(&id);
    if let Some(hit) = cached(server, by_id) {
        debug!(url = %url, id = %id, "transform cache hit");
        return Ok(Some(hit));
    }

    load_and_transform(server, &id, url).await
}

async fn load_and_transform(
    server: &Arc<ServerContext>,
    id: &str,
    url: &str,
) -> Result<Option<Arc<TransformResult>>> {
    let started = now_ms();
    let Some(loaded) = server.container.load(id).await? else {
        return Err(ServerError::LoadUrl {
            url: url.to_string(),
            id: id.to_string(),
        });
    };

    let resolved = resolve_url(server.container.as_ref(), url).await?;
    let module = server
        .graph
        .write()
        .ensure_entry(&resolved, can_skip_import_analysis(url));
    server.ensure_watched_file(clean_url(id));

    let transformed = server.container.transform(loaded.code, id).await?;

    let mut graph = server.graph.write();
    let deps = graph
        .node(module)
        .map(|n| {
            let imported: Vec<ModuleId> = n.imported_modules.iter().copied().collect();
            imported
        })
        .unwrap_or_default();
    let deps = graph.urls(&deps);
    let result = Arc::new(TransformResult {
        etag: etag(&transformed.code),
        code: transformed.code,
        map: transformed.map.or(loaded.map),
        deps,
        dynamic_deps: transformed.dynamic_deps,
    });

    match graph.node_mut(module) {
        Some(node) if is_fresh(started, node.last_invalidation_timestamp) => {
            node.transform_result = Some(Arc::clone(&result));
        }
        Some(_) => debug!(url = %url, "module invalidated during transform, result not cached"),
        None => debug!(url = %url, "module left the graph during transform"),
    }
    debug!(url = %url, file = %Path::new(clean_url(id)).display(), "transformed");
    Ok(Some(result))
}

/// Whether work begun at `started` reflects an invalidation at
/// `invalidated_at`. Both are millisecond stamps, so a tie is stale.
fn is_fresh(started: u64, invalidated_at: u64) -> bool {
    started > invalidated_at
}
