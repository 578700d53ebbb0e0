//! One optimizer per resolved config, owned by the server lifecycle.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use dpack_config::{ConfigId, ResolvedConfig};
use dpack_graph::Runtime;
use dpack_resolve::Resolver;

use crate::bundler::DepBundler;
use crate::optimizer::DepsOptimizer;

#[derive(Debug, Default)]
pub struct OptimizerRegistry {
    optimizers: Mutex<FxHashMap<ConfigId, Arc<DepsOptimizer>>>,
}

impl OptimizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ConfigId) -> Option<Arc<DepsOptimizer>> {
        self.optimizers.lock().get(&id).cloned()
    }

    /// The optimizer for `config`, created and attached to `resolver` on
    /// first use. Call [`DepsOptimizer::init`] on a new instance.
    pub fn get_or_create(
        &self,
        config: &Arc<ResolvedConfig>,
        runtime: Arc<dyn Runtime>,
        resolver: Arc<Resolver>,
        bundler: Arc<dyn DepBundler>,
    ) -> (Arc<DepsOptimizer>, bool) {
        let mut optimizers = self.optimizers.lock();
        if let Some(existing) = optimizers.get(&config.id) {
            return (Arc::clone(existing), false);
        }
        let optimizer = DepsOptimizer::new(Arc::clone(config), runtime, resolver, bundler);
        optimizers.insert(config.id, Arc::clone(&optimizer));
        (optimizer, true)
    }

    /// Remove and close the optimizer for `id`.
    pub async fn close(&self, id: ConfigId) {
        let optimizer = self.optimizers.lock().remove(&id);
        if let Some(optimizer) = optimizer {
            optimizer.close().await;
        }
    }

    /// Close every optimizer.
    pub async fn close_all(&self) {
        let optimizers: Vec<_> = self.optimizers.lock().drain().map(|(_, o)| o).collect();
        for optimizer in optimizers {
            optimizer.close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.optimizers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.optimizers.lock().is_empty()
    }
}
