//! Shared fixtures for the server tests: a throwaway project on disk and a
//! bundler that never leaves the process.

#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use dpack_config::{LoadedConfig, ResolvedConfig, UserConfig};
use dpack_graph::utils::normalize_path;
use dpack_optimizer::{BundleOutput, BundleRequest, BundledChunk, DepBundler, OptimizerRegistry};
use dpack_server::{HmrChannel, HmrPayload, ServerContext, ServerOptions, create_server_with_config};

/// Emits one chunk per entry. CommonJS entries come out as a single
/// default export, like a real pre-bundle.
#[derive(Debug, Default)]
pub struct FakeBundler {
    pub calls: AtomicUsize,
}

#[async_trait]
impl DepBundler for FakeBundler {
    async fn bundle(&self, request: BundleRequest) -> dpack_optimizer::Result<BundleOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
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
                    code: format!("// {}\nexport default {{ chunk() {{}} }}\n", entry.id),
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

pub struct Project {
    _temp: TempDir,
    pub root: String,
    pub bundler: Arc<FakeBundler>,
    pub registry: OptimizerRegistry,
}

impl Project {
    /// `index.html` loading `/main.js`, which imports lodash (CommonJS).
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap().join("app");
        fs::create_dir_all(&root).unwrap();
        let project = Self {
            _temp: temp,
            root: normalize_path(root),
            bundler: Arc::new(FakeBundler::default()),
            registry: OptimizerRegistry::new(),
        };
        project.write("package.json", r#"{"name":"app","dependencies":{"lodash":"^4.0.0"}}"#);
        project.write(
            "index.html",
            r#"<!doctype html><html><body><script type="module" src="/main.js"></script></body></html>"#,
        );
        project.write(
            "main.js",
            "import _ from \"lodash\"\nimport { util } from \"./util.js\"\nconsole.log(_, util)\n",
        );
        project.write("util.js", "export const util = 1\n");
        project.write(
            "node_modules/lodash/package.json",
            r#"{"name":"lodash","version":"4.17.21","main":"index.js"}"#,
        );
        project.write(
            "node_modules/lodash/index.js",
            "module.exports = { chunk() {} }\n",
        );
        project
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        Path::new(&self.root).join(rel)
    }

    pub fn config(&self) -> Arc<ResolvedConfig> {
        let mut user = UserConfig::default();
        user.optimize_deps.debounce_ms = 10;
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

    pub fn options(&self) -> ServerOptions {
        ServerOptions::new(Default::default())
            .with_bundler(self.bundler.clone())
            .without_watcher()
    }

    /// A server context without a file watcher; tests feed changes in.
    pub async fn server(&self) -> Arc<ServerContext> {
        let server = create_server_with_config(
            self.config(),
            &self.options(),
            &self.registry,
            Arc::new(HmrChannel::new()),
            None,
        )
        .await
        .unwrap();
        server.optimizer.wait_for_first_run().await.unwrap();
        server
    }
}

/// Next message other than the `connected` greeting.
pub async fn next_payload(rx: &mut mpsc::Receiver<String>) -> HmrPayload {
    loop {
        let text = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no hmr message within 5s")
            .expect("hmr channel closed");
        let payload: HmrPayload = serde_json::from_str(&text).unwrap();
        if payload != HmrPayload::Connected {
            return payload;
        }
    }
}
