//! File system watcher for the dev server.
//!
//! Watches the project root recursively and forwards changes to the server
//! as [`FileChange`]s. Files loaded from outside the root are added one by
//! one with [`FileWatcher::add`].

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use dpack_graph::Runtime;
use dpack_graph::utils::normalize_path;

use crate::error::Result;

/// File change event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Modified(p) | FileChange::Created(p) | FileChange::Removed(p) => p,
        }
    }

    /// Forward-slash form of the path, as used by the module graph.
    pub fn file(&self) -> String {
        normalize_path(self.path())
    }
}

pub struct FileWatcher {
    watcher: Mutex<RecommendedWatcher>,
    root: PathBuf,
    extra: Mutex<FxHashSet<PathBuf>>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher").field("root", &self.root).finish()
    }
}

impl FileWatcher {
    /// Start watching `root`, dropping changes matched by `ignored` (see
    /// [`IgnoreMatcher::new`]).
    pub fn new(root: PathBuf, ignored: Vec<String>) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        let (tx, rx) = mpsc::channel(256);
        let matcher = IgnoreMatcher::new(&root, &ignored)?;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            for path in &event.paths {
                if matcher.is_ignored(path) {
                    continue;
                }
                let change = match event.kind {
                    EventKind::Create(_) => FileChange::Created(path.clone()),
                    EventKind::Modify(_) => FileChange::Modified(path.clone()),
                    EventKind::Remove(_) => FileChange::Removed(path.clone()),
                    _ => continue,
                };
                if tx.blocking_send(change).is_err() {
                    return;
                }
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
                root,
                extra: Mutex::new(FxHashSet::default()),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watch a single file outside the root.
    pub fn add(&self, file: &Path) -> Result<()> {
        if file.starts_with(&self.root) || !self.extra.lock().insert(file.to_path_buf()) {
            return Ok(());
        }
        debug!(file = %file.display(), "watching file outside root");
        self.watcher.lock().watch(file, RecursiveMode::NonRecursive)?;
        Ok(())
    }
}

/// Decides which changed paths are of no interest to the server.
#[derive(Debug)]
pub struct IgnoreMatcher {
    root: PathBuf,
    patterns: Gitignore,
    outside: Vec<String>,
}

impl IgnoreMatcher {
    /// `ignored` holds the cache dir and the configured patterns.
    ///
    /// Patterns use gitignore syntax relative to the root, so `dist` matches
    /// a file or directory named exactly `dist` at any depth. An absolute
    /// path inside the root is anchored to it; one outside the root ignores
    /// everything below it.
    pub fn new(root: &Path, ignored: &[String]) -> Result<Self> {
        let root_str = normalize_path(root);
        let mut builder = GitignoreBuilder::new(root);
        let mut outside = Vec::new();

        for pattern in ignored {
            let pattern = normalize_path(pattern);
            if let Some(rel) = pattern.strip_prefix(&format!("{root_str}/")) {
                builder.add_line(None, &format!("/{rel}"))?;
            } else if Path::new(&pattern).is_absolute() && !pattern.starts_with(&root_str) {
                outside.push(pattern);
            } else {
                builder.add_line(None, &pattern)?;
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            patterns: builder.build()?,
            outside,
        })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            let normalized = normalize_path(path);
            return self
                .outside
                .iter()
                .any(|dir| normalized == *dir || normalized.starts_with(&format!("{dir}/")));
        };

        if relative
            .components()
            .any(|c| c.as_os_str() == "node_modules" || c.as_os_str() == ".git")
        {
            return true;
        }

        self.patterns
            .matched_path_or_any_parents(relative, path.is_dir())
            .is_ignore()
    }
}

/// Read a file that was just reported as modified.
///
/// Some editors truncate before writing, so an empty read is retried while
/// the mtime settles.
pub async fn read_modified_file(runtime: &dyn Runtime, file: &Path) -> Result<String> {
    let content = runtime.read_to_string(file).await?;
    if !content.is_empty() {
        return Ok(content);
    }

    let mut mtime = runtime.metadata(file).await?.modified;
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let next = runtime.metadata(file).await?.modified;
        if next != mtime {
            break;
        }
        mtime = next;
    }
    Ok(runtime.read_to_string(file).await?)
}
