//! Native runtime backed by tokio::fs

use super::{FileMetadata, Runtime, RuntimeError, RuntimeResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Native runtime using tokio for async I/O and std for sync probes
#[derive(Debug, Clone, Default)]
pub struct NativeRuntime;

impl NativeRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn map_io(path: &Path, action: &str, e: std::io::Error) -> RuntimeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        RuntimeError::FileNotFound(path.to_path_buf())
    } else {
        RuntimeError::Io(format!("Failed to {} {}: {}", action, path.display(), e))
    }
}

#[async_trait]
impl Runtime for NativeRuntime {
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| map_io(path, "read", e))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(parent, "create directory", e))?;
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|e| map_io(path, "write", e))
    }

    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| map_io(path, "get metadata for", e))?;

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        Ok(FileMetadata {
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            modified,
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn canonicalize(&self, path: &Path) -> RuntimeResult<PathBuf> {
        std::fs::canonicalize(path).map_err(|e| map_io(path, "canonicalize", e))
    }

    fn read_to_string_sync(&self, path: &Path) -> RuntimeResult<String> {
        std::fs::read_to_string(path).map_err(|e| map_io(path, "read", e))
    }

    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()> {
        let result = if recursive {
            tokio::fs::create_dir_all(path).await
        } else {
            tokio::fs::create_dir(path).await
        };

        result.map_err(|e| map_io(path, "create directory", e))
    }

    async fn remove_file(&self, path: &Path) -> RuntimeResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| map_io(path, "remove file", e))
    }

    async fn remove_dir_all(&self, path: &Path) -> RuntimeResult<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(path, "remove directory", e)),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> RuntimeResult<()> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| RuntimeError::Io(format!(
                "Failed to rename {} to {}: {}",
                from.display(),
                to.display(),
                e
            )))
    }

    async fn read_dir(&self, path: &Path) -> RuntimeResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| map_io(path, "read directory", e))?;

        let mut result = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| map_io(path, "read directory entry in", e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                result.push(name.to_string());
            }
        }
        result.sort();

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let runtime = NativeRuntime::new();
        let file = temp.path().join("a/b/c.txt");

        runtime.write_file(&file, b"hello").await.unwrap();

        assert!(runtime.is_file(&file));
        assert_eq!(runtime.read_to_string(&file).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_missing_file_maps_to_not_found() {
        let temp = TempDir::new().unwrap();
        let runtime = NativeRuntime::new();

        let err = runtime
            .read_file(&temp.path().join("missing.js"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remove_dir_all_ignores_missing() {
        let temp = TempDir::new().unwrap();
        let runtime = NativeRuntime::new();

        runtime
            .remove_dir_all(&temp.path().join("nope"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rename_directory() {
        let temp = TempDir::new().unwrap();
        let runtime = NativeRuntime::new();
        let from = temp.path().join("deps_temp");
        let to = temp.path().join("deps");
        runtime.write_file(&from.join("x.js"), b"x").await.unwrap();

        runtime.rename(&from, &to).await.unwrap();

        assert!(!runtime.exists(&from));
        assert!(runtime.is_file(&to.join("x.js")));
        assert_eq!(runtime.read_dir(&to).await.unwrap(), vec!["x.js"]);
    }
}
