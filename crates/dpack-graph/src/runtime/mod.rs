//! Filesystem runtime abstraction.
//!
//! Everything that touches the disk on behalf of the dev server (the
//! resolver's probes, the optimizer's cache directory, the transform
//! pipeline's fallback loader) goes through [`Runtime`], so tests can point
//! the whole pipeline at a temporary directory and the server never calls
//! `std::fs` directly outside of this module.

pub mod native;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use native::NativeRuntime;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur during runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Content was not valid UTF-8
    #[error("File is not valid UTF-8: {0}")]
    InvalidUtf8(PathBuf),

    /// Other runtime error
    #[error("Runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::FileNotFound(_))
    }
}

/// File metadata
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Whether this is a file
    pub is_file: bool,
    /// Last modified timestamp (milliseconds since epoch)
    pub modified: Option<u64>,
}

/// Platform runtime trait
///
/// Async methods are used on request paths. The synchronous probes
/// (`is_file`, `is_dir`, `canonicalize`, `read_to_string_sync`) exist for
/// the resolver, which stats many candidate paths per specifier and would
/// otherwise pay a task hop for each of them.
#[async_trait]
pub trait Runtime: Send + Sync + std::fmt::Debug {
    /// Read a file from the filesystem
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>>;

    /// Read a file as UTF-8 text
    async fn read_to_string(&self, path: &Path) -> RuntimeResult<String> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes).map_err(|_| RuntimeError::InvalidUtf8(path.to_path_buf()))
    }

    /// Write a file, creating parent directories as needed
    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()>;

    /// Get file metadata
    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata>;

    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Check if a path is a regular file
    fn is_file(&self, path: &Path) -> bool;

    /// Check if a path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Resolve symlinks
    fn canonicalize(&self, path: &Path) -> RuntimeResult<PathBuf>;

    /// Blocking read for small files on the resolver path (package.json)
    fn read_to_string_sync(&self, path: &Path) -> RuntimeResult<String>;

    /// Create a directory
    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()>;

    /// Remove a file
    async fn remove_file(&self, path: &Path) -> RuntimeResult<()>;

    /// Remove a directory and everything below it. Missing directories are not an error.
    async fn remove_dir_all(&self, path: &Path) -> RuntimeResult<()>;

    /// Rename a file or directory
    async fn rename(&self, from: &Path, to: &Path) -> RuntimeResult<()>;

    /// Read a directory, returning entry names
    async fn read_dir(&self, path: &Path) -> RuntimeResult<Vec<String>>;
}
