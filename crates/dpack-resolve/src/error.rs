//! Resolver errors

use dpack_graph::RuntimeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// A package was found but none of its entry candidates exist
    #[error(
        "Failed to resolve entry for package \"{id}\". The package may have incorrect main/module/exports specified in its package.json{}",
        details.as_ref().map(|d| format!(": {d}")).unwrap_or_else(|| ".".to_string())
    )]
    PackageEntry { id: String, details: Option<String> },

    /// Deep import that the package's `exports` map does not expose
    #[error("Package subpath '{subpath}' is not defined by \"exports\" in {pkg_json}.")]
    SubpathNotExported { subpath: String, pkg_json: String },

    #[error("Failed to parse {path}: {message}")]
    InvalidPackageJson { path: String, message: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_entry_message() {
        let err = ResolveError::PackageEntry {
            id: "broken".into(),
            details: None,
        };
        assert_eq!(
            err.to_string(),
            "Failed to resolve entry for package \"broken\". The package may have incorrect main/module/exports specified in its package.json."
        );

        let err = ResolveError::PackageEntry {
            id: "broken".into(),
            details: Some("Missing \".\" export".into()),
        };
        assert!(err.to_string().ends_with("package.json: Missing \".\" export"));
    }
}
