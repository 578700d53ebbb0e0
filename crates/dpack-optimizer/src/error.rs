use thiserror::Error;

use dpack_graph::{GraphError, RuntimeError};
use dpack_resolve::ResolveError;

pub type Result<T> = std::result::Result<T, OptimizeError>;

pub const ERR_OPTIMIZE_DEPS_PROCESSING_ERROR: &str = "ERR_OPTIMIZE_DEPS_PROCESSING_ERROR";
pub const ERR_OUTDATED_OPTIMIZED_DEP: &str = "ERR_OUTDATED_OPTIMIZED_DEP";

#[derive(Debug, Error)]
pub enum OptimizeError {
    /// The bundling run this dependency was waiting on failed or was
    /// abandoned. The page should be reloaded rather than shown an error.
    #[error("Error while processing optimized dependencies: {0}")]
    Processing(String),

    /// The request carries a `v=` hash from an older generation.
    #[error("There is a new version of the pre-bundle for \"{url}\", a page reload is going to ask for it.")]
    Outdated { url: String },

    #[error(
        "The following dependencies are imported but could not be resolved:\n\n{}\n\nAre they installed?",
        format_missing(.0)
    )]
    MissingDeps(Vec<(String, String)>),

    #[error("Failed to resolve dependencies listed in optimizeDeps.include: {}", .0.join(", "))]
    UnresolvedInclude(Vec<String>),

    #[error("Dependency bundling failed: {0}")]
    Bundle(String),

    #[error("Invalid optimizer metadata: {0}")]
    Metadata(String),

    #[error("The dependency optimizer is closed")]
    Closed,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn format_missing(missing: &[(String, String)]) -> String {
    missing
        .iter()
        .map(|(id, importer)| format!("  {id} (imported by {importer})"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl OptimizeError {
    /// Stable code for the kinds the serving layer turns into protocol
    /// signals instead of failures.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            OptimizeError::Processing(_) => Some(ERR_OPTIMIZE_DEPS_PROCESSING_ERROR),
            OptimizeError::Outdated { .. } => Some(ERR_OUTDATED_OPTIMIZED_DEP),
            _ => None,
        }
    }

    pub fn from_rolldown_batch(error: &dyn std::fmt::Debug) -> Self {
        OptimizeError::Bundle(format!("{error:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            OptimizeError::Processing("boom".into()).code(),
            Some(ERR_OPTIMIZE_DEPS_PROCESSING_ERROR)
        );
        assert_eq!(
            OptimizeError::Outdated { url: "/x".into() }.code(),
            Some(ERR_OUTDATED_OPTIMIZED_DEP)
        );
        assert_eq!(OptimizeError::Closed.code(), None);
    }

    #[test]
    fn test_missing_deps_message() {
        let err = OptimizeError::MissingDeps(vec![
            ("lodash".into(), "/src/a.js".into()),
            ("vue".into(), "/src/b.js".into()),
        ]);
        let message = err.to_string();
        assert!(message.contains("  lodash (imported by /src/a.js)"));
        assert!(message.ends_with("Are they installed?"));
    }
}
