use thiserror::Error;

use crate::runtime::RuntimeError;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Failed to resolve url \"{url}\": {message}")]
    Resolve { url: String, message: String },

    #[error("Failed to parse source for import analysis in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Module {0} is no longer part of the module graph")]
    StaleModule(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
