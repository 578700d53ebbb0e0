use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::defaults::DEFAULT_CONFIG_FILES;
use crate::error::{ConfigError, Result};
use crate::types::{InlineConfig, UserConfig};

/// A loaded user config and the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: UserConfig,
    pub config_file: Option<PathBuf>,
}

/// Find the config file: an explicit path (which must exist) or the first
/// default name present in `root`.
pub fn find_config_file(root: &Path, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        if !path.is_file() {
            return Err(ConfigError::NotFound(path));
        }
        return Ok(Some(path));
    }

    Ok(DEFAULT_CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file()))
}

impl UserConfig {
    /// Load configuration from every layer.
    /// Priority: inline (CLI) > `DPACK_*` environment > config file > defaults
    pub fn load(root: &Path, inline: &InlineConfig, config_path: Option<&Path>) -> Result<LoadedConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(UserConfig::default()));

        let config_file = find_config_file(root, config_path)?;
        if let Some(path) = &config_file {
            debug!(path = %path.display(), "loading config file");
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                Some("toml") => figment.merge(Toml::file(path)),
                _ => return Err(ConfigError::UnsupportedFormat(path.clone())),
            };
        }

        // DPACK_MODE, DPACK_SERVER_PORT, DPACK_OPTIMIZEDEPS_FORCE, ...
        figment = figment.merge(Env::prefixed("DPACK_").split("_"));

        figment = figment.merge(Serialized::defaults(inline));

        let config = figment
            .extract::<UserConfig>()
            .map_err(|e| ConfigError::InvalidValue {
                message: e.to_string(),
                hint: "Check the config file syntax and field types".to_string(),
            })?;

        Ok(LoadedConfig {
            config,
            config_file,
        })
    }
}
