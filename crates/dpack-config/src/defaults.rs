use dpack_graph::url::{DEFAULT_EXTENSIONS, DEFAULT_MAIN_FIELDS};

/// Websocket path of the HMR channel
pub const DEFAULT_HMR_PATH: &str = "/__dpack_hmr";

/// Websocket sub-protocol of the HMR channel
pub const HMR_PROTOCOL: &str = "dpack-hmr";

/// Config file names looked up in the root, in order
pub const DEFAULT_CONFIG_FILES: &[&str] = &["dpack.config.json", "dpack.config.toml"];

pub fn default_base() -> String {
    "/".to_string()
}

pub fn default_mode() -> String {
    "development".to_string()
}

pub fn default_public_dir() -> String {
    "public".to_string()
}

pub fn default_main_fields() -> Vec<String> {
    DEFAULT_MAIN_FIELDS.iter().map(|s| s.to_string()).collect()
}

pub fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

pub fn default_debounce_ms() -> u64 {
    100
}

pub fn default_host() -> String {
    "localhost".to_string()
}

pub fn default_port() -> u16 {
    3002
}

pub fn default_hmr_path() -> String {
    DEFAULT_HMR_PATH.to_string()
}

pub fn default_hmr_timeout() -> u64 {
    30_000
}
