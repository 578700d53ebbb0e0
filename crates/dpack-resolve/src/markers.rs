//! Code served for the virtual ids the resolver hands out.

use crate::options::{BROWSER_EXTERNAL_ID, OPTIONAL_PEER_DEP_ID};

/// Whether `id` is one of the resolver's marker ids.
pub fn is_marker_id(id: &str) -> bool {
    id.starts_with(BROWSER_EXTERNAL_ID) || id.starts_with(OPTIONAL_PEER_DEP_ID)
}

/// Module for a path a package's `browser` field maps to `false`. Any
/// property access throws in development.
pub fn browser_external_module(path: &str, is_production: bool) -> String {
    if is_production {
        return "export default {}".to_string();
    }
    let path = serde_json::to_string(path).unwrap_or_default();
    format!(
        "export default new Proxy({{}}, {{\n  get(_, key) {{\n    throw new Error(`Module \"${{{path}}}\" has been externalized for browser compatibility. Cannot access \"${{{path}}}.${{String(key)}}\" in client code.`)\n  }}\n}})\n"
    )
}

/// Module for an optional peer dependency that is not installed. It throws
/// when imported, not when resolved.
pub fn optional_peer_dep_module(dep: &str, parent: &str) -> String {
    let message = serde_json::to_string(&format!(
        "Could not resolve \"{dep}\" imported by \"{parent}\". Is it installed?"
    ))
    .unwrap_or_default();
    format!("export default {{}}\nthrow new Error({message})\n")
}

/// Code for a marker id, or `None` for a regular id.
pub fn load_marker_module(id: &str, is_production: bool) -> Option<String> {
    if let Some(rest) = id.strip_prefix(BROWSER_EXTERNAL_ID) {
        return Some(browser_external_module(
            rest.strip_prefix(':').unwrap_or(rest),
            is_production,
        ));
    }
    let rest = id.strip_prefix(OPTIONAL_PEER_DEP_ID)?;
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    let (dep, parent) = rest.split_once(':').unwrap_or((rest, ""));
    Some(optional_peer_dep_module(dep, parent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_external_module_throws_on_access() {
        let code = browser_external_module("fs", false);
        assert!(code.contains("new Proxy"));
        assert!(code.contains("has been externalized for browser compatibility"));
        assert_eq!(browser_external_module("fs", true), "export default {}");
    }

    #[test]
    fn test_optional_peer_dep_module() {
        let code = optional_peer_dep_module("vue", "/app/node_modules/lib");
        assert!(code.contains(
            r#"Could not resolve \"vue\" imported by \"/app/node_modules/lib\". Is it installed?"#
        ));
    }

    #[test]
    fn test_load_marker_module_dispatch() {
        let peer = load_marker_module("__dpack-optional-peer-dep:vue:/app/lib", false).unwrap();
        assert!(peer.contains("imported by \\\"/app/lib\\\""));
        assert!(load_marker_module("__dpack-browser-external:path", false).is_some());
        assert!(load_marker_module("/app/src/main.js", false).is_none());
        assert!(is_marker_id("__dpack-browser-external"));
    }
}
