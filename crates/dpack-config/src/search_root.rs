//! Package and workspace root lookup.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

const WORKSPACE_ROOT_FILES: &[&str] = &["pnpm-workspace.yaml", "lerna.json"];

fn has_package_json(dir: &Path) -> bool {
    dir.join("package.json").is_file()
}

fn has_workspace_package_json(dir: &Path) -> bool {
    let path = dir.join("package.json");
    let Ok(content) = fs::read_to_string(&path) else {
        return false;
    };
    serde_json::from_str::<Value>(&content)
        .ok()
        .and_then(|v| v.get("workspaces").cloned())
        .is_some_and(|w| !w.is_null())
}

fn has_root_file(dir: &Path) -> bool {
    WORKSPACE_ROOT_FILES.iter().any(|f| dir.join(f).exists())
}

/// Nearest directory at or above `current` that has a package.json, or
/// `current` itself when none is found.
pub fn search_for_package_root(current: &Path) -> PathBuf {
    current
        .ancestors()
        .find(|dir| has_package_json(dir))
        .unwrap_or(current)
        .to_path_buf()
}

/// Nearest workspace root at or above `current`: a directory with
/// `pnpm-workspace.yaml`, `lerna.json` or a package.json declaring
/// `workspaces`. Falls back to the package root.
pub fn search_for_workspace_root(current: &Path) -> PathBuf {
    current
        .ancestors()
        .find(|dir| has_root_file(dir) || has_workspace_package_json(dir))
        .map(Path::to_path_buf)
        .unwrap_or_else(|| search_for_package_root(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_package_root_walks_up() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("package.json"), "{}").unwrap();
        let nested = temp.path().join("src/components");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(search_for_package_root(&nested), temp.path());
    }

    #[test]
    fn test_package_root_falls_back_to_current() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a");
        fs::create_dir_all(&nested).unwrap();
        // a package.json may exist above the temp dir on some machines, so
        // only assert that the result is an ancestor
        let found = search_for_package_root(&nested);
        assert!(nested.starts_with(&found));
    }

    #[test]
    fn test_workspace_root_from_package_json() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("package.json"),
            r#"{ "workspaces": ["packages/*"] }"#,
        )
        .unwrap();
        let pkg = temp.path().join("packages/app");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), "{}").unwrap();

        assert_eq!(search_for_workspace_root(&pkg), temp.path());
    }

    #[test]
    fn test_workspace_root_from_pnpm_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("pnpm-workspace.yaml"), "packages: []").unwrap();
        let pkg = temp.path().join("apps/web");
        fs::create_dir_all(&pkg).unwrap();

        assert_eq!(search_for_workspace_root(&pkg), temp.path());
    }
}
