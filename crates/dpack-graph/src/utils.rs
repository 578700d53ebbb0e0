//! Small path, hashing and time helpers shared by every crate.

use path_clean::PathClean;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Normalize a path to a clean, forward-slash string.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let slashed = path.to_string_lossy().replace('\\', "/");
    let trailing = slashed.len() > 1 && slashed.ends_with('/');
    let mut cleaned = PathBuf::from(slashed)
        .clean()
        .to_string_lossy()
        .replace('\\', "/");
    if trailing && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

/// First 8 hex characters of the SHA-256 digest of `text`.
pub fn get_hash(text: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(text.as_ref());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Whether `id` is one of `list` or a subpath of one of them.
pub fn module_list_contains(list: &[String], id: &str) -> bool {
    list.iter().any(|m| {
        m == id
            || id
                .strip_prefix(m.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Strip a UTF-8 byte order mark.
pub fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

pub fn join_url_segments(a: &str, b: &str) -> String {
    if a.is_empty() || b.is_empty() {
        return format!("{a}{b}");
    }
    let a = a.strip_suffix('/').unwrap_or(a);
    if b.starts_with('/') {
        format!("{a}{b}")
    } else {
        format!("{a}/{b}")
    }
}

/// Walk up from `dir` looking for the first of `names` that is a file.
///
/// `predicate` receives the file's path and can reject a candidate, in
/// which case the search continues in the parent directory.
pub fn lookup_file(
    dir: &Path,
    names: &[&str],
    predicate: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    let mut current = Some(dir);
    while let Some(dir) = current {
        for name in names {
            let candidate = dir.join(name);
            if candidate.is_file() && predicate(&candidate) {
                return Some(candidate);
            }
        }
        current = dir.parent();
    }
    None
}

/// `file` relative to `root` with a leading slash, if it lives inside it.
pub fn root_relative(file: &str, root: &str) -> Option<String> {
    let root = root.strip_suffix('/').unwrap_or(root);
    file.strip_prefix(root)
        .filter(|rest| rest.starts_with('/'))
        .map(str::to_string)
}
