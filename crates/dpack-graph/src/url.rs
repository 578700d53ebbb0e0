//! Served URL and module id conventions.
//!
//! The browser only accepts import specifiers that start with `/`, `./` or
//! `../`. Ids that are not valid browser paths are prefixed with
//! [`VALID_ID_PREFIX`] (and null bytes escaped) before they leave the
//! server; absolute paths outside the project root are served under
//! [`FS_PREFIX`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::normalize_path;

/// Prefix for absolute filesystem paths served outside the root
pub const FS_PREFIX: &str = "/@fs/";

/// Prefix for ids that are not valid browser import specifiers
pub const VALID_ID_PREFIX: &str = "/@id/";

/// Replacement for `\0` in ids that travel through URLs
pub const NULL_BYTE_PLACEHOLDER: &str = "__x00__";

/// Public path of the browser HMR client
pub const CLIENT_PUBLIC_PATH: &str = "/@dpack/client";

pub const DEFAULT_EXTENSIONS: &[&str] = &[".mjs", ".js", ".mts", ".ts", ".jsx", ".tsx", ".json"];

pub const DEFAULT_MAIN_FIELDS: &[&str] = &["module", "jsnext:main", "jsnext"];

/// File types served as static assets
pub const KNOWN_ASSET_TYPES: &[&str] = &[
    // images
    "apng", "png", "jpe?g", "jfif", "pjpeg", "pjp", "gif", "svg", "ico", "webp", "avif",
    // media
    "mp4", "webm", "ogg", "mp3", "wav", "flac", "aac",
    // fonts
    "woff2?", "eot", "ttf", "otf",
    // other
    "webmanifest", "pdf", "txt",
];

pub static CSS_LANGS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.(css|less|sass|scss|styl|stylus|pcss|postcss|sss)(?:$|\?)")
        .expect("static regex")
});

pub static KNOWN_ASSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\.({})(?:$|\?)", KNOWN_ASSET_TYPES.join("|"))).expect("static regex")
});

/// `?worker`, `?raw`, `?url` style imports never go to the pre-bundler
pub static SPECIAL_QUERY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&](?:worker|sharedworker|raw|url)\b").expect("static regex"));

/// Files the pre-bundler can take as an entry
pub static OPTIMIZABLE_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[cm]?[jt]s$").expect("static regex"));

/// The `v=<hash>` query pinning an optimizer generation
pub static DEP_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&](v=[\w.-]+)\b").expect("static regex"));

static KNOWN_JS_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.(?:[jt]sx?|m[jt]s|vue|marko|svelte|astro|imba)(?:$|\?)").expect("static regex")
});
static KNOWN_TS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:ts|mts|cts|tsx)$").expect("static regex"));
static KNOWN_TS_OUTPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:js|mjs|cjs|jsx)$").expect("static regex"));
static TS_OUTPUT_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\.(?:[cm]?js|jsx))(\?.*)?$").expect("static regex"));
static IMPORT_QUERY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\?|&)import=?(?:&|$)").expect("static regex"));
static DIRECT_REQUEST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\?|&)direct=?(?:&|$)").expect("static regex"));
static TRAILING_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]$").expect("static regex"));
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bt=\d{13}&?\b").expect("static regex"));
static EXTERNAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?:)?//").expect("static regex"));
static DATA_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*data:").expect("static regex"));
static VOLUME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[A-Z]:").expect("static regex"));
static NESTED_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*>\s*").expect("static regex"));

/// Strip the query string and hash from a URL.
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Prefix an id with `/@id/` and escape null bytes so it is a valid browser specifier.
pub fn wrap_id(id: &str) -> String {
    if id.starts_with(VALID_ID_PREFIX) {
        id.to_string()
    } else {
        format!("{VALID_ID_PREFIX}{}", id.replace('\0', NULL_BYTE_PLACEHOLDER))
    }
}

/// Undo [`wrap_id`].
pub fn unwrap_id(id: &str) -> String {
    match id.strip_prefix(VALID_ID_PREFIX) {
        Some(rest) => rest.replace(NULL_BYTE_PLACEHOLDER, "\0"),
        None => id.to_string(),
    }
}

/// Turn a dependency id into a flat file name: `@scope/pkg > dep.js` -> `@scope_pkg___dep__js`.
pub fn flatten_id(id: &str) -> String {
    let flat = id.replace(['/', ':'], "_").replace('.', "__");
    NESTED_SEPARATOR_RE.replace_all(&flat, "___").into_owned()
}

/// Normalize the nested dependency separator: `a>b` -> `a > b`.
pub fn normalize_id(id: &str) -> String {
    NESTED_SEPARATOR_RE.replace_all(id, " > ").into_owned()
}

pub fn remove_timestamp_query(url: &str) -> String {
    let stripped = TIMESTAMP_RE.replace(url, "");
    TRAILING_SEPARATOR_RE.replace(&stripped, "").into_owned()
}

pub fn remove_import_query(url: &str) -> String {
    let stripped = IMPORT_QUERY_RE.replace(url, "$1");
    TRAILING_SEPARATOR_RE.replace(&stripped, "").into_owned()
}

pub fn remove_direct_query(url: &str) -> String {
    let stripped = DIRECT_REQUEST_RE.replace(url, "$1");
    TRAILING_SEPARATOR_RE.replace(&stripped, "").into_owned()
}

/// Put `query` first in the query string, keeping any existing query and hash.
pub fn inject_query(url: &str, query: &str) -> String {
    let (before_hash, hash) = match url.find('#') {
        Some(i) => (&url[..i], &url[i..]),
        None => (url, ""),
    };
    let (pathname, search) = match before_hash.find('?') {
        Some(i) => (&before_hash[..i], &before_hash[i + 1..]),
        None => (before_hash, ""),
    };

    let mut out = String::with_capacity(url.len() + query.len() + 2);
    out.push_str(pathname);
    out.push('?');
    out.push_str(query);
    if !search.is_empty() {
        out.push('&');
        out.push_str(search);
    }
    out.push_str(hash);
    out
}

pub fn is_external_url(url: &str) -> bool {
    EXTERNAL_RE.is_match(url)
}

pub fn is_data_url(url: &str) -> bool {
    DATA_URL_RE.is_match(url)
}

/// A bare import names a package: it starts with a word character or `@`
/// and is not a URL.
pub fn is_bare_import(id: &str) -> bool {
    let starts_ok = id
        .chars()
        .next()
        .is_some_and(|c| c == '@' || c == '_' || c.is_ascii_alphanumeric());
    starts_ok && !id[1..].contains("://")
}

/// Split a bare deep import into package name and subpath:
/// `@scope/pkg/sub` -> (`@scope/pkg`, `sub`).
pub fn split_deep_import(id: &str) -> Option<(&str, &str)> {
    let mut slashes = id.match_indices('/');
    let split = if id.starts_with('@') {
        slashes.nth(1)
    } else {
        slashes.next()
    }?;
    Some((&id[..split.0], &id[split.0 + 1..]))
}

/// Convert a `/@fs/` id (or any path) into an absolute filesystem path.
pub fn fs_path_from_id(id: &str) -> String {
    let fs_path = normalize_path(id.strip_prefix(FS_PREFIX).unwrap_or(id));
    if fs_path.starts_with('/') || VOLUME_RE.is_match(&fs_path) {
        fs_path
    } else {
        format!("/{fs_path}")
    }
}

/// Extension of the last path segment, including the dot. Dotfiles have none.
pub fn extname(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(i) => &base[i..],
    }
}

pub fn is_js_request(url: &str) -> bool {
    let url = clean_url(url);
    if KNOWN_JS_SRC_RE.is_match(url) {
        return true;
    }
    extname(url).is_empty() && !url.ends_with('/')
}

pub fn is_css_request(url: &str) -> bool {
    CSS_LANGS_RE.is_match(url)
}

pub fn is_direct_request(url: &str) -> bool {
    DIRECT_REQUEST_RE.is_match(url)
}

/// A CSS file requested as a stylesheet rather than imported as a module
pub fn is_direct_css_request(url: &str) -> bool {
    is_css_request(url) && is_direct_request(url)
}

pub fn is_import_request(url: &str) -> bool {
    IMPORT_QUERY_RE.is_match(url)
}

pub fn is_internal_request(url: &str) -> bool {
    url.starts_with(FS_PREFIX)
        || url.starts_with(VALID_ID_PREFIX)
        || url.starts_with(CLIENT_PUBLIC_PATH)
}

pub fn is_ts_request(url: &str) -> bool {
    KNOWN_TS_RE.is_match(url)
}

pub fn is_possible_ts_output(url: &str) -> bool {
    KNOWN_TS_OUTPUT_RE.is_match(clean_url(url))
}

/// TypeScript sources that could compile to `file_path`: `a.js` -> `a.ts`, `a.tsx`.
pub fn potential_ts_src_paths(file_path: &str) -> Vec<String> {
    let Some(caps) = TS_OUTPUT_SPLIT_RE.captures(file_path) else {
        return Vec::new();
    };
    let Some(whole) = caps.get(0) else {
        return Vec::new();
    };
    let name = &file_path[..whole.start()];
    let ext = caps.get(1).map_or("", |m| m.as_str());
    let query = caps.get(2).map_or("", |m| m.as_str());

    let mut paths = vec![format!("{name}{}{query}", ext.replacen("js", "ts", 1))];
    if !ext.ends_with('x') {
        paths.push(format!("{name}{}{query}", ext.replacen("js", "tsx", 1)));
    }
    paths
}

/// Add the dependency version query if `url` does not carry one already.
pub fn ensure_version_query(url: &str, browser_hash: &str) -> String {
    if DEP_VERSION_RE.is_match(url) {
        url.to_string()
    } else {
        inject_query(url, &format!("v={browser_hash}"))
    }
}

/// Extract `v=<hash>` from a URL.
pub fn version_query(url: &str) -> Option<&str> {
    DEP_VERSION_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Wrap URLs that are not valid browser specifiers before sending them in an HMR payload.
pub fn normalize_hmr_url(url: &str) -> String {
    if url.starts_with('.') || url.starts_with('/') {
        url.to_string()
    } else {
        wrap_id(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_unwrap_id() {
        assert_eq!(wrap_id("\0virtual"), "/@id/__x00__virtual");
        assert_eq!(wrap_id("/@id/already"), "/@id/already");
        assert_eq!(unwrap_id("/@id/__x00__virtual"), "\0virtual");
        assert_eq!(unwrap_id("/src/main.js"), "/src/main.js");
    }

    #[test]
    fn test_flatten_id() {
        assert_eq!(flatten_id("lodash"), "lodash");
        assert_eq!(flatten_id("@vue/shared"), "@vue_shared");
        assert_eq!(flatten_id("lodash/debounce.js"), "lodash_debounce__js");
        assert_eq!(flatten_id("a > b"), "a___b");
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("a>b"), "a > b");
        assert_eq!(normalize_id("a  >   b > c"), "a > b > c");
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(clean_url("/a.js?v=123#x"), "/a.js");
        assert_eq!(clean_url("/a.js#x?y"), "/a.js");
        assert_eq!(clean_url("/a.js"), "/a.js");
    }

    #[test]
    fn test_remove_timestamp_query() {
        assert_eq!(remove_timestamp_query("/a.js?t=1700000000000"), "/a.js");
        assert_eq!(
            remove_timestamp_query("/a.js?t=1700000000000&import"),
            "/a.js?import"
        );
        assert_eq!(remove_timestamp_query("/a.js?t=12"), "/a.js?t=12");
    }

    #[test]
    fn test_remove_import_query() {
        assert_eq!(remove_import_query("/a.svg?import"), "/a.svg");
        assert_eq!(remove_import_query("/a.svg?import&t=1"), "/a.svg?t=1");
        assert_eq!(remove_import_query("/a.svg?v=1&import"), "/a.svg?v=1");
    }

    #[test]
    fn test_inject_query() {
        assert_eq!(inject_query("/a.js", "import"), "/a.js?import");
        assert_eq!(inject_query("/a.js?v=1", "import"), "/a.js?import&v=1");
        assert_eq!(inject_query("/a.js#h", "t=1"), "/a.js?t=1#h");
    }

    #[test]
    fn test_request_kinds() {
        assert!(is_js_request("/src/main.ts"));
        assert!(is_js_request("/src/main"));
        assert!(!is_js_request("/src/"));
        assert!(!is_js_request("/logo.png"));
        assert!(is_css_request("/style.scss?direct"));
        assert!(is_direct_css_request("/style.css?direct"));
        assert!(!is_direct_css_request("/style.css"));
        assert!(is_import_request("/a.svg?import"));
        assert!(is_ts_request("/a.mts"));
        assert!(is_possible_ts_output("/a.js?v=1"));
    }

    #[test]
    fn test_urls() {
        assert!(is_external_url("https://cdn.example.com/x.js"));
        assert!(is_external_url("//cdn.example.com/x.js"));
        assert!(!is_external_url("/x.js"));
        assert!(is_data_url("data:text/javascript,export default 1"));
        assert!(is_bare_import("lodash"));
        assert!(is_bare_import("@vue/shared"));
        assert!(!is_bare_import("./a"));
        assert!(!is_bare_import("http://x.com/a"));
    }

    #[test]
    fn test_split_deep_import() {
        assert_eq!(split_deep_import("lodash/fp"), Some(("lodash", "fp")));
        assert_eq!(
            split_deep_import("@scope/pkg/a/b"),
            Some(("@scope/pkg", "a/b"))
        );
        assert_eq!(split_deep_import("lodash"), None);
        assert_eq!(split_deep_import("@scope/pkg"), None);
    }

    #[test]
    fn test_fs_path_from_id() {
        assert_eq!(fs_path_from_id("/@fs/home/u/a.js"), "/home/u/a.js");
        assert_eq!(fs_path_from_id("/@fs/C:/u/a.js"), "C:/u/a.js");
        assert_eq!(fs_path_from_id("home/u/a.js"), "/home/u/a.js");
    }

    #[test]
    fn test_potential_ts_src_paths() {
        assert_eq!(potential_ts_src_paths("/a.js"), vec!["/a.ts", "/a.tsx"]);
        assert_eq!(potential_ts_src_paths("/a.mjs"), vec!["/a.mts", "/a.mtsx"]);
        assert_eq!(potential_ts_src_paths("/a.jsx"), vec!["/a.tsx"]);
        assert_eq!(
            potential_ts_src_paths("/a.js?v=1"),
            vec!["/a.ts?v=1", "/a.tsx?v=1"]
        );
    }

    #[test]
    fn test_version_query() {
        assert_eq!(ensure_version_query("/a.js", "abc"), "/a.js?v=abc");
        assert_eq!(ensure_version_query("/a.js?v=xyz", "abc"), "/a.js?v=xyz");
        assert_eq!(version_query("/a.js?import&v=1a2b"), Some("v=1a2b"));
    }

    #[test]
    fn test_normalize_hmr_url() {
        assert_eq!(normalize_hmr_url("/src/a.js"), "/src/a.js");
        assert_eq!(normalize_hmr_url("virtual:x"), "/@id/virtual:x");
    }
}
