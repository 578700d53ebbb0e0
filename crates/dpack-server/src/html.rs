//! Inline module scripts of served html pages.
//!
//! A `<script type="module">` with a body is cut out of the page and served
//! as its own module at `<page>?html-proxy&index=<n>.js`, so its imports go
//! through import analysis like those of any other module.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b(?P<attrs>[^>]*)>(?P<body>.*?)</script>").expect("static regex")
});
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static MODULE_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\btype\s*=\s*["']?module\b"#).expect("static regex"));
static SRC_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bsrc\s*=").expect("static regex"));
static HTML_PROXY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\?html-proxy&index=\d+\.js$").expect("static regex"));

pub fn is_html_proxy(url: &str) -> bool {
    HTML_PROXY_RE.is_match(url)
}

/// Url of the `index`-th inline module script of the page at `page_url`.
pub fn html_proxy_url(page_url: &str, index: usize) -> String {
    format!("{page_url}?html-proxy&index={index}.js")
}

/// Code of the inline module scripts seen so far, keyed by proxy url.
#[derive(Debug, Default)]
pub struct HtmlProxyCache {
    modules: RwLock<FxHashMap<String, String>>,
}

impl HtmlProxyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.modules.read().get(url).cloned()
    }

    /// Store `code` for `url`; `true` when it replaced different code.
    fn insert(&self, url: String, code: String) -> bool {
        match self.modules.write().insert(url, code.clone()) {
            Some(previous) => previous != code,
            None => false,
        }
    }
}

/// A page with its inline module scripts moved out.
#[derive(Debug, PartialEq, Eq)]
pub struct ProxiedHtml {
    pub html: String,
    /// Proxy urls whose code differs from what was cached before
    pub changed: Vec<String>,
}

/// Swap every inline module script of `html` for a script tag loading its
/// proxy module. Scripts inside comments are left alone.
pub fn proxy_inline_modules(
    html: &str,
    page_url: &str,
    base: &str,
    cache: &HtmlProxyCache,
) -> ProxiedHtml {
    let comments: Vec<(usize, usize)> = COMMENT_RE
        .find_iter(html)
        .map(|m| (m.start(), m.end()))
        .collect();
    let base = base.trim_end_matches('/');

    let mut out = String::with_capacity(html.len());
    let mut changed = Vec::new();
    let mut last = 0;
    let mut index = 0;
    for caps in SCRIPT_RE.captures_iter(html) {
        let (Some(whole), Some(attrs), Some(body)) = (caps.get(0), caps.name("attrs"), caps.name("body")) else {
            continue;
        };
        if comments.iter().any(|&(start, end)| whole.start() >= start && whole.start() < end) {
            continue;
        }
        let attrs = attrs.as_str();
        if !MODULE_TYPE_RE.is_match(attrs) || SRC_ATTR_RE.is_match(attrs) {
            continue;
        }
        if body.as_str().trim().is_empty() {
            continue;
        }

        let url = html_proxy_url(page_url, index);
        index += 1;
        if cache.insert(url.clone(), body.as_str().to_string()) {
            changed.push(url.clone());
        }
        out.push_str(&html[last..whole.start()]);
        out.push_str(&format!("<script type=\"module\" src=\"{base}{url}\"></script>"));
        last = whole.end();
    }
    out.push_str(&html[last..]);

    ProxiedHtml { html: out, changed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_module_becomes_proxy_script() {
        let cache = HtmlProxyCache::new();
        let html = concat!(
            "<html><body>",
            "<script type=\"module\">import _ from \"lodash\"</script>",
            "<script>window.legacy = true</script>",
            "<script type=\"module\" src=\"/main.js\"></script>",
            "<script type='module'>import './b.js'</script>",
            "</body></html>",
        );

        let proxied = proxy_inline_modules(html, "/index.html", "/", &cache);
        assert_eq!(
            proxied.html,
            concat!(
                "<html><body>",
                "<script type=\"module\" src=\"/index.html?html-proxy&index=0.js\"></script>",
                "<script>window.legacy = true</script>",
                "<script type=\"module\" src=\"/main.js\"></script>",
                "<script type=\"module\" src=\"/index.html?html-proxy&index=1.js\"></script>",
                "</body></html>",
            )
        );
        assert!(proxied.changed.is_empty());
        assert_eq!(
            cache.get("/index.html?html-proxy&index=0.js").as_deref(),
            Some("import _ from \"lodash\"")
        );
        assert_eq!(
            cache.get("/index.html?html-proxy&index=1.js").as_deref(),
            Some("import './b.js'")
        );
    }

    #[test]
    fn test_changed_script_is_reported() {
        let cache = HtmlProxyCache::new();
        let before = "<script type=\"module\">console.log(1)</script>";
        let after = "<script type=\"module\">console.log(2)</script>";
        proxy_inline_modules(before, "/index.html", "/", &cache);

        let same = proxy_inline_modules(before, "/index.html", "/", &cache);
        assert!(same.changed.is_empty());
        let edited = proxy_inline_modules(after, "/index.html", "/", &cache);
        assert_eq!(edited.changed, vec!["/index.html?html-proxy&index=0.js".to_string()]);
    }

    #[test]
    fn test_base_and_commented_scripts() {
        let cache = HtmlProxyCache::new();
        let html = "<!-- <script type=\"module\">old()</script> --><script type=\"module\">run()</script>";
        let proxied = proxy_inline_modules(html, "/nested/page.html", "/app/", &cache);
        assert_eq!(
            proxied.html,
            "<!-- <script type=\"module\">old()</script> --><script type=\"module\" src=\"/app/nested/page.html?html-proxy&index=0.js\"></script>"
        );
    }

    #[test]
    fn test_is_html_proxy() {
        assert!(is_html_proxy("/index.html?html-proxy&index=0.js"));
        assert!(is_html_proxy("/root/app/index.html?html-proxy&index=12.js"));
        assert!(!is_html_proxy("/index.html"));
        assert!(!is_html_proxy("/main.js?html-proxy"));
    }
}
