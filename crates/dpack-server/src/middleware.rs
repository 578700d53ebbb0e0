//! Request handling: transformed modules first, then static files.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Method, StatusCode, response::Builder};
use axum::response::{IntoResponse, Response};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

use dpack_graph::url::{
    CLIENT_PUBLIC_PATH, DEP_VERSION_RE, FS_PREFIX, NULL_BYTE_PLACEHOLDER, clean_url, extname,
    inject_query, is_css_request, is_direct_css_request, is_direct_request, is_import_request,
    is_js_request, remove_import_query, unwrap_id,
};
use dpack_graph::utils::{normalize_path, now_ms, root_relative};
use dpack_optimizer::{ERR_OPTIMIZE_DEPS_PROCESSING_ERROR, ERR_OUTDATED_OPTIMIZED_DEP};
use dpack_resolve::DepsOptimizerHandle;

use crate::error::{ERR_CLOSED_SERVER, ERR_LOAD_URL, ServerError};
use crate::html::{is_html_proxy, proxy_inline_modules};
use crate::server::ServerContext;
use crate::transform::transform_request;

/// Path the client polls while waiting for a restarted server.
pub const PING_PATH: &str = "/__dpack_ping";

const IMMUTABLE: &str = "max-age=31536000,immutable";
const NO_CACHE: &str = "no-cache";

/// Serve one request with the given context.
pub async fn handle_request(server: &Arc<ServerContext>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    if parts.method != Method::GET && parts.method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = urlencoding::decode(parts.uri.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| parts.uri.path().to_string())
        .replace(NULL_BYTE_PLACEHOLDER, "\0");
    let url = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    let url = match strip_base(&server.config.base, &url) {
        BaseMatch::Inside(url) => url,
        BaseMatch::Redirect => {
            return with_headers(
                server,
                Response::builder()
                    .status(StatusCode::FOUND)
                    .header(header::LOCATION, server.config.base.as_str()),
                Body::empty(),
            );
        }
        BaseMatch::Outside => {
            let message = format!(
                "The server is configured with a public base URL of {base}. Did you mean to visit {base}{rest}?",
                base = server.config.base,
                rest = url.trim_start_matches('/'),
            );
            return (StatusCode::NOT_FOUND, message).into_response();
        }
    };

    let file = clean_url(&url);
    if file == "/favicon.ico" || file == PING_PATH {
        return StatusCode::NO_CONTENT.into_response();
    }

    if file == CLIENT_PUBLIC_PATH
        || is_js_request(&url)
        || is_import_request(&url)
        || is_css_request(&url)
        || is_html_proxy(&url)
    {
        if let Some(response) = serve_transformed(server, &url, &parts.headers).await {
            return response;
        }
    }

    serve_static(server, &url, &parts.headers).await
}

enum BaseMatch {
    Inside(String),
    Redirect,
    Outside,
}

fn strip_base(base: &str, url: &str) -> BaseMatch {
    if base == "/" {
        return BaseMatch::Inside(url.to_string());
    }
    let trimmed = base.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix(trimmed) {
        if rest.is_empty() || rest.starts_with('?') {
            return BaseMatch::Inside(format!("/{rest}"));
        }
        if rest.starts_with('/') {
            return BaseMatch::Inside(rest.to_string());
        }
    }
    let file = clean_url(url);
    // Internal urls are requested without the base by the client itself
    if file == PING_PATH || file == CLIENT_PUBLIC_PATH {
        return BaseMatch::Inside(url.to_string());
    }
    if file == "/" || file == "/index.html" {
        BaseMatch::Redirect
    } else {
        BaseMatch::Outside
    }
}

/// `None` falls through to static serving.
async fn serve_transformed(server: &Arc<ServerContext>, url: &str, headers: &HeaderMap) -> Option<Response> {
    let mut url = unwrap_id(&remove_import_query(url));
    if is_css_request(&url) && !is_direct_request(&url) && accepts(headers, "text/css") {
        url = inject_query(&url, "direct");
    }

    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        let graph = server.graph.read();
        let cached_etag = graph
            .module_by_url(&url)
            .and_then(|m| graph.node(m))
            .and_then(|n| n.transform_result.as_ref())
            .map(|r| r.etag.clone());
        if cached_etag.as_deref() == Some(if_none_match) {
            debug!(url = %url, "not modified");
            return Some(with_headers(
                server,
                Response::builder().status(StatusCode::NOT_MODIFIED),
                Body::empty(),
            ));
        }
    }

    match transform_request(server, &url, false).await {
        Ok(Some(result)) => {
            let content_type = if is_direct_css_request(&url) {
                "text/css"
            } else {
                "application/javascript"
            };
            let is_dep =
                DEP_VERSION_RE.is_match(&url) || server.optimizer.is_optimized_dep_url(&url);
            let builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ETAG, result.etag.as_str())
                .header(header::CACHE_CONTROL, if is_dep { IMMUTABLE } else { NO_CACHE });
            Some(with_headers(server, builder, Body::from(result.code.clone())))
        }
        Ok(None) => None,
        Err(err) => error_response(server, &url, &err),
    }
}

fn error_response(server: &ServerContext, url: &str, err: &ServerError) -> Option<Response> {
    match err.code() {
        Some(ERR_LOAD_URL) => {
            debug!(url = %url, "no plugin loaded url, trying static files");
            None
        }
        // The page reloads once the optimizer settles; a later request
        // for this url gets the fresh bundle
        Some(ERR_OUTDATED_OPTIMIZED_DEP) | Some(ERR_OPTIMIZE_DEPS_PROCESSING_ERROR) => {
            debug!(url = %url, code = ?err.code(), "optimized dependency not ready");
            Some(StatusCode::GATEWAY_TIMEOUT.into_response())
        }
        Some(ERR_CLOSED_SERVER) => Some(StatusCode::GATEWAY_TIMEOUT.into_response()),
        _ => {
            server.report_error(err);
            Some((StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response())
        }
    }
}

async fn serve_static(server: &Arc<ServerContext>, url: &str, headers: &HeaderMap) -> Response {
    let file = clean_url(url);
    let config = &server.config;

    if let Some(fs_path) = file.strip_prefix(FS_PREFIX.trim_end_matches('/')) {
        let fs_path = normalize_path(fs_path);
        if !config.is_fs_allowed(&fs_path) {
            warn!(file = %fs_path, "blocked /@fs request outside the allowed directories");
            return (
                StatusCode::FORBIDDEN,
                format!("The request url \"{fs_path}\" is outside of the allowed directories."),
            )
                .into_response();
        }
        return match send_file(server, Path::new(&fs_path)).await {
            Some(response) => response,
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let relative = file.trim_start_matches('/');
    let mut candidates: Vec<PathBuf> = Vec::new();
    if !relative.split('/').any(|segment| segment == "..") {
        if file.ends_with('/') {
            candidates.push(Path::new(&config.root).join(relative).join("index.html"));
        } else {
            candidates.push(Path::new(&config.public_dir).join(relative));
            candidates.push(Path::new(&config.root).join(relative));
        }
    }
    for candidate in &candidates {
        if let Some(response) = send_file(server, candidate).await {
            return response;
        }
    }

    // History api fallback for client-side routes
    if extname(file).is_empty() && accepts(headers, "text/html") {
        let index = Path::new(&config.root).join("index.html");
        if let Some(response) = send_file(server, &index).await {
            return response;
        }
    }

    debug!(url = %url, "not found");
    StatusCode::NOT_FOUND.into_response()
}

async fn send_file(server: &ServerContext, path: &Path) -> Option<Response> {
    if !server.runtime.is_file(path) {
        return None;
    }
    let content = match server.runtime.read_file(path).await {
        Ok(content) => content,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "failed to read file");
            return None;
        }
    };

    if path.extension().is_some_and(|ext| ext == "html") {
        let html = String::from_utf8_lossy(&content);
        let html = match root_relative(&normalize_path(path), &server.config.root) {
            Some(page_url) => proxy_page(server, &html, &page_url),
            None => html.into_owned(),
        };
        let html = inject_client_script(&html, &server.config.base);
        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CACHE_CONTROL, NO_CACHE);
        return Some(with_headers(server, builder, Body::from(html)));
    }

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CACHE_CONTROL, NO_CACHE);
    Some(with_headers(server, builder, Body::from(content)))
}

/// Move the page's inline module scripts out to proxy modules, dropping
/// cached transforms of the ones whose code changed since the last visit.
fn proxy_page(server: &ServerContext, html: &str, page_url: &str) -> String {
    let proxied = proxy_inline_modules(html, page_url, &server.config.base, &server.html_proxies);
    if !proxied.changed.is_empty() {
        let mut graph = server.graph.write();
        let timestamp = now_ms();
        let mut seen = FxHashSet::default();
        for url in &proxied.changed {
            if let Some(module) = graph.module_by_url(url) {
                debug!(url = %url, "inline module script changed");
                graph.invalidate_module(module, &mut seen, timestamp, false);
            }
        }
    }
    proxied.html
}

/// Add the client script to a page, before `</body>` when there is one.
pub fn inject_client_script(html: &str, base: &str) -> String {
    let script = format!(
        "<script type=\"module\" src=\"{}{}\"></script>",
        base.trim_end_matches('/'),
        CLIENT_PUBLIC_PATH
    );
    if let Some(pos) = html.rfind("</body>") {
        let mut out = String::with_capacity(html.len() + script.len());
        out.push_str(&html[..pos]);
        out.push_str(&script);
        out.push_str(&html[pos..]);
        out
    } else {
        format!("{html}{script}")
    }
}

fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(mime))
}

/// Finish a response with the configured extra headers.
fn with_headers(server: &ServerContext, mut builder: Builder, body: Body) -> Response {
    for (name, value) in &server.config.server.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => warn!(header = %name, "skipping invalid configured header"),
        }
    }
    builder.body(body).unwrap_or_else(|err| {
        error!(error = %err, "failed to build response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}
