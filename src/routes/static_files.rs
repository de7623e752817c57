//! Console static files

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::json_response;

/// Map a file extension to its content type
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Resolve a request path inside `root`; `None` for anything escaping it
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = match request_path {
        "" | "/" => "index.html",
        p => p.trim_start_matches('/'),
    };

    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

/// Serve a file from the frontend directory
pub async fn serve_static(root: &Path, request_path: &str) -> Response<Full<Bytes>> {
    let not_found = || {
        json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({ "error": "Not Found", "path": request_path }),
        )
    };

    let Some(path) = resolve(root, request_path) else {
        debug!(path = request_path, "Rejected static path");
        return not_found();
    };

    match tokio::fs::read(&path).await {
        Ok(contents) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", content_type_for(&path))
            .body(Full::new(Bytes::from(contents)))
            .unwrap(),
        Err(_) => not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_maps_to_index() {
        let root = Path::new("/srv/frontend");
        assert_eq!(resolve(root, "/"), Some(root.join("index.html")));
        assert_eq!(resolve(root, "/js/app.js"), Some(root.join("js/app.js")));
    }

    #[test]
    fn test_traversal_rejected() {
        let root = Path::new("/srv/frontend");
        assert_eq!(resolve(root, "/../etc/passwd"), None);
        assert_eq!(resolve(root, "/css/../../secret"), None);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a/index.HTML")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("image_4.jpg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>console</h1>").unwrap();

        let response = serve_static(dir.path(), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["Content-Type"], "text/html; charset=utf-8");

        let missing = serve_static(dir.path(), "/nope.html").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
