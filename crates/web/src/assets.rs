//! Files served from a directory.
//!
//! ```no_run
//! use courier_web::assets::StaticFiles;
//! use courier_web::{Server, Sessionless};
//!
//! # fn build() -> Result<(), courier_web::ServerError> {
//! let server = Server::<()>::builder(Sessionless)
//!     .route("/static/{*path}", StaticFiles::new("public").into_route())?
//!     .build();
//! # Ok(())
//! # }
//! ```

use std::hash::{DefaultHasher, Hash, Hasher};
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::debug;

use crate::error::Error;
use crate::request::Request;
use crate::route::{Handler, Route};
use crate::verb::Verb;

/// Serves the file named by a catch-all path parameter.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    param: String,
}

impl StaticFiles {
    /// Files below `root`, named by the `path` parameter.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), param: String::from("path") }
    }

    /// Reads the file name from another path parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.param = name.into();
        self
    }

    /// A route answering `GET` with the files.
    pub fn into_route<S: Send + Sync + 'static>(self) -> Route<S, (), Bytes> {
        Route::new().handle(Verb::Get, self)
    }

    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        let mut components = relative.components().peekable();
        components.peek()?;
        if components.any(|component| !matches!(component, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Handler<S, (), Bytes> for StaticFiles {
    async fn call(&self, req: &mut Request<S, ()>) -> Result<Bytes, Error> {
        let path = req.param(&self.param).and_then(|relative| self.resolve(relative)).ok_or_else(Error::not_found)?;

        let contents = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => tokio::fs::read(&path).await.map_err(read_error)?,
            Ok(_) => return Err(Error::not_found()),
            Err(e) => return Err(read_error(e)),
        };

        let etag = etag(&contents);
        let headers = req.response_headers_mut();
        headers.insert(ETAG, etag.clone());

        if matches_etag(req.headers(), &etag) {
            debug!(path = %path.display(), "not modified");
            req.set_status(StatusCode::NOT_MODIFIED);
            return Ok(Bytes::new());
        }

        let content_type = HeaderValue::from_static(content_type(&path));
        req.response_headers_mut().insert(CONTENT_TYPE, content_type);
        Ok(Bytes::from(contents))
    }
}

fn read_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Error::not_found(),
        _ => Error::internal(e),
    }
}

fn etag(contents: &[u8]) -> HeaderValue {
    let mut hasher = DefaultHasher::new();
    contents.hash(&mut hasher);
    let tag = format!("\"{:016x}\"", hasher.finish());
    // hex digits and quotes only
    HeaderValue::from_str(&tag).unwrap_or_else(|_| HeaderValue::from_static("\"0\""))
}

fn matches_etag(headers: &HeaderMap, etag: &HeaderValue) -> bool {
    let Ok(etag) = etag.to_str() else {
        return false;
    };
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|candidate| candidate.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == "*" || candidate == etag)
}

fn content_type(path: &Path) -> &'static str {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("xml") => "text/xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
