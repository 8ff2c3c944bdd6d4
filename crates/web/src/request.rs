//! What handlers and middlewares see of a request.
//!
//! - [`RequestContext`]: the request head, path parameters, session and the
//!   response status and headers being built
//! - [`Request`]: a context plus the decoded body, handed to handlers and
//!   route middlewares

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use http::request::Parts;
use http::{Extensions, HeaderMap, Method, StatusCode, Uri, Version};
use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::Error;
use crate::log::{AccessRecord, LogContext};
use crate::session::Session;
use crate::verb::Verb;

/// One in-flight request, minus its body.
#[derive(Debug)]
pub struct RequestContext<S> {
    method: Method,
    verb: Option<Verb>,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    path_params: Vec<(String, String)>,

    status: StatusCode,
    response_headers: HeaderMap,
    session: Session<S>,

    cancellation: CancellationToken,
    cancel_on_drop: Option<DropGuard>,
    started: Instant,
    request_bytes: u64,
    response_bytes: u64,
}

impl<S> RequestContext<S> {
    pub(crate) fn new(parts: Parts, path_params: Vec<(String, String)>) -> Self {
        let verb = Verb::try_from(&parts.method).ok();
        let cancellation = CancellationToken::new();
        let cancel_on_drop = Some(cancellation.clone().drop_guard());
        Self {
            method: parts.method,
            verb,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            path_params,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            session: Session::empty(),
            cancellation,
            cancel_on_drop,
            started: Instant::now(),
            request_bytes: 0,
            response_bytes: 0,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// `None` for methods outside the nine verbs.
    pub fn verb(&self) -> Option<Verb> {
        self.verb
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// A path parameter captured by the route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.path_params.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Deserializes the query string; a malformed one is a 400.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_qs::from_str(self.uri.query().unwrap_or("")).map_err(Error::bad_request)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<S> {
        &mut self.session
    }

    pub fn session_data(&self) -> Option<&S> {
        self.session.data()
    }

    pub fn set_session(&mut self, data: S) {
        self.session.set(data);
    }

    pub fn end_session(&mut self) {
        self.session.end();
    }

    /// Cancelled once the request is over: the response was written, the
    /// client went away, or the duplex socket closed.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Takes over the guard that cancels the token when the context drops.
    pub(crate) fn take_cancel_guard(&mut self) -> Option<DropGuard> {
        self.cancel_on_drop.take()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn request_bytes(&self) -> u64 {
        self.request_bytes
    }

    pub(crate) fn record_request_bytes(&mut self, len: u64) {
        self.request_bytes = len;
    }

    pub(crate) fn record_response_bytes(&mut self, len: u64) {
        self.response_bytes = len;
    }

    pub(crate) fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }

    pub(crate) fn log_context(&self) -> LogContext {
        LogContext { method: self.method.clone(), path: self.uri.path().to_owned() }
    }

    pub(crate) fn access_record(&self, status: StatusCode) -> AccessRecord {
        AccessRecord {
            method: self.method.clone(),
            path: self.uri.path().to_owned(),
            status,
            request_bytes: self.request_bytes,
            response_bytes: self.response_bytes,
            elapsed: self.elapsed(),
        }
    }
}

/// A request with its decoded body.
///
/// Derefs to [`RequestContext`]. The body is `None` when the client sent none.
#[derive(Debug)]
pub struct Request<S, B> {
    ctx: RequestContext<S>,
    body: Option<B>,
}

impl<S, B> Request<S, B> {
    pub(crate) fn new(ctx: RequestContext<S>, body: Option<B>) -> Self {
        Self { ctx, body }
    }

    pub fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut B> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<B> {
        self.body.take()
    }

    pub fn context(&self) -> &RequestContext<S> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RequestContext<S> {
        &mut self.ctx
    }

    pub fn into_context(self) -> RequestContext<S> {
        self.ctx
    }
}

impl<S, B> Deref for Request<S, B> {
    type Target = RequestContext<S>;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl<S, B> DerefMut for Request<S, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn context(uri: &str) -> RequestContext<()> {
        let (parts, ()) = http::Request::builder().method("PATCH").uri(uri).body(()).unwrap().into_parts();
        RequestContext::new(parts, vec![(String::from("id"), String::from("42"))])
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Page {
        page: u32,
        sort: String,
    }

    #[test]
    fn query_and_params() {
        let ctx = context("/items/42?page=2&sort=name");
        assert_eq!(ctx.verb(), Some(Verb::Patch));
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.param("name"), None);
        assert_eq!(ctx.query::<Page>().unwrap(), Page { page: 2, sort: String::from("name") });
    }

    #[test]
    fn malformed_query_is_bad_request() {
        let ctx = context("/items/42?page=two");
        assert_eq!(ctx.query::<Page>().unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn dropping_context_cancels() {
        let ctx = context("/");
        let token = ctx.cancellation().clone();
        assert!(!token.is_cancelled());
        drop(ctx);
        assert!(token.is_cancelled());
    }

    #[test]
    fn taken_guard_outlives_context() {
        let mut ctx = context("/");
        let token = ctx.cancellation().clone();
        let guard = ctx.take_cancel_guard();
        drop(ctx);
        assert!(!token.is_cancelled());
        drop(guard);
        assert!(token.is_cancelled());
    }
}
