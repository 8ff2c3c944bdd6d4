//! The failure value every stage of the dispatch lifecycle speaks.
//!
//! An [`Error`] carries the HTTP status it should be answered with and,
//! optionally, the underlying cause. Middlewares, handlers and the engine
//! itself all return it; [`ErrorDelivery`] turns it into a response.

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

use crate::capability::{CapabilityRegistry, Rendered, Representable, SatisfactionMap};
use crate::request::RequestContext;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A status-bearing failure.
///
/// The status is expected to be a client or server error (>= 400).
#[derive(Debug)]
pub struct Error {
    status: StatusCode,
    cause: Option<BoxError>,
}

impl Error {
    pub fn new(status: StatusCode) -> Self {
        debug_assert!(status.as_u16() >= 400, "error status must be >= 400, got {status}");
        Self { status, cause: None }
    }

    pub fn with_cause(status: StatusCode, cause: impl Into<BoxError>) -> Self {
        debug_assert!(status.as_u16() >= 400, "error status must be >= 400, got {status}");
        Self { status, cause: Some(cause.into()) }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn bad_request(cause: impl Into<BoxError>) -> Self {
        Self::with_cause(StatusCode::BAD_REQUEST, cause)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn not_acceptable() -> Self {
        Self::new(StatusCode::NOT_ACCEPTABLE)
    }

    pub fn payload_too_large(cause: impl Into<BoxError>) -> Self {
        Self::with_cause(StatusCode::PAYLOAD_TOO_LARGE, cause)
    }

    pub fn unsupported_media_type(media_type: impl fmt::Display) -> Self {
        Self::with_cause(StatusCode::UNSUPPORTED_MEDIA_TYPE, format!("unsupported content type {media_type}"))
    }

    pub fn internal(cause: impl Into<BoxError>) -> Self {
        Self::with_cause(StatusCode::INTERNAL_SERVER_ERROR, cause)
    }

    pub fn not_implemented() -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {cause}", self.status),
            None => write!(f, "{}", self.status),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

type RenderError<S> = dyn Fn(&RequestContext<S>, &Error) -> Option<Rendered> + Send + Sync;

/// Renders failures for the client.
///
/// Without a registered error handler, or when the client accepts none of the
/// error type's representations, the failure is answered with its status and
/// an empty body.
pub(crate) struct ErrorDelivery<S> {
    render: Option<Box<RenderError<S>>>,
}

impl<S> ErrorDelivery<S> {
    pub(crate) fn status_only() -> Self {
        Self { render: None }
    }

    pub(crate) fn with_handler<T, F>(registry: &CapabilityRegistry, handler: F) -> Self
    where
        T: Representable,
        F: Fn(&RequestContext<S>, &Error) -> T + Send + Sync + 'static,
    {
        let satisfaction = SatisfactionMap::<T>::compute(registry);
        let render = move |ctx: &RequestContext<S>, error: &Error| {
            let choice = satisfaction.choose(ctx.headers())?;
            let value = handler(ctx, error);
            Some(satisfaction.render(&choice, value))
        };
        Self { render: Some(Box::new(render)) }
    }

    /// The rendered error body, if a representation was found.
    pub(crate) fn render(&self, ctx: &RequestContext<S>, error: &Error) -> Option<Rendered> {
        self.render.as_ref().and_then(|render| render(ctx, error))
    }
}

impl<S> fmt::Debug for ErrorDelivery<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorDelivery").field("has_handler", &self.render.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cause() {
        let error = Error::bad_request("missing field `name`");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.to_string(), "400 Bad Request: missing field `name`");
        assert!(error.source().is_some());
    }

    #[test]
    fn status_only_error() {
        let error = Error::method_not_allowed();
        assert_eq!(error.to_string(), "405 Method Not Allowed");
        assert!(error.cause().is_none());
    }

    #[test]
    #[should_panic(expected = "error status must be >= 400")]
    #[cfg(debug_assertions)]
    fn success_status_is_rejected() {
        let _ = Error::new(StatusCode::OK);
    }
}
