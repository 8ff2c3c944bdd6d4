use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// A parsed request head. The body is attached later with [`RequestHeader::body`].
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|()| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether a payload is read for this method at all.
    ///
    /// GET, HEAD, DELETE, OPTIONS and CONNECT requests are treated as body-less
    /// regardless of their framing headers.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// `Expect: 100-continue` was sent.
    pub fn expects_continue(&self) -> bool {
        self.headers()
            .get(http::header::EXPECT)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn header(method: Method) -> RequestHeader {
        let mut request = Request::new(());
        *request.method_mut() = method;
        RequestHeader::from(request)
    }

    #[test]
    fn body_is_only_read_for_methods_that_carry_one() {
        assert!(!header(Method::GET).need_body());
        assert!(!header(Method::HEAD).need_body());
        assert!(!header(Method::DELETE).need_body());
        assert!(header(Method::POST).need_body());
        assert!(header(Method::PUT).need_body());
        assert!(header(Method::PATCH).need_body());
    }

    #[test]
    fn detects_expect_continue() {
        let mut request = header(Method::POST);
        assert!(!request.expects_continue());

        request.as_mut().headers_mut().insert(http::header::EXPECT, HeaderValue::from_static("100-Continue"));
        assert!(request.expects_continue());
    }
}
