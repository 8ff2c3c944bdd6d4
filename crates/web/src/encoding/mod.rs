//! Response compression.

use std::io;

use bytes::{Bytes, BytesMut};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderMap, HeaderValue, Response, StatusCode};

use crate::body::ResponseBody;
use crate::negotiate::ContentEncoding;

mod encoder;

use encoder::{EncodedBody, Encoder};

/// An in-memory sink the compressors write into.
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compresses the response body with the first of the `supported` codings
/// the client accepts.
///
/// Informational, `204` and `304` responses, empty bodies and bodies that
/// already carry a `Content-Encoding` are left alone.
pub(crate) fn encode_response(
    request_headers: &HeaderMap,
    supported: &[ContentEncoding],
    response: &mut Response<ResponseBody>,
) {
    let status = response.status();
    if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return;
    }

    if response.headers().contains_key(CONTENT_ENCODING) || response.body().is_empty() {
        return;
    }

    let Some(encoding) = request_headers
        .get(ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .and_then(|accept_encoding| ContentEncoding::select_from(accept_encoding, supported))
    else {
        return;
    };

    let Some(encoder) = Encoder::new(encoding) else {
        return;
    };

    let body = response.body_mut();
    *body = ResponseBody::stream(EncodedBody::new(body.take(), encoder));

    let headers = response.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
    headers.append(VARY, HeaderValue::from_static("accept-encoding"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body::Body;

    fn request_headers(accept_encoding: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(accept_encoding));
        headers
    }

    #[test]
    fn compresses_with_first_accepted_coding() {
        let mut response = Response::new(ResponseBody::from("compress me"));
        encode_response(&request_headers("identity, br, gzip"), &ContentEncoding::STANDARD, &mut response);

        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "br");
        assert!(response.body().size_hint().exact().is_none());
    }

    #[test]
    fn bodiless_statuses_pass_through() {
        let mut response = Response::new(ResponseBody::from("unchanged"));
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        encode_response(&request_headers("gzip"), &ContentEncoding::STANDARD, &mut response);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());

        let mut response = Response::new(ResponseBody::empty());
        encode_response(&request_headers("gzip"), &ContentEncoding::STANDARD, &mut response);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn unknown_codings_pass_through() {
        let mut response = Response::new(ResponseBody::from("plain"));
        encode_response(&request_headers("compress, identity"), &ContentEncoding::STANDARD, &mut response);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(response.body().size_hint().exact(), Some(5));
    }

    #[test]
    fn zstd_needs_to_be_supported() {
        let mut response = Response::new(ResponseBody::from("compress me"));
        encode_response(&request_headers("zstd, gzip"), &ContentEncoding::STANDARD, &mut response);
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");

        let supported = [ContentEncoding::Gzip, ContentEncoding::Zstd];
        let mut response = Response::new(ResponseBody::from("compress me"));
        encode_response(&request_headers("zstd, gzip"), &supported, &mut response);
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "zstd");
    }
}
