//! Request head decoding on top of `httparse`.
//!
//! httparse borrows header names and values from the read buffer. Their byte
//! ranges are recorded first, then the head is split off the buffer once and
//! every value becomes a cheap slice of those shared bytes.

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

const MAX_HEADER_NUM: usize = 64;

const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Shortest head that can parse: `GET / HTTP/1.1\r\n\r\n` minus the CRs.
const MIN_REQUEST_BYTES: usize = 14;

/// Decodes a request head and decides how its payload is framed.
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_REQUEST_BYTES {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            httparse::Error::Version => ParseError::invalid_request_line("unrecognized http version"),
            httparse::Error::Token | httparse::Error::NewLine => ParseError::invalid_request_line(e),
            e => ParseError::invalid_header(e),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            Some(v) => return Err(ParseError::UnsupportedVersion(v)),
            None => return Err(ParseError::invalid_request_line("missing http version")),
        };
        let method = req
            .method
            .ok_or_else(|| ParseError::invalid_request_line("missing method"))
            .and_then(|m| Method::from_bytes(m.as_bytes()).map_err(ParseError::invalid_request_line))?;
        let uri = req
            .path
            .ok_or_else(|| ParseError::invalid_request_line("missing request target"))
            .and_then(|p| p.parse::<Uri>().map_err(ParseError::invalid_request_line))?;

        let header_count = req.headers.len();
        let mut header_index = [HeaderIndex::EMPTY; MAX_HEADER_NUM];
        HeaderIndex::record(src, req.headers, &mut header_index);

        let header_bytes = src.split_to(body_offset).freeze();

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;

        let header_map = request.headers_mut();
        header_map.reserve(header_count);
        for index in &header_index[..header_count] {
            let name = HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value =
                HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1)).map_err(ParseError::invalid_header)?;
            header_map.append(name, value);
        }

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;

        Ok(Some((header, payload_size)))
    }
}

/// Byte ranges of one header's name and value inside the head buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    const EMPTY: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            index.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            index.value = (value_start, value_start + header.value.len());
        }
    }
}

/// Picks the payload framing per RFC 9112 §6.
///
/// Requests that send both `Transfer-Encoding` and `Content-Length` are
/// rejected outright.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    if !header.need_body() {
        return Ok(PayloadSize::Empty);
    }

    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(Some(te_value)) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_header("transfer-encoding without a final chunked coding"))
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            if length == 0 { Ok(PayloadSize::Empty) } else { Ok(PayloadSize::Length(length)) }
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer-encoding and content-length both present")),
    }
}

/// `chunked` must be the last coding when present.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    header_value
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use indoc::indoc;

    #[test]
    fn check_is_chunked() {
        let headers = HeaderMap::new();
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        let mut headers = HeaderMap::new();
        headers.insert("Transfer-Encoding", "gzip, chunked".parse().unwrap());
        assert!(is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "chunked, gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
    }

    #[test]
    fn leaves_body_bytes_in_buffer() {
        let str = indoc! {r##"
        POST /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        Content-Length: 3

        123"##};

        let mut bytes = BytesMut::from(str);
        let (_, payload_size) = HeaderDecoder.decode(&mut bytes).unwrap().unwrap();

        assert_eq!(payload_size, PayloadSize::Length(3));
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html?a=1&b=2 HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let mut buf = BytesMut::from(str);
        let (header, payload_size) = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().path(), "/index.html");
        assert_eq!(header.uri().query(), Some("a=1&b=2"));
        assert_eq!(header.headers().len(), 3);
        assert_eq!(header.headers().get(http::header::ACCEPT), Some(&HeaderValue::from_static("*/*")));
        assert_eq!(header.headers().get(http::header::USER_AGENT), Some(&HeaderValue::from_static("curl/7.79.1")));
    }

    #[test]
    fn get_ignores_content_length() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nContent-Length: 10\r\n\r\n");
        let (_, payload_size) = HeaderDecoder.decode(&mut buf).unwrap().unwrap();
        assert!(payload_size.is_empty());
    }

    #[test]
    fn partial_head_waits() {
        let mut buf = BytesMut::from("GET /index.html HTTP/1.1\r\nHost: 127.0");
        assert!(HeaderDecoder.decode(&mut buf).unwrap().is_none());
        assert!(!buf.is_empty());
    }

    #[test]
    fn rejects_oversized_head() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\n");
        buf.extend_from_slice(format!("X-Filler: {}\r\n", "a".repeat(MAX_HEADER_BYTES)).as_bytes());
        buf.extend_from_slice(b"\r\n");

        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn rejects_conflicting_framing() {
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn rejects_garbage_request_line() {
        let mut buf = BytesMut::from("NOT A REQUEST LINE\r\n\r\n");
        assert!(HeaderDecoder.decode(&mut buf).is_err());
    }
}
