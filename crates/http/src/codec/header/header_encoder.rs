use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::FastWrite;
use crate::protocol::{PayloadSize, ResponseHead, SendError, is_bodiless_status};

const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Serializes a response head, setting the framing header from the payload size.
///
/// Framing headers are never written for 1xx, 204 and 304 responses.
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::invalid_state("only HTTP/1.x responses can be encoded"));
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        let status = head.status();
        write!(FastWrite(dst), "{} {} {}\r\n", version, status.as_str(), status.canonical_reason().unwrap_or(""))?;

        let headers = head.headers_mut();
        if is_bodiless_status(status) {
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
        } else {
            match payload_size {
                PayloadSize::Length(n) => {
                    headers.remove(header::TRANSFER_ENCODING);
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(n));
                }
                PayloadSize::Chunked => {
                    headers.remove(header::CONTENT_LENGTH);
                    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                }
                PayloadSize::Empty => {
                    headers.remove(header::TRANSFER_ENCODING);
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                }
            }
        }

        for (name, value) in head.headers() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn writes_content_length() {
        let mut head = Response::new(());
        head.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        assert_eq!(encode(head, PayloadSize::Length(12)), "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 12\r\n\r\n");
    }

    #[test]
    fn switching_protocols_has_no_framing() {
        let mut head = Response::new(());
        *head.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        head.headers_mut().insert(header::UPGRADE, HeaderValue::from_static("websocket"));

        assert_eq!(encode(head, PayloadSize::Empty), "HTTP/1.1 101 Switching Protocols\r\nupgrade: websocket\r\n\r\n");
    }

    #[test]
    fn not_modified_drops_stale_length() {
        let mut head = Response::new(());
        *head.status_mut() = StatusCode::NOT_MODIFIED;
        head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("99"));

        assert_eq!(encode(head, PayloadSize::Empty), "HTTP/1.1 304 Not Modified\r\n\r\n");
    }

    #[test]
    fn unknown_status_has_empty_reason() {
        let mut head = Response::new(());
        *head.status_mut() = StatusCode::from_u16(599).unwrap();

        assert_eq!(encode(head, PayloadSize::Empty), "HTTP/1.1 599 \r\ncontent-length: 0\r\n\r\n");
    }
}
