use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Decodes a request head, then its payload, then the next head.
///
/// While `payload_decoder` is `Some` the decoder is inside a body; it returns
/// to header parsing once the payload yields `Eof`.
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload_decoder = None;
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    fn next(decoder: &mut RequestDecoder, buf: &mut BytesMut) -> Message<(RequestHeader, PayloadSize)> {
        decoder.decode(buf).unwrap().expect("a complete message")
    }

    #[test]
    fn two_pipelined_requests() {
        let str = indoc! {"
        POST /submit HTTP/1.1\r
        Content-Length: 5\r
        \r
        helloGET /next HTTP/1.1\r
        \r
        "};
        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();

        let Message::Header((head, size)) = next(&mut decoder, &mut buf) else { panic!("expect head") };
        assert_eq!(head.method(), &Method::POST);
        assert_eq!(size, PayloadSize::Length(5));

        let Message::Payload(chunk) = next(&mut decoder, &mut buf) else { panic!("expect payload") };
        assert_eq!(chunk.as_bytes().map(|b| &b[..]), Some(&b"hello"[..]));

        let Message::Payload(eof) = next(&mut decoder, &mut buf) else { panic!("expect eof") };
        assert!(eof.is_eof());

        let Message::Header((head, size)) = next(&mut decoder, &mut buf) else { panic!("expect head") };
        assert_eq!(head.uri().path(), "/next");
        assert!(size.is_empty());

        let Message::Payload(eof) = next(&mut decoder, &mut buf) else { panic!("expect eof") };
        assert!(eof.is_eof());
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_body_waits_for_more() {
        let mut buf = BytesMut::from("PUT /x HTTP/1.1\r\nContent-Length: 4\r\n\r\n");
        let mut decoder = RequestDecoder::new();

        assert!(next(&mut decoder, &mut buf).is_header());
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ab");
        assert!(next(&mut decoder, &mut buf).is_payload());
    }
}
