//! `tokio_util` codecs for HTTP/1.1 messages
//!
//! - [`RequestDecoder`] turns bytes into a request head followed by payload items
//! - [`ResponseEncoder`] turns a response head and payload items back into bytes
//!
//! Both sides are state machines keyed on [`PayloadSize`](crate::protocol::PayloadSize):
//! after a head, the codec switches to a length, chunked or empty payload codec
//! until it sees `Eof`.
//!
//! ```
//! use bytes::BytesMut;
//! use courier_http::codec::RequestDecoder;
//! use courier_http::protocol::Message;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buf = BytesMut::from("GET /ping HTTP/1.1\r\nHost: localhost\r\n\r\n");
//!
//! let Some(Message::Header((head, _payload_size))) = decoder.decode(&mut buf).unwrap() else {
//!     panic!("expect a request head");
//! };
//! assert_eq!(head.uri().path(), "/ping");
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;

use bytes::{BufMut, BytesMut};
use std::io;

/// `io::Write` over a `BytesMut`, for `write!` into an encode buffer.
pub(crate) struct FastWrite<'a>(pub(crate) &'a mut BytesMut);

impl io::Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
