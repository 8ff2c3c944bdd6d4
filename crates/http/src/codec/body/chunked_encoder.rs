use std::io::Write;

use crate::codec::FastWrite;
use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

/// Writes each chunk as `<hex size>\r\n<data>\r\n` and ends with `0\r\n\r\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(bytes) => {
                let size = bytes.remaining();
                // a zero sized chunk would terminate the body early
                if size == 0 {
                    return Ok(());
                }
                dst.reserve(size + 12);
                write!(FastWrite(dst), "{size:X}\r\n")?;
                dst.put(bytes);
                dst.put_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.put_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn frames_chunks_in_hex() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from(vec![b'a'; 26])), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        let expected = format!("1A\r\n{}\r\n0\r\n\r\n", "a".repeat(26));
        assert_eq!(&dst[..], expected.as_bytes());
        assert!(encoder.is_finish());
    }
}
