use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

/// Writes exactly `length` bytes of payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    length: u64,
    eof: bool,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { length, eof: false }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                let size = bytes.remaining() as u64;
                if size > self.length {
                    return Err(SendError::invalid_body(format!("{} bytes more than the declared content-length", size - self.length)));
                }
                dst.put(bytes);
                self.length -= size;
                Ok(())
            }
            PayloadItem::Eof => {
                if self.length != 0 {
                    return Err(SendError::invalid_body(format!("body ended {} bytes short of its content-length", self.length)));
                }
                self.eof = true;
                Ok(())
            }
        }
    }
}
