use std::cmp;

use crate::protocol::{ParseError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Yields up to `length` bytes as they arrive, then `Eof`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = cmp::min(self.length, src.len() as u64);
        let bytes = src.split_to(len as usize).freeze();

        self.length -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_length() {
        let mut buffer = BytesMut::from(&b"101234567890abcdef\r\n\r\n"[..]);
        let mut length_decoder = LengthDecoder::new(10);

        let payload = length_decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(payload.as_bytes().map(|b| &b[..]), Some(&b"1012345678"[..]));
        assert_eq!(&buffer[..], b"90abcdef\r\n\r\n");

        assert!(length_decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
