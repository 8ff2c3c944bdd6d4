//! Decoder for `Transfer-Encoding: chunked` request bodies (RFC 9112 §7.1).
//!
//! Chunk extensions are ignored. Trailer fields are read and discarded.

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

/// Longest size line accepted, extensions included.
const MAX_SIZE_LINE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// expect `<hex>[;ext]\r\n`
    Size,
    /// this many data bytes left in the current chunk
    Data(u64),
    /// expect the `\r\n` closing a chunk's data
    DataEnd,
    /// expect trailer lines until an empty one
    Trailer,
    Done,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size }
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Size => {
                    let Some(line) = take_line(src, MAX_SIZE_LINE)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    trace!(chunk_size = size, "read chunk size");
                    self.state = if size == 0 { State::Trailer } else { State::Data(size) };
                }

                State::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = remaining.min(src.len() as u64) as usize;
                    let bytes = src.split_to(len).freeze();
                    let left = remaining - len as u64;
                    self.state = if left == 0 { State::DataEnd } else { State::Data(left) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                State::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(ParseError::invalid_chunk("chunk data not followed by CRLF"));
                    }
                    src.advance(2);
                    self.state = State::Size;
                }

                State::Trailer => {
                    let Some(line) = take_line(src, MAX_SIZE_LINE)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }

                State::Done => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}

/// Splits one CRLF terminated line off `src`, without the terminator.
fn take_line(src: &mut BytesMut, max_len: usize) -> Result<Option<BytesMut>, ParseError> {
    match src.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            let line = src.split_to(end);
            src.advance(2);
            Ok(Some(line))
        }
        None if src.len() > max_len => Err(ParseError::invalid_chunk(format!("line exceeds {max_len} bytes"))),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let size = match line.iter().position(|b| *b == b';') {
        Some(ext_start) => &line[..ext_start],
        None => line,
    };
    let size = size.trim_ascii();

    if size.is_empty() {
        return Err(ParseError::invalid_chunk("missing chunk size"));
    }

    let size = std::str::from_utf8(size).map_err(|_| ParseError::invalid_chunk("chunk size is not ascii"))?;
    u64::from_str_radix(size, 16).map_err(|e| ParseError::invalid_chunk(format!("chunk size {size}: {e}")))
}
