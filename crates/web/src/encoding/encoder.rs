use std::io;
use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes};
use courier_http::protocol::{HttpError, SendError};
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use tracing::{error, trace};
use zstd::stream::write::Encoder as ZstdEncoder;

use super::Writer;
use crate::negotiate::ContentEncoding;

/// A streaming compressor for one response body.
pub(crate) enum Encoder {
    Gzip(GzEncoder<Writer>),
    Deflate(ZlibEncoder<Writer>),
    Zstd(ZstdEncoder<'static, Writer>),
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    /// `None` when the compressor cannot be set up; the body then goes out as is.
    pub(crate) fn new(encoding: ContentEncoding) -> Option<Self> {
        match encoding {
            ContentEncoding::Gzip => Some(Self::Gzip(GzEncoder::new(Writer::new(), Compression::best()))),
            ContentEncoding::Deflate => Some(Self::Deflate(ZlibEncoder::new(Writer::new(), Compression::best()))),
            ContentEncoding::Zstd => match ZstdEncoder::new(Writer::new(), 6) {
                Ok(encoder) => Some(Self::Zstd(encoder)),
                Err(e) => {
                    error!(cause = %e, "failed to create zstd encoder");
                    None
                }
            },
            ContentEncoding::Br => Some(Self::Br(Box::new(brotli::CompressorWriter::new(
                Writer::new(),
                32 * 1024, // 32 KiB buffer
                3,         // BROTLI_PARAM_QUALITY
                22,        // BROTLI_PARAM_LGWIN
            )))),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), io::Error> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(e) = &result {
            trace!(cause = %e, "failed to compress response chunk");
        }
        result
    }

    /// Compressed bytes produced so far.
    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Zstd(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    fn finish(self) -> Result<Bytes, io::Error> {
        match self {
            Self::Gzip(encoder) => encoder.finish().map(Writer::freeze),
            Self::Deflate(encoder) => encoder.finish().map(Writer::freeze),
            Self::Zstd(encoder) => encoder.finish().map(Writer::freeze),
            Self::Br(mut encoder) => {
                encoder.flush()?;
                Ok(encoder.into_inner().freeze())
            }
        }
    }
}

pin_project! {
    /// Compresses `inner` frame by frame.
    pub(crate) struct EncodedBody<B> {
        #[pin]
        inner: B,
        encoder: Option<Encoder>,
    }
}

impl<B> EncodedBody<B> {
    pub(crate) fn new(inner: B, encoder: Encoder) -> Self {
        Self { inner, encoder: Some(encoder) }
    }
}

impl<B> Body for EncodedBody<B>
where
    B: Body<Error = HttpError>,
    B::Data: Buf,
{
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let data = match frame.into_data() {
                        Ok(data) => data,
                        Err(frame) => {
                            error!(trailers = ?frame.trailers_ref(), "trailers can't be compressed");
                            return Poll::Ready(Some(Err(SendError::invalid_body("trailers in compressed body").into())));
                        }
                    };

                    if let Err(e) = encoder.write(data.chunk()) {
                        this.encoder.take();
                        return Poll::Ready(Some(Err(SendError::from(e).into())));
                    }

                    let bytes = encoder.take();
                    if !bytes.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(bytes))));
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    let Some(encoder) = this.encoder.take() else {
                        return Poll::Ready(None);
                    };
                    return match encoder.finish() {
                        Ok(bytes) if bytes.is_empty() => Poll::Ready(None),
                        Ok(bytes) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                        Err(e) => Poll::Ready(Some(Err(SendError::from(e).into()))),
                    };
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ResponseBody;
    use flate2::read::GzDecoder;
    use http_body_util::BodyExt;
    use std::io::Read;

    async fn compress(encoding: ContentEncoding, body: &'static str) -> Bytes {
        let encoder = Encoder::new(encoding).unwrap();
        EncodedBody::new(ResponseBody::from(body), encoder).collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn gzip_round_trip() {
        let text = "the quick brown fox jumps over the lazy dog. ".repeat(20);
        let encoded = compress(ContentEncoding::Gzip, text.clone().leak()).await;
        assert!(encoded.len() < text.len());

        let mut decoded = String::new();
        GzDecoder::new(encoded.as_ref()).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);
    }

    #[tokio::test]
    async fn zstd_round_trip() {
        let encoded = compress(ContentEncoding::Zstd, "zstd payload").await;
        assert_eq!(zstd::decode_all(encoded.as_ref()).unwrap(), b"zstd payload");
    }

    #[tokio::test]
    async fn brotli_round_trip() {
        let encoded = compress(ContentEncoding::Br, "brotli payload").await;
        let mut decoded = Vec::new();
        brotli::BrotliDecompress(&mut encoded.as_ref(), &mut decoded).unwrap();
        assert_eq!(decoded, b"brotli payload");
    }
}
