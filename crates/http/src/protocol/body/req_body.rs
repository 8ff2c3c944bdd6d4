use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use super::body_channel::BodyReceiver;
use crate::protocol::ParseError;

/// The body of a request handed to a [`Handler`](crate::handler::Handler).
///
/// Bodies read off a connection stream lazily; bodies built from bytes (tests,
/// in-process dispatch) yield them in one frame.
#[derive(Debug)]
pub struct ReqBody {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    Connection(BodyReceiver),
    Full(Option<Bytes>),
}

impl ReqBody {
    pub(crate) fn connection(receiver: BodyReceiver) -> Self {
        Self { kind: Kind::Connection(receiver) }
    }

    pub fn empty() -> Self {
        Self { kind: Kind::Full(None) }
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() { Self::empty() } else { Self { kind: Kind::Full(Some(bytes)) } }
    }
}

impl Default for ReqBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for ReqBody {
    fn from(bytes: Bytes) -> Self {
        Self::full(bytes)
    }
}

impl From<&'static str> for ReqBody {
    fn from(value: &'static str) -> Self {
        Self::full(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for ReqBody {
    fn from(value: String) -> Self {
        Self::full(value)
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Connection(receiver) => Pin::new(receiver).poll_frame(cx),
            Kind::Full(bytes) => Poll::Ready(bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Connection(receiver) => receiver.is_end_stream(),
            Kind::Full(bytes) => bytes.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Connection(receiver) => receiver.size_hint(),
            Kind::Full(None) => SizeHint::with_exact(0),
            Kind::Full(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn full_body_yields_once() {
        let mut body = ReqBody::from("payload");
        assert_eq!(body.size_hint().exact(), Some(7));

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"payload"));
        assert!(body.is_end_stream());
        assert!(body.frame().await.is_none());
    }

    #[test]
    fn empty_bytes_make_an_empty_body() {
        let body = ReqBody::full(Bytes::new());
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
    }
}
