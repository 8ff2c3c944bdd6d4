use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use tracing::{error, trace};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

type PayloadResult = Result<PayloadItem, ParseError>;

pub(crate) fn body_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (BodySender<'_, S>, BodyReceiver)
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    let (demand_sender, demand_receiver) = mpsc::channel(1);
    let (data_sender, data_receiver) = mpsc::channel(1);

    // even an empty payload ends with an Eof item that has to be consumed
    let sender = BodySender { payload_stream, demand_receiver, data_sender, eof: false };
    let receiver = BodyReceiver { demand_sender, data_receiver, payload_size, in_flight: false };
    (sender, receiver)
}

/// Reads payload items off the connection on demand.
pub(crate) struct BodySender<'conn, S> {
    payload_stream: &'conn mut S,
    demand_receiver: mpsc::Receiver<()>,
    data_sender: mpsc::Sender<PayloadResult>,
    eof: bool,
}

impl<S> BodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    /// Serves chunk requests until the receiver is dropped or the payload ends.
    pub(crate) async fn serve(&mut self) -> Result<(), ParseError> {
        while !self.eof {
            if self.demand_receiver.next().await.is_none() {
                // receiver dropped, nobody wants the rest
                return Ok(());
            }

            let item = self.read_item().await;
            let failed = item.is_err();
            if let Ok(payload_item) = &item {
                self.eof = payload_item.is_eof();
            }

            if self.data_sender.send(item).await.is_err() {
                trace!("body receiver dropped while a chunk was in flight");
                return Ok(());
            }

            if failed {
                return Err(ParseError::invalid_body("payload stream failed"));
            }
        }
        Ok(())
    }

    /// Consumes and discards the rest of the payload.
    pub(crate) async fn drain(&mut self) -> Result<(), ParseError> {
        let mut skipped = 0usize;
        while !self.eof {
            match self.read_item().await? {
                PayloadItem::Chunk(bytes) => skipped += bytes.len(),
                PayloadItem::Eof => self.eof = true,
            }
        }
        if skipped > 0 {
            trace!(size = skipped, "skipped unread request body");
        }
        Ok(())
    }

    async fn read_item(&mut self) -> PayloadResult {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
            Some(Ok(Message::Header(_))) => {
                error!("received a request head while reading a body");
                Err(ParseError::invalid_body("received a request head while reading a body"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::invalid_body("connection closed before the body ended")),
        }
    }
}

/// Pulls chunks from a [`BodySender`], one outstanding request at a time.
#[derive(Debug)]
pub(crate) struct BodyReceiver {
    demand_sender: mpsc::Sender<()>,
    data_receiver: mpsc::Receiver<PayloadResult>,
    payload_size: PayloadSize,
    in_flight: bool,
}

impl Body for BodyReceiver {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.payload_size.is_empty() {
            return Poll::Ready(None);
        }

        if !this.in_flight {
            match Pin::new(&mut this.demand_sender).poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if Pin::new(&mut this.demand_sender).start_send(()).is_err() {
                        return Poll::Ready(Some(Err(ParseError::invalid_body("body sender is gone"))));
                    }
                    this.in_flight = true;
                }
                Poll::Ready(Err(_disconnected)) => {
                    return Poll::Ready(Some(Err(ParseError::invalid_body("body sender is gone"))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.data_receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(PayloadItem::Chunk(bytes)))) => {
                this.in_flight = false;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(Ok(PayloadItem::Eof))) => {
                this.in_flight = false;
                this.payload_size = PayloadSize::Empty;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.in_flight = false;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.in_flight = false;
                Poll::Ready(Some(Err(ParseError::invalid_body("body channel closed before eof"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.payload_size.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::BodyExt;

    type Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>;

    fn payload(chunks: &[&'static [u8]]) -> impl Stream<Item = Item> + Unpin {
        let mut items: Vec<Item> =
            chunks.iter().map(|chunk| Ok(Message::Payload(PayloadItem::Chunk(Bytes::from_static(chunk))))).collect();
        items.push(Ok(Message::Payload(PayloadItem::Eof)));
        stream::iter(items)
    }

    #[tokio::test]
    async fn streams_chunks_on_demand() {
        let mut stream = payload(&[b"hello ", b"world"]);
        let (mut sender, receiver) = body_channel(&mut stream, PayloadSize::Length(11));

        let (served, collected) = tokio::join!(sender.serve(), receiver.collect());

        assert!(served.is_ok());
        assert_eq!(collected.unwrap().to_bytes(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn drain_skips_what_the_handler_left() {
        let mut stream = payload(&[b"unread", b"bytes"]);
        let (mut sender, receiver) = body_channel(&mut stream, PayloadSize::Chunked);
        drop(receiver);

        sender.serve().await.unwrap();
        sender.drain().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn empty_payload_still_consumes_eof() {
        let mut stream = payload(&[]);
        let (mut sender, mut receiver) = body_channel(&mut stream, PayloadSize::Empty);

        assert!(receiver.is_end_stream());
        assert!(receiver.frame().await.is_none());
        sender.drain().await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
