//! Server-sent events.
//!
//! A route's event-stream producer gets the request and returns an
//! [`EventStream`]; whatever it pushes through the paired [`EventEmitter`] is
//! written to the client as one `text/event-stream` frame per event. The
//! stream ends when the emitter is dropped.
//!
//! Producers should watch [`RequestContext::cancellation`](crate::RequestContext::cancellation):
//! it fires when the client goes away.

use std::fmt::Write as _;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use courier_http::protocol::HttpError;
use futures::channel::mpsc::{self, SendError};
use futures::{SinkExt, Stream, StreamExt};
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::StreamBody;
use tokio_util::sync::DropGuard;

use crate::body::ResponseBody;
use crate::decode::{BodyParsers, DecodeBody, read_body};
use crate::dispatch::{RequestBody, Shared};
use crate::negotiate::accepts;
use crate::request::{Request, RequestContext};
use crate::route::EventProducer;

/// One event on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub id: Option<String>,
    pub name: Option<String>,
    pub data: String,
    pub retry: Option<Duration>,
}

impl Event {
    pub fn data(data: impl Into<String>) -> Self {
        Self { data: data.into(), ..Self::default() }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// The event's `text/event-stream` framing, blank line included.
    pub fn to_bytes(&self) -> Bytes {
        let mut frame = String::with_capacity(self.data.len() + 16);

        if let Some(id) = &self.id {
            let _ = writeln!(frame, "id: {id}");
        }
        if let Some(name) = &self.name {
            let _ = writeln!(frame, "event: {name}");
        }
        if let Some(retry) = self.retry {
            let _ = writeln!(frame, "retry: {}", retry.as_millis());
        }
        if self.data.is_empty() {
            frame.push_str("data: \n");
        }
        for line in self.data.lines() {
            let _ = writeln!(frame, "data: {line}");
        }
        frame.push('\n');

        Bytes::from(frame)
    }
}

/// Values a producer can push.
pub trait IntoEvent {
    fn into_event(self) -> Event;
}

impl IntoEvent for Event {
    fn into_event(self) -> Event {
        self
    }
}

impl IntoEvent for String {
    fn into_event(self) -> Event {
        Event::data(self)
    }
}

impl IntoEvent for &'static str {
    fn into_event(self) -> Event {
        Event::data(self)
    }
}

macro_rules! numeric_events {
    ($($ty:ty),*) => {
        $(
            impl IntoEvent for $ty {
                fn into_event(self) -> Event {
                    Event::data(self.to_string())
                }
            }
        )*
    };
}

numeric_events!(i32, i64, u32, u64, usize);

/// The producing half of an event stream.
#[derive(Debug)]
pub struct EventEmitter<E> {
    sender: mpsc::Sender<E>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone() }
    }
}

impl<E> EventEmitter<E> {
    /// Waits for buffer space; fails once the client side is gone.
    pub async fn send(&mut self, event: E) -> Result<(), SendError> {
        self.sender.send(event).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn close(&mut self) -> Result<(), SendError> {
        self.sender.close().await
    }
}

/// The consuming half, returned from a route's event-stream producer.
#[derive(Debug)]
pub struct EventStream<E> {
    receiver: mpsc::Receiver<E>,
}

/// A bounded channel of events.
pub fn event_channel<E>(buffer: usize) -> (EventEmitter<E>, EventStream<E>) {
    let (sender, receiver) = mpsc::channel(buffer);
    (EventEmitter { sender }, EventStream { receiver })
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl<E: IntoEvent + Send + 'static> EventStream<E> {
    pub(crate) fn into_body(self) -> ResponseBody {
        let frames = self.map(|event| Ok::<_, HttpError>(Frame::data(event.into_event().to_bytes())));
        ResponseBody::stream(StreamBody::new(frames))
    }
}

/// Holds the request's cancel guard for as long as the client reads.
struct Guarded {
    inner: ResponseBody,
    _guard: Option<DropGuard>,
}

impl Body for Guarded {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, HttpError>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Whether the client asked for an event stream.
pub(crate) fn wants_event_stream(ctx: &RequestContext<impl Sized>) -> bool {
    ctx.headers()
        .get_all(http::header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| accepts(value, "text/event-stream"))
}

/// Decodes the body once, runs the producer and streams its events.
///
/// Middlewares do not run here, the session is not saved and the stream is
/// never compressed.
pub(crate) async fn serve_event_stream<S, B>(
    shared: &Shared<S>,
    producer: &EventProducer<S, B>,
    parsers: &BodyParsers<B>,
    mut ctx: RequestContext<S>,
    body: RequestBody,
) -> Response<ResponseBody>
where
    S: Send + Sync + 'static,
    B: DecodeBody,
{
    let body = match read_body(&mut ctx, body, parsers, &shared.config).await {
        Ok(body) => body,
        Err(e) => return shared.fail(ctx, e),
    };

    let mut request = Request::new(ctx, body);
    let events = producer(&mut request);
    let mut ctx = request.into_context();

    let guard = ctx.take_cancel_guard();
    let mut response = Response::new(ResponseBody::stream(Guarded { inner: events, _guard: guard }));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    *headers = ctx.take_response_headers();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    shared.log_access(&ctx, StatusCode::OK);
    response
}
