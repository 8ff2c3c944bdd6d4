use std::error::Error;
use std::fmt::Display;
use std::pin::pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::header::CONNECTION;
use http::{Method, Response, StatusCode, Version};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::body::{ReqBody, body_channel};
use crate::protocol::{
    HttpError, Message, OnUpgrade, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError, UpgradeSender,
    Upgraded, is_bodiless_status,
};

/// One HTTP/1.x connection over a reader/writer pair.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

/// What happens after a response has been written.
enum Flow {
    KeepAlive,
    Close,
    Upgrade(UpgradeSender),
}

/// How far a response got.
enum Sent {
    Complete,
    /// The peer closed or reset the connection before the body ended.
    PeerGone,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes>,
        <H::RespBody as Body>::Error: Display,
    {
        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Header((header, payload_size)))) => match self.do_process(header, payload_size, handler.as_ref()).await? {
                    Flow::KeepAlive => {}
                    Flow::Close => {
                        debug!("closing connection after response");
                        return Ok(());
                    }
                    Flow::Upgrade(sender) => {
                        self.upgrade(sender);
                        return Ok(());
                    }
                },

                Some(Ok(Message::Payload(_))) => {
                    error!("received payload while expecting a request head");
                    self.do_send_response(status_response(StatusCode::BAD_REQUEST), false).await?;
                    return Err(ParseError::invalid_body("payload received while expecting a request head").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't receive next request");
                    self.do_send_response(status_response(StatusCode::BAD_REQUEST), false).await?;
                    return Err(e.into());
                }

                None => {
                    info!("peer closed the connection");
                    return Ok(());
                }
            }
        }
    }

    async fn do_process<H>(&mut self, header: RequestHeader, payload_size: PayloadSize, handler: &H) -> Result<Flow, HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes>,
        <H::RespBody as Body>::Error: Display,
    {
        if header.expects_continue() && !payload_size.is_empty() {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::from)?;
            writer.flush().await.map_err(SendError::from)?;
            info!("receive expect request header, sent continue response");
        }

        let keep_alive = wants_keep_alive(&header);
        let head_only = header.method() == Method::HEAD;

        let (upgrade_sender, on_upgrade) = OnUpgrade::pair();
        let (mut body_sender, body_receiver) = body_channel(&mut self.framed_read, payload_size);
        let mut request = header.body(ReqBody::connection(body_receiver));
        request.extensions_mut().insert(on_upgrade);

        // the handler may wait on body chunks, so the body has to be served
        // while the handler runs
        let (response_result, body_ok) = {
            let handler_future = handler.call(request);
            let body_future = body_sender.serve();
            tokio::pin!(handler_future, body_future);

            let mut body_done = false;
            let mut body_ok = true;
            let response_result = loop {
                select! {
                    biased;
                    response = &mut handler_future => break response,
                    served = &mut body_future, if !body_done => {
                        body_done = true;
                        if let Err(e) = served {
                            warn!(cause = %e, "request body stream failed");
                            body_ok = false;
                        }
                    }
                }
            };
            (response_result, body_ok)
        };

        // the next request starts after this body, read or not
        let body_ok = body_ok && {
            match body_sender.drain().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(cause = %e, "can't skip unread request body");
                    false
                }
            }
        };
        drop(body_sender);

        let reusable = keep_alive && body_ok;
        match response_result {
            Ok(response) => {
                let flow = if response.status() == StatusCode::SWITCHING_PROTOCOLS {
                    Flow::Upgrade(upgrade_sender)
                } else if reusable {
                    Flow::KeepAlive
                } else {
                    Flow::Close
                };
                match self.do_send_response(response, head_only).await? {
                    Sent::Complete => Ok(flow),
                    Sent::PeerGone => Ok(Flow::Close),
                }
            }
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handler failed");
                self.do_send_response(status_response(StatusCode::INTERNAL_SERVER_ERROR), head_only).await?;
                Ok(if reusable { Flow::KeepAlive } else { Flow::Close })
            }
        }
    }

    /// Writes `response`. While the body has nothing to send, the read half
    /// is watched so a peer that went away drops the body instead of leaving
    /// it pending. `head_only` keeps the framing headers and skips the payload.
    async fn do_send_response<T>(&mut self, response: Response<T>, head_only: bool) -> Result<Sent, HttpError>
    where
        T: Body<Data = Bytes>,
        T::Error: Display,
    {
        let (parts, body) = response.into_parts();
        let mut body = pin!(body);

        let head = ResponseHead::from_parts(parts, ());
        let payload_size = if is_bodiless_status(head.status()) { PayloadSize::Empty } else { PayloadSize::from(body.size_hint()) };

        self.framed_write.feed(Message::<_, Bytes>::Header((head, payload_size))).await?;

        if head_only {
            self.framed_write.encoder_mut().skip_payload();
            SinkExt::<Message<(ResponseHead, PayloadSize), Bytes>>::flush(&mut self.framed_write).await?;
            return Ok(Sent::Complete);
        }

        let mut pipelined = BytesMut::new();
        if !payload_size.is_empty() {
            let mut watch_peer = true;
            loop {
                let frame = if watch_peer {
                    select! {
                        biased;
                        frame = body.frame() => frame,
                        read = self.framed_read.get_mut().read_buf(&mut pipelined) => match read {
                            Ok(0) => {
                                info!("peer closed the connection before the response ended");
                                return Ok(Sent::PeerGone);
                            }
                            Err(e) => {
                                info!(cause = %e, "peer failed before the response ended");
                                return Ok(Sent::PeerGone);
                            }
                            // the next request, kept for the decoder
                            Ok(_) => {
                                watch_peer = false;
                                continue;
                            }
                        }
                    }
                } else {
                    body.frame().await
                };

                let Some(frame) = frame else {
                    break;
                };
                let data = match frame {
                    // trailers are not sent
                    Ok(frame) => frame.into_data().ok(),
                    Err(e) => return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into()),
                };
                if let Some(data) = data {
                    self.framed_write.send(Message::<(ResponseHead, PayloadSize), _>::Payload(PayloadItem::Chunk(data))).await?;
                }
            }
        }

        self.framed_write.send(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof)).await?;
        if !pipelined.is_empty() {
            self.framed_read.read_buffer_mut().extend_from_slice(&pipelined);
        }
        Ok(Sent::Complete)
    }

    fn upgrade(mut self, sender: UpgradeSender) {
        let read_buf = self.framed_read.read_buffer_mut().split().freeze();
        let reader = self.framed_read.into_inner();
        let writer = self.framed_write.into_inner();

        debug!(buffered = read_buf.len(), "handing connection over to upgrade");
        if sender.send(Upgraded::new(read_buf, reader, writer)).is_err() {
            info!("nobody claimed the upgraded connection");
        }
    }
}

/// HTTP/1.1 keeps alive unless told to close; HTTP/1.0 only when asked.
fn wants_keep_alive(header: &RequestHeader) -> bool {
    let connection = header.headers().get(CONNECTION).map(|value| value.as_bytes());
    let has_token = |token: &[u8]| {
        connection.is_some_and(|value| value.split(|b| *b == b',').any(|part| part.trim_ascii().eq_ignore_ascii_case(token)))
    };

    match header.version() {
        Version::HTTP_10 => has_token(b"keep-alive"),
        _ => !has_token(b"close"),
    }
}

fn status_response(status: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use futures::stream;
    use http::Request;
    use http_body::Frame;
    use http_body_util::{Full, StreamBody};
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio_util::sync::CancellationToken;

    async fn serve<H>(handler: H) -> DuplexStream
    where
        H: Handler + 'static,
        H::Error: Send,
        H::RespBody: Body<Data = Bytes> + Send,
        <H::RespBody as Body>::Error: Display + Send,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        tokio::spawn(HttpConnection::new(reader, writer).process(Arc::new(handler)));
        client
    }

    async fn read_until(client: &mut DuplexStream, needle: &str) -> String {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&received).contains(needle) {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before {needle:?}, got {:?}", String::from_utf8_lossy(&received));
            received.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(received).unwrap()
    }

    async fn echo(request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, ParseError> {
        let body = request.into_body().collect().await?.to_bytes();
        Ok(Response::new(Full::new(body)))
    }

    #[tokio::test]
    async fn echoes_bodies_on_a_kept_alive_connection() {
        let mut client = serve(make_handler(echo)).await;

        client.write_all(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").await.unwrap();
        let first = read_until(&mut client, "hello").await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(first.contains("content-length: 5\r\n"));

        client.write_all(b"POST /b HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n").await.unwrap();
        let second = read_until(&mut client, "abc").await;
        assert!(second.contains("content-length: 3\r\n"));
    }

    #[tokio::test]
    async fn unread_body_is_skipped() {
        let handler = make_handler(|_request: Request<ReqBody>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"ignored"))))
        });
        let mut client = serve(handler).await;

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbodyGET /again HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let received = read_until(&mut client, "ignoredHTTP/1.1 200 OK").await;
        assert_eq!(received.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[tokio::test]
    async fn handler_error_becomes_500() {
        let handler = make_handler(|_request: Request<ReqBody>| async { Err::<Response<Empty<Bytes>>, _>("boom") });
        let mut client = serve(handler).await;

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let received = read_until(&mut client, "\r\n\r\n").await;
        assert!(received.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[tokio::test]
    async fn malformed_head_gets_400_and_close() {
        let mut client = serve(make_handler(echo)).await;

        client.write_all(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").await.unwrap();
        let received = read_until(&mut client, "\r\n\r\n").await;
        assert!(received.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn switching_protocols_hands_over_io() {
        let handler = make_handler(|request: Request<ReqBody>| async move {
            let on_upgrade = request.extensions().get::<OnUpgrade>().cloned().expect("on upgrade present");
            tokio::spawn(async move {
                let mut io = on_upgrade.upgraded().await.expect("upgraded");
                let mut buf = [0u8; 4];
                io.read_exact(&mut buf).await.unwrap();
                io.write_all(&buf).await.unwrap();
                io.flush().await.unwrap();
            });

            let mut response = Response::new(Empty::<Bytes>::new());
            *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            Ok::<_, Infallible>(response)
        });
        let mut client = serve(handler).await;

        client.write_all(b"GET /raw HTTP/1.1\r\nUpgrade: echo\r\nConnection: upgrade\r\n\r\nping").await.unwrap();
        let received = read_until(&mut client, "ping").await;
        assert!(received.starts_with("HTTP/1.1 101 Switching Protocols\r\n\r\nping"));
    }

    #[tokio::test]
    async fn head_answer_has_headers_only() {
        let handler = make_handler(|_request: Request<ReqBody>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"hello body"))))
        });
        let mut client = serve(handler).await;

        client.write_all(b"HEAD /a HTTP/1.1\r\n\r\nGET /a HTTP/1.1\r\n\r\n").await.unwrap();
        let received = read_until(&mut client, "hello body").await;

        let head = "HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\n";
        assert_eq!(received, format!("{head}{head}hello body"));
    }

    #[tokio::test]
    async fn pending_body_is_dropped_when_peer_leaves() {
        let dropped = CancellationToken::new();
        let token = dropped.clone();
        let handler = make_handler(move |_request: Request<ReqBody>| {
            let guard = token.clone().drop_guard();
            async move {
                let frames = stream::once(async { Ok::<_, Infallible>(Frame::data(Bytes::from_static(b"first"))) })
                    .chain(stream::pending())
                    .map(move |frame| {
                        let _held = &guard;
                        frame
                    });
                Ok::<_, Infallible>(Response::new(StreamBody::new(frames)))
            }
        });
        let mut client = serve(handler).await;

        client.write_all(b"GET /feed HTTP/1.1\r\n\r\n").await.unwrap();
        read_until(&mut client, "first").await;
        assert!(!dropped.is_cancelled());

        drop(client);
        tokio::time::timeout(Duration::from_secs(3), dropped.cancelled()).await.unwrap();
    }

    #[test]
    fn keep_alive_rules() {
        let header = |version: Version, connection: Option<&'static str>| {
            let mut request = Request::new(());
            *request.version_mut() = version;
            if let Some(value) = connection {
                request.headers_mut().insert(CONNECTION, http::HeaderValue::from_static(value));
            }
            RequestHeader::from(request)
        };

        assert!(wants_keep_alive(&header(Version::HTTP_11, None)));
        assert!(!wants_keep_alive(&header(Version::HTTP_11, Some("Close"))));
        assert!(!wants_keep_alive(&header(Version::HTTP_10, None)));
        assert!(wants_keep_alive(&header(Version::HTTP_10, Some("keep-alive"))));
    }
}
