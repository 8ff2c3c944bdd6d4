//! Duplex text sockets over the WebSocket protocol.
//!
//! After a valid handshake the request is answered with `101 Switching
//! Protocols`; the transport then hands over the raw connection and a
//! spawned task runs the socket:
//!
//! - a reader task forwards every inbound text frame to the handler's
//!   inbound channel and cancels the request's token when the client goes
//! - the route's duplex handler runs once and returns the outbound channel
//! - every outbound message is written as a text frame until that channel
//!   closes, then the socket is closed

use std::sync::Arc;

use courier_http::protocol::OnUpgrade;
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::body::ResponseBody;
use crate::dispatch::Shared;
use crate::error::Error;
use crate::log::Logger;
use crate::request::{Request, RequestContext};
use crate::route::DuplexHandler;

/// Whether the client asked to switch to a WebSocket.
pub(crate) fn wants_upgrade(ctx: &RequestContext<impl Sized>) -> bool {
    ctx.headers()
        .get_all(UPGRADE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("websocket"))
}

/// The `Sec-WebSocket-Accept` value for a valid handshake.
fn accept_key(headers: &HeaderMap) -> Result<HeaderValue, Error> {
    let key = headers.get(SEC_WEBSOCKET_KEY).ok_or_else(|| Error::internal("websocket handshake without key"))?;

    let version = headers.get(SEC_WEBSOCKET_VERSION).map(HeaderValue::as_bytes);
    if version != Some(b"13".as_slice()) {
        return Err(Error::internal("unsupported websocket version"));
    }

    HeaderValue::from_str(&derive_accept_key(key.as_bytes())).map_err(Error::internal)
}

/// Answers the handshake and starts the socket task.
///
/// The request has been through the middlewares already. A bad handshake is
/// delivered as `500` before any channel exists.
pub(crate) fn upgrade<S, B>(
    shared: &Shared<S>,
    handler: &Arc<DuplexHandler<S, B>>,
    mut request: Request<S, B>,
) -> Response<ResponseBody>
where
    S: Send + Sync + 'static,
    B: Send + 'static,
{
    let accept = match accept_key(request.headers()) {
        Ok(accept) => accept,
        Err(e) => return shared.fail(request.into_context(), e),
    };
    let Some(on_upgrade) = request.extensions().get::<OnUpgrade>().cloned() else {
        return shared.fail(request.into_context(), Error::internal("connection can't be upgraded"));
    };

    // the reader task cancels the token, not the end of this request
    if let Some(guard) = request.take_cancel_guard() {
        let _ = guard.disarm();
    }

    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    *headers = request.take_response_headers();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);

    shared.log_access(&request, StatusCode::SWITCHING_PROTOCOLS);

    let handler = Arc::clone(handler);
    let logger = Arc::clone(&shared.logger);
    let buffer = shared.config.event_stream_buffer;
    tokio::spawn(run_socket(on_upgrade, handler, logger, buffer, request));

    response
}

async fn run_socket<S, B>(
    on_upgrade: OnUpgrade,
    handler: Arc<DuplexHandler<S, B>>,
    logger: Arc<dyn Logger>,
    buffer: usize,
    request: Request<S, B>,
) where
    S: Send + Sync + 'static,
    B: Send + 'static,
{
    let log_ctx = request.log_context();
    let token = request.cancellation().clone();

    let io = match on_upgrade.upgraded().await {
        Ok(io) => io,
        Err(e) => {
            logger.log_error(&log_ctx, &Error::internal(e));
            token.cancel();
            return;
        }
    };

    let socket = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
    let (mut sink, mut source) = socket.split();

    let (inbound_sender, inbound) = mpsc::channel(buffer.max(1));
    let reader_logger = Arc::clone(&logger);
    let reader_ctx = log_ctx.clone();
    let reader_token = token.clone();
    tokio::spawn(async move {
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    if inbound_sender.send(text.as_str().to_owned()).await.is_err() {
                        reader_logger.log_message(&reader_ctx, "duplex handler stopped reading");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    reader_logger.log_message(&reader_ctx, "socket closed by client");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    reader_logger.log_error(&reader_ctx, &Error::internal(e));
                    break;
                }
            }
        }
        drop(inbound_sender);
        reader_token.cancel();
    });

    let mut outbound = handler(request, inbound);
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(Message::text(message)).await {
            logger.log_error(&log_ctx, &Error::internal(e));
            return;
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        logger.log_message(&log_ctx, &format!("failed to close socket: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(key: Option<&'static str>, version: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        if let Some(key) = key {
            headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static(key));
        }
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(version));
        headers
    }

    #[test]
    fn accept_key_from_rfc_example() {
        let accept = accept_key(&handshake(Some("dGhlIHNhbXBsZSBub25jZQ=="), "13")).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn bad_handshakes_are_internal_errors() {
        let missing_key = accept_key(&handshake(None, "13")).unwrap_err();
        assert_eq!(missing_key.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let old_version = accept_key(&handshake(Some("dGhlIHNhbXBsZSBub25jZQ=="), "8")).unwrap_err();
        assert_eq!(old_version.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
