//! HTTP/1.1 transport for the courier dispatch engine
//!
//! This crate turns a pair of async byte streams into a sequence of
//! `http::Request`s handed to a [`handler::Handler`], and writes the returned
//! `http::Response`s back. It knows nothing about routing, content negotiation
//! or sessions; those live in `courier-web`.
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use courier_http::connection::HttpConnection;
//! use courier_http::handler::make_handler;
//! use courier_http::protocol::body::ReqBody;
//! use http::{Request, Response};
//! use http_body_util::BodyExt;
//! use tokio::net::TcpListener;
//! use tracing::{error, warn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(listener) => listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(echo));
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match listener.accept().await {
//!             Ok(accepted) => accepted,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = Arc::clone(&handler);
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             if let Err(e) = HttpConnection::new(reader, writer).process(handler).await {
//!                 error!(cause = %e, "connection closed with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn echo(request: Request<ReqBody>) -> Result<Response<String>, Box<dyn Error + Send + Sync>> {
//!     let body = request.into_body().collect().await?.to_bytes();
//!     Ok(Response::new(String::from_utf8_lossy(&body).into_owned()))
//! }
//! ```
//!
//! # Architecture
//!
//! - [`codec`]: `tokio_util` codecs for request heads, payloads and responses
//! - [`protocol`]: message types, request body streaming, errors and the upgrade hand-off
//! - [`connection`]: the per-connection read/dispatch/write loop
//! - [`handler`]: the trait the connection dispatches to
//!
//! # Protocol upgrades
//!
//! Every request carries a [`protocol::OnUpgrade`] in its extensions. When the
//! handler answers `101 Switching Protocols`, the connection stops reading
//! HTTP, flushes the response head and hands the raw IO (including any bytes
//! already buffered) to whoever awaits the `OnUpgrade`.
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - No TLS
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
