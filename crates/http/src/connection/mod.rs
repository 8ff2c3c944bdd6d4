//! The per-connection loop: read a request head, run the handler while the
//! body streams in, write the response, repeat.
//!
//! A connection ends when the peer closes it, when a request asks for
//! `Connection: close` (or is HTTP/1.0 without keep-alive), on any protocol
//! error, or when a `101 Switching Protocols` response hands the IO over to an
//! [`OnUpgrade`](crate::protocol::OnUpgrade).

mod http_connection;

pub use http_connection::HttpConnection;
