//! Request body streaming.
//!
//! The connection owns the framed reader, so the handler cannot read payload
//! chunks itself. Instead [`body_channel`] builds a pair:
//!
//! - a `BodySender` that borrows the payload stream and runs next to the handler
//! - a `BodyReceiver`, wrapped in [`ReqBody`], that asks for one chunk at a time
//!
//! Whatever the handler leaves unread is drained afterwards so the next request
//! on a keep-alive connection starts at a message boundary.

mod body_channel;
mod req_body;

pub(crate) use body_channel::BodySender;
pub(crate) use body_channel::body_channel;
pub use req_body::ReqBody;
