//! Protocol level types shared by the codecs and the connection loop.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: what the codecs produce and consume
//! - [`RequestHeader`], [`ResponseHead`]: message heads without bodies
//! - [`body`]: the streaming request body handed to handlers
//! - [`OnUpgrade`], [`Upgraded`]: raw IO hand-off after `101 Switching Protocols`
//! - [`HttpError`], [`ParseError`], [`SendError`], [`UpgradeError`]: failures

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;
pub(crate) use response::is_bodiless_status;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

mod upgrade;
pub use upgrade::OnUpgrade;
pub use upgrade::UpgradeError;
pub use upgrade::Upgraded;
pub(crate) use upgrade::UpgradeSender;

pub mod body;
