use serde::Deserialize;

use crate::negotiate::ContentEncoding;

/// Limits and names the engine works with.
///
/// Every field has a default, so a partial document (or none at all) can be
/// deserialized from whatever format the embedding application uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest request body read before answering 413.
    pub max_body_bytes: usize,
    /// Largest multipart body, all parts included.
    pub multipart_max_bytes: u64,
    /// Name of the cookie the session token is written to. Keep it equal to
    /// the cookie name the session store reads.
    pub session_cookie: String,
    pub session_max_age_secs: u64,
    /// Inbound socket messages buffered before the reader has to wait.
    pub event_stream_buffer: usize,
    /// Also answer `Accept-Encoding: zstd`. Off, only gzip, deflate and br
    /// are negotiated.
    pub compress_with_zstd: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 16 << 20,
            multipart_max_bytes: 10 << 20,
            session_cookie: String::from("session_token"),
            session_max_age_secs: 86_400,
            event_stream_buffer: 16,
            compress_with_zstd: false,
        }
    }
}

const WITH_ZSTD: [ContentEncoding; 4] =
    [ContentEncoding::Gzip, ContentEncoding::Deflate, ContentEncoding::Br, ContentEncoding::Zstd];

impl ServerConfig {
    /// The codings response compression may pick from.
    pub fn encodings(&self) -> &'static [ContentEncoding] {
        if self.compress_with_zstd { &WITH_ZSTD } else { &ContentEncoding::STANDARD }
    }
}
