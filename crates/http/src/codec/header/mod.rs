//! Request head parsing and response head serialization.
//!
//! Limits enforced while decoding: at most 64 headers and 8KB for the whole
//! head section.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
