use std::io;
use thiserror::Error;

/// Anything that ends a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    Request {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    Response {
        #[from]
        source: SendError,
    },
}

/// Failures while reading a request off the wire.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header section is {current_size} bytes, limit is {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("more than {max_num} headers")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unsupported http version 1.{0}")]
    UnsupportedVersion(u8),

    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid chunked encoding: {reason}")]
    InvalidChunk { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_request_line<S: ToString>(str: S) -> Self {
        Self::InvalidRequestLine { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(str: S) -> Self {
        Self::InvalidChunk { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }
}

/// Failures while writing a response.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("invalid message order: {reason}")]
    InvalidState { reason: &'static str },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_state(reason: &'static str) -> Self {
        Self::InvalidState { reason }
    }
}
