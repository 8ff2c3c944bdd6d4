//! The logging contract the engine reports through.
//!
//! [`TracingLogger`] forwards everything to `tracing`; embed a different
//! [`Logger`] with `ServerBuilder::logger` to ship access records elsewhere.

use std::fmt;
use std::time::Duration;

use http::{Method, StatusCode};
use tracing::{debug, error, info, warn};

use crate::error::Error;

/// One finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    /// Request body bytes read.
    pub request_bytes: u64,
    /// Response body bytes before compression.
    pub response_bytes: u64,
    pub elapsed: Duration,
}

/// Which request a log line belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub method: Method,
    pub path: String,
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Logger: Send + Sync {
    fn log_request(&self, record: &AccessRecord);

    fn log_error(&self, ctx: &LogContext, error: &Error);

    fn log_panic(&self, ctx: &LogContext, message: &str);

    fn log_message(&self, ctx: &LogContext, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_request(&self, record: &AccessRecord) {
        info!(
            method = %record.method,
            path = %record.path,
            status = record.status.as_u16(),
            request_bytes = record.request_bytes,
            response_bytes = record.response_bytes,
            elapsed_us = u64::try_from(record.elapsed.as_micros()).unwrap_or(u64::MAX),
            "request served"
        );
    }

    fn log_error(&self, ctx: &LogContext, error: &Error) {
        if error.status().is_server_error() {
            error!(request = %ctx, cause = %error, "request failed");
        } else {
            warn!(request = %ctx, cause = %error, "request rejected");
        }
    }

    fn log_panic(&self, ctx: &LogContext, message: &str) {
        error!(request = %ctx, panic = message, "handler panicked");
    }

    fn log_message(&self, ctx: &LogContext, message: &str) {
        debug!(request = %ctx, "{message}");
    }
}
