use http::{Response, StatusCode};

/// A response head before its body is attached.
pub type ResponseHead = Response<()>;

/// Statuses whose responses never carry a body nor framing headers (RFC 9110 §8.6).
#[inline]
pub(crate) fn is_bodiless_status(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}
