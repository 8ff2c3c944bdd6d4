//! The `Date` response header.
//!
//! Formatting an HTTP date on every response is wasteful, so a background task
//! refreshes a shared copy a little more often than once a second.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::header::DATE;
use http::{HeaderMap, HeaderValue};
use tokio::task::JoinHandle;

const UPDATE_INTERVAL: Duration = Duration::from_millis(800);

/// Keeps the current HTTP date string.
///
/// Must be created inside a tokio runtime; the refresh task is aborted on drop.
#[derive(Debug)]
pub(crate) struct DateService {
    current: Arc<ArcSwap<Bytes>>,
    handle: JoinHandle<()>,
}

fn now() -> Bytes {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    Bytes::from_owner(buf)
}

impl DateService {
    pub(crate) fn new() -> Self {
        Self::with_update_interval(UPDATE_INTERVAL)
    }

    fn with_update_interval(update_interval: Duration) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(now()));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(update_interval).await;
                current_arc.store(Arc::new(now()));
            }
        });

        DateService { current, handle }
    }

    /// Sets `Date` unless the headers already carry one.
    pub(crate) fn insert_date(&self, headers: &mut HeaderMap) {
        if headers.contains_key(DATE) {
            return;
        }
        let date = self.current.load().as_ref().clone();
        if let Ok(value) = HeaderValue::from_maybe_shared(date) {
            headers.insert(DATE, value);
        }
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
