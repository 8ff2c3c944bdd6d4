//! Raw IO hand-off after a `101 Switching Protocols` response.
//!
//! The connection inserts an [`OnUpgrade`] into every request's extensions and
//! keeps the matching sender. When the response status is 101 the connection
//! stops speaking HTTP and sends an [`Upgraded`] through it.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures::channel::oneshot;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub(crate) type UpgradeSender = oneshot::Sender<Upgraded>;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("connection was not upgraded")]
    Canceled,

    #[error("upgrade has already been claimed")]
    AlreadyClaimed,
}

/// The future side of an upgrade, found in `Request::extensions()`.
///
/// Cloning shares the same underlying receiver; only the first call to
/// [`OnUpgrade::upgraded`] obtains the IO.
#[derive(Clone)]
pub struct OnUpgrade {
    receiver: Arc<Mutex<Option<oneshot::Receiver<Upgraded>>>>,
}

impl OnUpgrade {
    pub(crate) fn pair() -> (UpgradeSender, OnUpgrade) {
        let (sender, receiver) = oneshot::channel();
        (sender, OnUpgrade { receiver: Arc::new(Mutex::new(Some(receiver))) })
    }

    /// Waits until the connection hands over its IO.
    ///
    /// Resolves with [`UpgradeError::Canceled`] if the response was not a 101 or
    /// the connection went away first.
    pub async fn upgraded(self) -> Result<Upgraded, UpgradeError> {
        let receiver = {
            let mut guard = match self.receiver.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };

        match receiver {
            Some(receiver) => receiver.await.map_err(|_canceled| UpgradeError::Canceled),
            None => Err(UpgradeError::AlreadyClaimed),
        }
    }
}

impl fmt::Debug for OnUpgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnUpgrade").finish_non_exhaustive()
    }
}

/// The connection's IO after the upgrade.
///
/// Bytes the client sent right after the request head (already sitting in the
/// read buffer) are yielded before anything read from the socket.
pub struct Upgraded {
    read_buf: Bytes,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Upgraded {
    pub(crate) fn new<R, W>(read_buf: Bytes, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { read_buf, reader: Box::new(reader), writer: Box::new(writer) }
    }
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded").field("buffered", &self.read_buf.len()).finish_non_exhaustive()
    }
}

impl AsyncRead for Upgraded {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.read_buf.has_remaining() {
            let len = this.read_buf.len().min(buf.remaining());
            buf.put_slice(&this.read_buf[..len]);
            this.read_buf.advance(len);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for Upgraded {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }

    fn poll_write_vectored(self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.writer.is_write_vectored()
    }
}
