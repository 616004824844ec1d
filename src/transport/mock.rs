//! In-process transport used by unit tests.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{Mutex, mpsc};

use crate::error::{Error, Result};
use crate::transport::{ByteFeed, SharedTransport, Transport};
use crate::types::DeviceIdentity;

/// Records every sent payload (unframed).
pub(crate) struct MockTransport {
    connected: bool,
    sent: mpsc::UnboundedSender<Bytes>,
}

impl Transport for MockTransport {
    fn connect<'a>(&'a mut self, _device: &'a DeviceIdentity) -> BoxFuture<'a, Result<ByteFeed>> {
        Box::pin(async move {
            self.connected = true;
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.connected = false;
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            self.sent.send(data).map_err(|_| Error::ChannelClosed)
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Returns a connected mock transport and the receiver of sent payloads.
pub(crate) fn connected() -> (SharedTransport, mpsc::UnboundedReceiver<Bytes>) {
    let (sent, rx) = mpsc::unbounded_channel();
    let transport: Box<dyn Transport> = Box::new(MockTransport {
        connected: true,
        sent,
    });
    (Arc::new(Mutex::new(transport)), rx)
}

/// Stream whose reads and writes fail, as a reset serial link does.
pub(crate) struct BrokenStream;

impl AsyncRead for BrokenStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset",
        )))
    }
}

impl AsyncWrite for BrokenStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
