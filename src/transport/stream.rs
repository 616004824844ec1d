//! Transport over any async byte stream.
//!
//! External-accessory sessions, RFCOMM sockets and in-memory pipes all look
//! the same once opened: an `AsyncRead + AsyncWrite` stream. A
//! [`StreamConnector`] opens that stream for a device identity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;

use crate::error::{Error, LinkError, LinkErrorKind, Result};
use crate::transport::{ByteFeed, Transport, spawn_reader, write_frame};
use crate::types::DeviceIdentity;

/// Opens a byte stream to a device.
pub trait StreamConnector: Send + Sync {
    /// Stream type produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Opens a stream to the device.
    fn open<'a>(&'a self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<Self::Stream>>;
}

/// Connector handing out pre-opened streams in order.
///
/// Each connect takes the next stream; an empty queue fails the connect.
pub struct QueuedConnector<S> {
    streams: StdMutex<VecDeque<S>>,
}

impl<S> Default for QueuedConnector<S> {
    fn default() -> Self {
        Self {
            streams: StdMutex::new(VecDeque::new()),
        }
    }
}

impl<S> QueuedConnector<S> {
    /// Creates a connector with the given streams.
    #[must_use]
    pub fn new(streams: impl IntoIterator<Item = S>) -> Self {
        Self {
            streams: StdMutex::new(streams.into_iter().collect()),
        }
    }

    /// Queues another stream.
    pub fn push(&self, stream: S) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.push_back(stream);
        }
    }
}

impl<S> StreamConnector for QueuedConnector<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Stream = S;

    fn open<'a>(&'a self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<S>> {
        let next = self.streams.lock().ok().and_then(|mut s| s.pop_front());
        Box::pin(async move {
            next.ok_or_else(|| {
                Error::Link(LinkError::new(
                    LinkErrorKind::ConnectFailed,
                    format!("no stream available for {device}"),
                ))
            })
        })
    }
}

impl<C: StreamConnector> StreamConnector for Arc<C> {
    type Stream = C::Stream;

    fn open<'a>(&'a self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<Self::Stream>> {
        (**self).open(device)
    }
}

/// Transport over a stream opened by a [`StreamConnector`].
pub struct StreamTransport<C: StreamConnector> {
    connector: C,
    writer: Option<WriteHalf<C::Stream>>,
    read_task: Option<JoinHandle<()>>,
}

impl<C: StreamConnector> StreamTransport<C> {
    /// Creates a transport using the given connector.
    #[must_use]
    pub const fn new(connector: C) -> Self {
        Self {
            connector,
            writer: None,
            read_task: None,
        }
    }

    /// Returns the connector.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: StreamConnector> Transport for StreamTransport<C>
where
    C::Stream: Sync,
{
    fn connect<'a>(&'a mut self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<ByteFeed>> {
        Box::pin(async move {
            if self.writer.is_some() {
                self.disconnect().await?;
            }

            let stream = self.connector.open(device).await?;
            let (reader, writer) = tokio::io::split(stream);
            let (feed, task) = spawn_reader(reader, device.id.to_string());
            self.writer = Some(writer);
            self.read_task = Some(task);

            tracing::info!("stream open for {}", device);
            Ok(feed)
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(task) = self.read_task.take() {
                task.abort();
            }
            if let Some(mut writer) = self.writer.take() {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!("stream shutdown: {}", e);
                }
                tracing::info!("stream closed");
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
            write_frame(writer, &data).await
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}
