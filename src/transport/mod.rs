//! Transport layer for KDC reader communication.
//!
//! A transport opens a byte-stream channel to one device and hands back a
//! [`ByteFeed`] of raw chunks exactly as they arrive. Framing of outgoing
//! payloads is done by the transport; incoming bytes are decoded by the
//! reader. The feed ending means the link dropped; a read failure is sent
//! as the last item before it ends.
//!
//! - [`SerialTransport`] for Bluetooth SPP and USB CDC serial ports
//! - [`StreamTransport`] for any async byte stream (accessory sessions,
//!   sockets, in-memory pipes)
//! - [`GattTransport`] for BLE peripherals behind a [`GattLink`]

pub mod gatt;
#[cfg(test)]
pub(crate) mod mock;
pub mod serial;
pub mod stream;

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{LinkError, LinkErrorKind, Result};
use crate::types::DeviceIdentity;

/// One read from a device: raw bytes, or the failure that ended the link.
pub type FeedItem = std::result::Result<Bytes, LinkError>;

/// Raw byte chunks received from a device.
pub type ByteFeed = mpsc::Receiver<FeedItem>;

/// Transport shared by the reader and its command path.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Capacity of the feed channel between a reader task and the supervisor.
pub const FEED_CAPACITY: usize = 256;

/// Size of each read from the underlying stream.
const READ_CHUNK: usize = 1024;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the link to the device and returns its byte feed.
    fn connect<'a>(&'a mut self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<ByteFeed>>;

    /// Closes the link.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Frames and sends a payload to the device.
    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

/// Spawns a task that forwards everything read from `reader` into a feed.
///
/// The feed closes when the stream reports end-of-file or an error, or
/// when the returned task is aborted. A read error is forwarded as
/// `LinkErrorKind::ReadValue` before the feed closes.
pub(crate) fn spawn_reader<R>(mut reader: R, label: String) -> (ByteFeed, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    let task = tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("{}: stream closed", label);
                    break;
                }
                Ok(n) => {
                    tracing::trace!("{}: received {} bytes", label, n);
                    if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                        tracing::debug!("{}: feed receiver dropped", label);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("{}: read error: {}", label, e);
                    let _ = tx
                        .send(Err(LinkError::new(LinkErrorKind::ReadValue, e.to_string())))
                        .await;
                    break;
                }
            }
        }
    });
    (rx, task)
}

/// Frames `payload` and writes it out; write and flush failures are
/// `LinkErrorKind::WriteValue`.
pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = crate::protocol::encode_frame(payload)?;
    tracing::trace!("sending frame: {} bytes", frame.len());
    let write_failed = |e: std::io::Error| LinkError::new(LinkErrorKind::WriteValue, e.to_string());
    writer.write_all(&frame).await.map_err(write_failed)?;
    writer.flush().await.map_err(write_failed)?;
    Ok(())
}

pub use gatt::{GattLink, GattTransport};
pub use serial::{SerialConfig, SerialTransport};
pub use stream::{QueuedConnector, StreamConnector, StreamTransport};
