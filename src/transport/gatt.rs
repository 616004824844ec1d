//! BLE transport over a GATT characteristic pair.
//!
//! The platform BLE stack is reached through a [`GattLink`]: one
//! characteristic for writes, one notification stream for reads. Writes
//! larger than the negotiated MTU are split into consecutive chunks.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::{Error, LinkError, LinkErrorKind, Result};
use crate::protocol::encode_frame;
use crate::transport::{ByteFeed, Transport};
use crate::types::{DeviceIdentity, DeviceType};

/// Default write payload size (ATT MTU 23 minus 3 bytes of header).
pub const DEFAULT_GATT_CHUNK: usize = 20;

/// Platform GATT collaborator for one peripheral.
pub trait GattLink: Send + Sync {
    /// Connects, discovers the reader service and subscribes to
    /// notifications. A notification failure is sent as a `ReadValue`
    /// item before the feed closes.
    fn connect<'a>(&'a mut self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<ByteFeed>>;

    /// Writes one chunk to the write characteristic.
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Disconnects from the peripheral.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Largest payload accepted by a single write.
    fn max_write_len(&self) -> usize {
        DEFAULT_GATT_CHUNK
    }
}

/// Transport for BLE readers.
pub struct GattTransport<L> {
    link: L,
    connected: bool,
}

impl<L: GattLink> GattTransport<L> {
    /// Creates a transport over the given link.
    #[must_use]
    pub const fn new(link: L) -> Self {
        Self {
            link,
            connected: false,
        }
    }

    /// Returns the underlying link.
    #[must_use]
    pub const fn link(&self) -> &L {
        &self.link
    }
}

impl<L: GattLink> Transport for GattTransport<L> {
    fn connect<'a>(&'a mut self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<ByteFeed>> {
        Box::pin(async move {
            if device.device_type != DeviceType::Ble {
                return Err(Error::Link(LinkError::new(
                    LinkErrorKind::ConnectFailed,
                    format!("{device} is not a BLE peripheral"),
                )));
            }
            if self.connected {
                self.disconnect().await?;
            }
            let feed = self.link.connect(device).await?;
            self.connected = true;
            tracing::info!("GATT link up for {}", device);
            Ok(feed)
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.connected {
                return Ok(());
            }
            self.connected = false;
            self.link.disconnect().await.map_err(|e| {
                Error::Link(LinkError::new(LinkErrorKind::DisconnectFailed, e.to_string()))
            })
        })
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            let mut frame = encode_frame(&data)?;
            let chunk = self.link.max_write_len().max(1);
            tracing::trace!("sending frame: {} bytes in {}-byte writes", frame.len(), chunk);
            while !frame.is_empty() {
                let part = frame.split_to(chunk.min(frame.len()));
                self.link.write(part).await?;
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::FeedItem;
    use crate::types::DeviceSubtype;

    #[derive(Default)]
    struct RecordingLink {
        writes: Arc<Mutex<Vec<Bytes>>>,
        notify: Option<mpsc::Sender<FeedItem>>,
    }

    impl GattLink for RecordingLink {
        fn connect<'a>(&'a mut self, _device: &'a DeviceIdentity) -> BoxFuture<'a, Result<ByteFeed>> {
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(8);
                self.notify = Some(tx);
                Ok(rx)
            })
        }

        fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
            self.writes.lock().unwrap().push(chunk);
            Box::pin(async { Ok(()) })
        }

        fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
            self.notify = None;
            Box::pin(async { Ok(()) })
        }

        fn max_write_len(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_writes_are_chunked() {
        let link = RecordingLink::default();
        let writes = Arc::clone(&link.writes);
        let mut transport = GattTransport::new(link);
        let device = DeviceIdentity::ble("peripheral-1", "KDC475", "AA:BB");
        let _feed = transport.connect(&device).await.unwrap();

        transport
            .send(Bytes::from_static(&[0x31, 3, 0, 2, 4, 0, 0]))
            .await
            .unwrap();

        let writes = writes.lock().unwrap();
        let lens: Vec<usize> = writes.iter().map(Bytes::len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        let joined: Vec<u8> = writes.iter().flat_map(|b| b.iter().copied()).collect();
        assert_eq!(&joined[..3], &[0x3c, 0x07, 0x00]);
    }

    #[tokio::test]
    async fn test_rejects_non_ble_identity() {
        let mut transport = GattTransport::new(RecordingLink::default());
        let device = DeviceIdentity::serial("/dev/rfcomm0", DeviceSubtype::Spp, "KDC");
        assert!(transport.connect(&device).await.is_err());
        assert!(!transport.is_connected());
    }
}
