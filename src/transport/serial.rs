//! Serial transport for readers on Bluetooth SPP or USB CDC ports.
//!
//! The device identity's address is the port path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::error::{Error, Result};
use crate::transport::{ByteFeed, Transport, spawn_reader, write_frame};
use crate::types::{DeviceIdentity, DeviceSubtype};

/// Default baud rate for KDC readers.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay after opening the port.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Default window for discarding stale bytes after opening the port.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(200);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the link is used.
    pub connection_delay: Duration,
    /// How long to discard bytes left over from a previous session.
    pub drain_window: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Sets the stale-byte drain window.
    #[must_use]
    pub const fn drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}

/// Serial transport for KDC readers.
///
/// The port is split so the read half runs in its own task while sends
/// go through the write half.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<Arc<Mutex<WriteHalf<SerialStream>>>>,
    read_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            read_task: None,
        }
    }

    async fn drain(&self, stream: &mut SerialStream) {
        let mut buf = [0u8; 1024];
        let mut total_drained = 0usize;

        let deadline = tokio::time::Instant::now() + self.config.drain_window;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => total_drained += n,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }

        if total_drained > 0 {
            tracing::debug!("drained {} stale bytes from serial port", total_drained);
        }
    }
}

impl Transport for SerialTransport {
    fn connect<'a>(&'a mut self, device: &'a DeviceIdentity) -> BoxFuture<'a, Result<ByteFeed>> {
        Box::pin(async move {
            if self.writer.is_some() {
                self.disconnect().await?;
            }

            tracing::info!("opening serial port {} for {}", device.address, device);

            let mut stream = tokio_serial::new(&device.address, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
                tracing::warn!("failed to set RTS: {}", e);
            }

            tokio::time::sleep(self.config.connection_delay).await;
            self.drain(&mut stream).await;

            let (reader, writer) = tokio::io::split(stream);
            let (feed, task) = spawn_reader(reader, device.address.clone());
            self.writer = Some(Arc::new(Mutex::new(writer)));
            self.read_task = Some(task);

            tracing::info!("serial port {} open", device.address);
            Ok(feed)
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(task) = self.read_task.take() {
                task.abort();
            }
            if self.writer.take().is_some() {
                tracing::info!("serial port closed");
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        let writer = self.writer.clone();
        Box::pin(async move {
            let writer = writer.ok_or(Error::NotConnected)?;
            let mut writer = writer.lock().await;
            write_frame(&mut *writer, &data).await
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

/// Lists serial ports as reader identities.
///
/// USB ports map to the CDC subtype, everything else to SPP.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<DeviceIdentity>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (subtype, name) = match &p.port_type {
                SerialPortType::UsbPort(usb) => (
                    DeviceSubtype::Cdc,
                    usb.product.clone().unwrap_or_else(|| p.port_name.clone()),
                ),
                _ => (DeviceSubtype::Spp, p.port_name.clone()),
            };
            DeviceIdentity::serial(p.port_name, subtype, name)
        })
        .collect())
}
