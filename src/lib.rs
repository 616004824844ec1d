//! # kdc
//!
//! An async protocol and connection engine for KDC handheld readers
//! (barcode, MSR, NFC, GPS and UHF RFID).
//!
//! This library talks to KDC readers over serial ports (Bluetooth SPP,
//! USB CDC), arbitrary byte streams and BLE GATT links.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Connection lifecycle state machine with typed events
//! - Incremental frame decoding tolerant of arbitrary read boundaries
//! - One-command-in-flight correlation with timeouts
//! - UHF inventory, memory read/write and lock masks
//! - Vendor error codes surfaced verbatim per chipset error space
//!
//! ## Quick Start
//!
//! ```no_run
//! use kdc::{EventFilter, EventKind, KdcReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kdc::Error> {
//!     // Connect to a reader paired as a serial port
//!     let reader = KdcReader::serial("/dev/rfcomm0");
//!     let mut scans = reader.subscribe(Some(EventFilter::kinds(vec![EventKind::BarcodeData])));
//!     reader.connect().await?;
//!
//!     if let Some(info) = reader.info() {
//!         println!("Connected to: {} (firmware {})", info.model, info.firmware());
//!     }
//!
//!     // Wait for one barcode
//!     if let Some(kdc::Event::DataArrived { record, .. }) = scans.recv().await {
//!         println!("Scanned: {}", record.text);
//!     }
//!
//!     reader.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Wire format (frames, packets, commands, record codecs)
//! - [`types`] - Data structures (devices, records, UHF parameters, error codes)
//! - [`transport`] - Transport implementations (serial, stream, GATT)
//! - [`event`] - Async event system for lifecycle, data and error events
//! - [`commands`] - Command correlation, reader commands and the UHF engine
//! - [`registry`] - Device lists shared across readers
//! - [`settings`] - Per-device settings and their persistence seam
//! - [`client`] - High-level [`KdcReader`] client

pub mod client;
pub mod commands;
pub mod crypto;
pub mod error;
pub mod event;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{KdcReader, KdcReaderBuilder, ReaderConfig, ReconnectPolicy};
pub use commands::{CommandHandler, InventoryReport, MsrSettings, UhfEngine};
pub use crypto::{AesKeyLength, Decryptor};
pub use error::{CryptoError, Error, FrameError, LinkError, LinkErrorKind, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use protocol::{
    CodecTable, MemoryAccess, NfcFormatCodec, Opcode, RecordCodec, UhfEntryCodec,
};
pub use registry::{DeviceRegistry, ListKind};
pub use settings::{DeviceSettings, MemorySettingsStore, SettingsStore};
pub use transport::{
    GattLink, GattTransport, SerialTransport, StreamConnector, StreamTransport,
    serial::list_ports,
};
pub use types::{
    BarcodeData, BatteryStatus, ConnectionState, DataType, DeviceId, DeviceIdentity, DeviceInfo,
    DeviceRecord, DeviceSubtype, DeviceType, ErrorSpace, GpsData, LockAction, LockMask,
    LockTarget, MemoryBank, MsrData, NfcData, QueryParameter, RecordPayload, SelectParameter,
    TextEncoding, UhfDataType, UhfPowerLevel, UhfRegion, UhfTagResult, VendorError,
};
