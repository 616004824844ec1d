//! Error types for the kdc library.

use thiserror::Error;

use crate::types::{ConnectionState, DataType, UhfDataType, VendorError};

/// The main error type for kdc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport link error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Vendor error code returned by the device.
    #[error("device returned {0}")]
    Protocol(VendorError),

    /// Command timed out waiting for response.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The device disconnected while the operation was pending.
    #[error("device disconnected")]
    Disconnected,

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// MSR payload could not be decrypted.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A caller-supplied parameter is out of range.
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// The requested state change is not part of the connection lifecycle.
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// A record accessor was used on a record of another type.
    #[error("record is {actual:?}, not {expected:?}")]
    RecordKind { expected: DataType, actual: DataType },

    /// A UHF frame used a different shape than the inventory session.
    #[error("inventory expected {expected:?} tags, got {actual:?}")]
    InventoryShape {
        expected: UhfDataType,
        actual: UhfDataType,
    },

    /// The response body did not have the expected layout.
    #[error("unexpected response to opcode 0x{opcode:02X}")]
    UnexpectedResponse { opcode: u8 },

    /// Persisted settings could not be read or written.
    #[error("settings error: {reason}")]
    Settings { reason: String },

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    pub(crate) fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Transport-level failure category.
///
/// Numeric values are the reader SDK's link error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkErrorKind {
    ConnectFailed = 1,
    DiscoverService = 2,
    DiscoverCharacteristic = 3,
    ReadValue = 4,
    WriteValue = 5,
    DisconnectFailed = 6,
}

impl LinkErrorKind {
    /// Returns the numeric link error code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Transport-level error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} (code {code}): {message}", code = .kind.code())]
pub struct LinkError {
    pub kind: LinkErrorKind,
    pub message: String,
}

impl LinkError {
    /// Creates a link error.
    #[must_use]
    pub fn new(kind: LinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Frame-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload too short to classify.
    #[error("frame too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    /// Frame payload exceeds maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Bytes skipped while looking for a frame header.
    #[error("bad frame header: skipped {skipped} bytes")]
    BadHeader { skipped: usize },

    /// Buffered bytes exceeded the decoder limit; buffer was reset.
    #[error("decoder buffer overflow: {size} bytes exceeds maximum {max}")]
    BufferOverflow { size: usize, max: usize },

    /// A field ran past the end of the frame.
    #[error("truncated {field}: expected {expected} bytes, got {got}")]
    Truncated {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// Unknown packet or data type byte.
    #[error("unknown record type 0x{0:02X}")]
    UnknownType(u8),

    /// Structurally invalid record.
    #[error("malformed record: {reason}")]
    Malformed { reason: String },
}

/// Errors returned by the MSR decryption collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// No decryptor is configured.
    #[error("no decryptor configured")]
    Unavailable,

    /// Ciphertext length is not a multiple of the block size.
    #[error("ciphertext length {0} is not block aligned")]
    BlockAlignment(usize),

    /// Key material rejected or missing.
    #[error("key error: {0}")]
    Key(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    Failed(String),
}

/// Result type alias for kdc operations.
pub type Result<T> = std::result::Result<T, Error>;
