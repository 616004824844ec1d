//! Command opcodes, commands and responses.
//!
//! Commands are sent to the reader as `[opcode][params...]`. The reader
//! answers each command with exactly one response frame carrying the same
//! opcode.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, FrameError, Result};
use crate::types::{ErrorSpace, VendorError};

/// Error code used when a failed response carries no code.
pub const COMMON_ERROR_CODE: u16 = 0x100;

/// Command opcodes sent to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Reader configuration
    /// Read firmware, chipset and model.
    GetDeviceInfo = 0x10,
    /// Read battery level.
    GetBattery = 0x11,
    /// Read the sleep timeout.
    GetSleepTimeout = 0x12,
    /// Write the sleep timeout.
    SetSleepTimeout = 0x13,
    /// Read the scan timeout.
    GetScanTimeout = 0x14,
    /// Write the scan timeout.
    SetScanTimeout = 0x15,
    /// Select the NFC record layout.
    SetNfcDataFormat = 0x16,
    /// Configure the magstripe reader.
    SetMsrSettings = 0x17,

    // UHF
    /// Start an inventory round.
    UhfInventory = 0x30,
    /// Read tag memory.
    UhfReadMemory = 0x31,
    /// Write tag memory.
    UhfWriteMemory = 0x32,
    /// Lock tag memory.
    UhfLock = 0x33,
    /// Read the RF power level.
    UhfGetPower = 0x34,
    /// Write the RF power level.
    UhfSetPower = 0x35,
    /// Select the RF region.
    UhfSetRegion = 0x36,
    /// Select the inventory record shape.
    UhfSetDataType = 0x37,
}

impl Opcode {
    /// Attempts to parse an opcode from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Self::GetDeviceInfo),
            0x11 => Some(Self::GetBattery),
            0x12 => Some(Self::GetSleepTimeout),
            0x13 => Some(Self::SetSleepTimeout),
            0x14 => Some(Self::GetScanTimeout),
            0x15 => Some(Self::SetScanTimeout),
            0x16 => Some(Self::SetNfcDataFormat),
            0x17 => Some(Self::SetMsrSettings),
            0x30 => Some(Self::UhfInventory),
            0x31 => Some(Self::UhfReadMemory),
            0x32 => Some(Self::UhfWriteMemory),
            0x33 => Some(Self::UhfLock),
            0x34 => Some(Self::UhfGetPower),
            0x35 => Some(Self::UhfSetPower),
            0x36 => Some(Self::UhfSetRegion),
            0x37 => Some(Self::UhfSetDataType),
            _ => None,
        }
    }

    /// Returns true for opcodes that belong to the UHF module.
    #[must_use]
    pub const fn is_uhf(self) -> bool {
        (self as u8) >= 0x30
    }
}

/// Opaque identifier pairing a command with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(pub u64);

/// A command to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub token: CorrelationToken,
    pub opcode: Opcode,
    pub params: Bytes,
}

impl Command {
    /// Creates a command.
    #[must_use]
    pub fn new(token: CorrelationToken, opcode: Opcode, params: impl Into<Bytes>) -> Self {
        Self {
            token,
            opcode,
            params: params.into(),
        }
    }

    /// Serializes the command payload (unframed).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.params.len());
        buf.put_u8(self.opcode as u8);
        buf.put_slice(&self.params);
        buf.freeze()
    }
}

/// A response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Opcode of the command this answers.
    pub opcode: u8,
    /// True if the reader executed the command.
    pub succeeded: bool,
    /// Body of a successful response; `None` when empty.
    pub payload: Option<Bytes>,
    /// Vendor error code; zero on success.
    pub code: u16,
}

impl Response {
    /// Parses a response body `[opcode][status][body...]` (marker stripped).
    ///
    /// # Errors
    ///
    /// Returns `FrameError::TooShort` if opcode or status is missing.
    pub fn parse(mut data: Bytes) -> std::result::Result<Self, FrameError> {
        if data.len() < 2 {
            return Err(FrameError::TooShort {
                need: 2,
                got: data.len(),
            });
        }
        let opcode = data.get_u8();
        let status = data.get_u8();

        if status == 0 {
            return Ok(Self {
                opcode,
                succeeded: true,
                payload: (!data.is_empty()).then_some(data),
                code: 0,
            });
        }

        let code = if data.len() >= 2 {
            data.get_u16_le()
        } else {
            COMMON_ERROR_CODE
        };
        Ok(Self {
            opcode,
            succeeded: false,
            payload: None,
            code,
        })
    }

    /// Interprets the code in the given error space.
    #[must_use]
    pub const fn vendor_error(&self, space: ErrorSpace) -> VendorError {
        VendorError::new(self.code, space)
    }

    /// Returns the body, or the vendor error verbatim.
    pub fn into_result(self, space: ErrorSpace) -> Result<Option<Bytes>> {
        if self.succeeded {
            Ok(self.payload)
        } else {
            Err(Error::Protocol(self.vendor_error(space)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_byte() {
        assert_eq!(Opcode::from_byte(0x33), Some(Opcode::UhfLock));
        assert_eq!(Opcode::from_byte(0x99), None);
        assert!(Opcode::UhfInventory.is_uhf());
        assert!(!Opcode::GetBattery.is_uhf());
    }

    #[test]
    fn test_command_encode() {
        let cmd = Command::new(CorrelationToken(1), Opcode::UhfSetPower, vec![0x0a]);
        assert_eq!(cmd.encode().as_ref(), &[0x35, 0x0a]);
    }

    #[test]
    fn test_parse_success_response() {
        let resp = Response::parse(Bytes::from_static(&[0x11, 0x00, 80, 1])).unwrap();
        assert!(resp.succeeded);
        assert_eq!(resp.opcode, 0x11);
        assert_eq!(resp.payload.as_deref(), Some(&[80u8, 1][..]));

        let empty = Response::parse(Bytes::from_static(&[0x13, 0x00])).unwrap();
        assert!(empty.succeeded);
        assert_eq!(empty.payload, None);
    }

    #[test]
    fn test_parse_failure_response() {
        let resp = Response::parse(Bytes::from_static(&[0x31, 0x01, 0xa3, 0x00])).unwrap();
        assert!(!resp.succeeded);
        assert_eq!(resp.code, 0x00a3);

        let bare = Response::parse(Bytes::from_static(&[0x31, 0x01])).unwrap();
        assert_eq!(bare.code, COMMON_ERROR_CODE);

        let err = bare.into_result(ErrorSpace::Phychips).unwrap_err();
        assert!(matches!(err, Error::Protocol(v) if v.raw == COMMON_ERROR_CODE));
    }

    #[test]
    fn test_parse_too_short() {
        assert!(matches!(
            Response::parse(Bytes::from_static(&[0x11])),
            Err(FrameError::TooShort { need: 2, got: 1 })
        ));
    }
}
