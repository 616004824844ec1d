//! Classification of received frame payloads.
//!
//! The first payload byte is either the response marker or a
//! [`DataType`]. Records carry a device-local timestamp ahead of their
//! type-specific body:
//!
//! ```text
//! response: [0x80][opcode][status][body...]
//! record:   [type][yy][MM][dd][hh][mm][ss][body...]
//! ```

use bytes::{Buf, Bytes};

use crate::error::FrameError;
use crate::protocol::command::Response;
use crate::types::{DataType, Timestamp};

/// Leading byte of a command response.
pub const RESPONSE_MARKER: u8 = 0x80;

/// Record header size (type byte plus six timestamp bytes).
pub const RECORD_HEADER_SIZE: usize = 7;

/// Record frame before type-specific decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub data_type: DataType,
    pub timestamp: Timestamp,
    pub body: Bytes,
}

/// A classified frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Answer to a pending command.
    Response(Response),
    /// Data pushed by the reader.
    Record(RawRecord),
}

impl Packet {
    /// Classifies a frame payload.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` for empty, truncated or unknown payloads.
    pub fn parse(mut payload: Bytes) -> Result<Self, FrameError> {
        let Some(&kind) = payload.first() else {
            return Err(FrameError::TooShort { need: 1, got: 0 });
        };

        if kind == RESPONSE_MARKER {
            payload.advance(1);
            return Response::parse(payload).map(Self::Response);
        }

        let data_type = DataType::from_byte(kind).ok_or(FrameError::UnknownType(kind))?;
        if payload.len() < RECORD_HEADER_SIZE {
            return Err(FrameError::TooShort {
                need: RECORD_HEADER_SIZE,
                got: payload.len(),
            });
        }

        payload.advance(1);
        let timestamp = Timestamp {
            year: 2000 + u16::from(payload.get_u8()),
            month: payload.get_u8(),
            day: payload.get_u8(),
            hour: payload.get_u8(),
            minute: payload.get_u8(),
            second: payload.get_u8(),
        };

        Ok(Self::Record(RawRecord {
            data_type,
            timestamp,
            body: payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_response() {
        let packet = Packet::parse(Bytes::from_static(&[0x80, 0x11, 0x00, 0x50, 0x00])).unwrap();
        match packet {
            Packet::Response(resp) => {
                assert_eq!(resp.opcode, 0x11);
                assert!(resp.succeeded);
            }
            Packet::Record(_) => panic!("expected response"),
        }
    }

    #[test]
    fn test_classify_record() {
        let packet = Packet::parse(Bytes::from_static(&[
            0x01, 24, 6, 15, 9, 30, 45, 0x01, b'A', b'B',
        ]))
        .unwrap();
        let Packet::Record(record) = packet else {
            panic!("expected record");
        };
        assert_eq!(record.data_type, DataType::Barcode);
        assert_eq!(record.timestamp.year, 2024);
        assert_eq!(record.timestamp.second, 45);
        assert_eq!(record.body.as_ref(), &[0x01, b'A', b'B']);
    }

    #[test]
    fn test_classify_errors() {
        assert_eq!(
            Packet::parse(Bytes::new()),
            Err(FrameError::TooShort { need: 1, got: 0 })
        );
        assert_eq!(
            Packet::parse(Bytes::from_static(&[0x42, 0, 0, 0, 0, 0, 0])),
            Err(FrameError::UnknownType(0x42))
        );
        assert_eq!(
            Packet::parse(Bytes::from_static(&[0x01, 24, 6])),
            Err(FrameError::TooShort { need: 7, got: 3 })
        );
    }
}
