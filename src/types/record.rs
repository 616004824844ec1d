//! Data records pushed by the reader.
//!
//! A [`DeviceRecord`] carries the raw bytes, a decoded text view and the
//! device-local timestamp common to every record, plus a
//! [`RecordPayload`] holding the fields specific to its data type.
//! Accessing the fields of another type is an [`Error::RecordKind`].

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::crypto::AesKeyLength;
use crate::error::{Error, Result};
use crate::types::uhf::{UhfDataType, UhfTagResult};

/// Record type declared by the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Unknown = 0,
    Barcode = 1,
    Msr = 2,
    Gps = 3,
    /// Legacy NFC layout, decoded as [`DataType::Nfc`].
    NfcOld = 4,
    /// Legacy NFC layout, decoded as [`DataType::Nfc`].
    NfcNew = 5,
    ApplicationData = 6,
    KeyEvent = 7,
    Nfc = 8,
    UhfList = 9,
}

impl DataType {
    /// Attempts to parse a data type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Unknown),
            1 => Some(Self::Barcode),
            2 => Some(Self::Msr),
            3 => Some(Self::Gps),
            4 => Some(Self::NfcOld),
            5 => Some(Self::NfcNew),
            6 => Some(Self::ApplicationData),
            7 => Some(Self::KeyEvent),
            8 => Some(Self::Nfc),
            9 => Some(Self::UhfList),
            _ => None,
        }
    }
}

/// Character set used to build the decoded text view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    /// UTF-8, invalid sequences replaced.
    #[default]
    Utf8,
    /// ISO-8859-1, one char per byte.
    Latin1,
}

impl TextEncoding {
    /// Decodes bytes into text.
    #[must_use]
    pub fn decode(self, data: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Self::Latin1 => data.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Device-local clock reading attached to a record (no timezone).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    /// Converts to a calendar date-time, if the fields form a valid one.
    #[must_use]
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        chrono::NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
    }
}

/// Barcode scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeData {
    /// Symbology identifier byte.
    pub symbology: u8,
    /// Scanned bytes.
    pub data: Bytes,
}

/// Magstripe card type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsrCardType {
    Iso = 0,
    Other = 1,
    Aamva = 2,
}

impl MsrCardType {
    /// Parses a card type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Iso),
            1 => Some(Self::Other),
            2 => Some(Self::Aamva),
            _ => None,
        }
    }
}

/// Magstripe framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsrDataType {
    /// Track data only.
    Payload = 0,
    /// Track data with packet framing.
    Packet = 1,
}

impl MsrDataType {
    /// Parses a data type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Payload),
            1 => Some(Self::Packet),
            _ => None,
        }
    }
}

/// Magstripe swipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsrData {
    pub card_type: MsrCardType,
    pub data_type: MsrDataType,
    /// Key length when the payload was AES encrypted.
    pub encryption: Option<AesKeyLength>,
    /// Plain track bytes; empty when decryption failed.
    pub data: Bytes,
    /// False when the encrypted payload could not be decrypted.
    pub status: bool,
}

/// GPS fix as NMEA text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsData {
    pub sentence: String,
}

/// NFC layout declared by the frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NfcDataFormat {
    /// Tag type, UID and data.
    #[default]
    PacketFormat = 0,
    /// Data only.
    DataOnly = 1,
}

impl NfcDataFormat {
    /// Parses a format from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::PacketFormat),
            1 => Some(Self::DataOnly),
            _ => None,
        }
    }
}

/// NFC tag technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NfcTagType {
    NdefType1 = 0,
    NdefType2 = 1,
    Rfid = 2,
    Calypso = 3,
    Mifare4k = 4,
    TypeA = 5,
    TypeB = 6,
    Felica = 7,
    Jewel = 8,
    Mifare1k = 9,
    MifareUltralightC = 10,
    MifareUltralight = 11,
    MifareDesfire = 12,
    Iso15693 = 13,
}

impl NfcTagType {
    /// Parses a tag type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::NdefType1,
            1 => Self::NdefType2,
            2 => Self::Rfid,
            3 => Self::Calypso,
            4 => Self::Mifare4k,
            5 => Self::TypeA,
            6 => Self::TypeB,
            7 => Self::Felica,
            8 => Self::Jewel,
            9 => Self::Mifare1k,
            10 => Self::MifareUltralightC,
            11 => Self::MifareUltralight,
            12 => Self::MifareDesfire,
            13 => Self::Iso15693,
            _ => return None,
        })
    }
}

/// NFC tag read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfcData {
    pub format: NfcDataFormat,
    /// Tag technology; absent in data-only format.
    pub tag_type: Option<NfcTagType>,
    /// Tag UID; empty in data-only format.
    pub uid: Bytes,
    pub data: Bytes,
}

impl NfcData {
    /// UID as uppercase hex.
    #[must_use]
    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }

    /// UID with byte order reversed, as uppercase hex.
    #[must_use]
    pub fn uid_reversed_hex(&self) -> String {
        let reversed: Vec<u8> = self.uid.iter().rev().copied().collect();
        hex::encode_upper(reversed)
    }

    /// Data payload in Base64, safe for logs and text transports.
    #[must_use]
    pub fn data_base64(&self) -> String {
        BASE64.encode(&self.data)
    }
}

/// Kind of application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AppDataType {
    Unknown = 0,
    Compliant = 1,
    NonCompliant = 2,
}

impl AppDataType {
    /// Parses an application data type; unknown values map to `Unknown`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Compliant,
            2 => Self::NonCompliant,
            _ => Self::Unknown,
        }
    }
}

/// Application-defined data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationData {
    pub app_type: AppDataType,
    pub data: Bytes,
}

/// Key press on the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
}

/// One UHF inventory frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UhfTagList {
    /// Shape of every entry in `tags`.
    pub data_type: UhfDataType,
    /// Tags in arrival order.
    pub tags: Vec<UhfTagResult>,
    /// Set on the frame that ends the inventory.
    pub end_of_inventory: bool,
}

/// Type-specific part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    Barcode(BarcodeData),
    Msr(MsrData),
    Gps(GpsData),
    Nfc(NfcData),
    ApplicationData(ApplicationData),
    KeyEvent(KeyEvent),
    UhfList(UhfTagList),
}

impl RecordPayload {
    /// Returns the data type of this payload.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Barcode(_) => DataType::Barcode,
            Self::Msr(_) => DataType::Msr,
            Self::Gps(_) => DataType::Gps,
            Self::Nfc(_) => DataType::Nfc,
            Self::ApplicationData(_) => DataType::ApplicationData,
            Self::KeyEvent(_) => DataType::KeyEvent,
            Self::UhfList(_) => DataType::UhfList,
        }
    }
}

/// A decoded record pushed by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Device-local time of the read.
    pub timestamp: Timestamp,
    /// Record body exactly as received.
    pub raw: Bytes,
    /// Decoded text view.
    pub text: String,
    /// Type-specific fields.
    pub payload: RecordPayload,
}

impl DeviceRecord {
    /// Returns the data type of this record.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.payload.data_type()
    }

    const fn mismatch(&self, expected: DataType) -> Error {
        Error::RecordKind {
            expected,
            actual: self.data_type(),
        }
    }

    /// Barcode fields.
    pub fn barcode(&self) -> Result<&BarcodeData> {
        match &self.payload {
            RecordPayload::Barcode(b) => Ok(b),
            _ => Err(self.mismatch(DataType::Barcode)),
        }
    }

    /// Magstripe fields.
    pub fn msr(&self) -> Result<&MsrData> {
        match &self.payload {
            RecordPayload::Msr(m) => Ok(m),
            _ => Err(self.mismatch(DataType::Msr)),
        }
    }

    /// GPS fields.
    pub fn gps(&self) -> Result<&GpsData> {
        match &self.payload {
            RecordPayload::Gps(g) => Ok(g),
            _ => Err(self.mismatch(DataType::Gps)),
        }
    }

    /// NFC fields.
    pub fn nfc(&self) -> Result<&NfcData> {
        match &self.payload {
            RecordPayload::Nfc(n) => Ok(n),
            _ => Err(self.mismatch(DataType::Nfc)),
        }
    }

    /// Application data fields.
    pub fn application_data(&self) -> Result<&ApplicationData> {
        match &self.payload {
            RecordPayload::ApplicationData(a) => Ok(a),
            _ => Err(self.mismatch(DataType::ApplicationData)),
        }
    }

    /// Key event fields.
    pub fn key_event(&self) -> Result<&KeyEvent> {
        match &self.payload {
            RecordPayload::KeyEvent(k) => Ok(k),
            _ => Err(self.mismatch(DataType::KeyEvent)),
        }
    }

    /// UHF tag list fields.
    pub fn uhf_list(&self) -> Result<&UhfTagList> {
        match &self.payload {
            RecordPayload::UhfList(u) => Ok(u),
            _ => Err(self.mismatch(DataType::UhfList)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barcode_record() -> DeviceRecord {
        DeviceRecord {
            timestamp: Timestamp::default(),
            raw: Bytes::from_static(b"\x01ABC"),
            text: "ABC".into(),
            payload: RecordPayload::Barcode(BarcodeData {
                symbology: 1,
                data: Bytes::from_static(b"ABC"),
            }),
        }
    }

    #[test]
    fn test_accessor_matches_variant() {
        let record = barcode_record();
        assert_eq!(record.data_type(), DataType::Barcode);
        assert_eq!(record.barcode().unwrap().data.as_ref(), b"ABC");
    }

    #[test]
    fn test_accessor_mismatch_is_error() {
        let record = barcode_record();
        let err = record.nfc().unwrap_err();
        assert!(matches!(
            err,
            Error::RecordKind {
                expected: DataType::Nfc,
                actual: DataType::Barcode
            }
        ));
        assert!(record.uhf_list().is_err());
        assert!(record.msr().is_err());
    }

    #[test]
    fn test_nfc_views() {
        let nfc = NfcData {
            format: NfcDataFormat::PacketFormat,
            tag_type: Some(NfcTagType::Mifare1k),
            uid: Bytes::from_static(&[0x04, 0xA1, 0xB2, 0xC3]),
            data: Bytes::from_static(b"hello"),
        };
        assert_eq!(nfc.uid_hex(), "04A1B2C3");
        assert_eq!(nfc.uid_reversed_hex(), "C3B2A104");
        assert_eq!(nfc.data_base64(), "aGVsbG8=");
    }

    #[test]
    fn test_text_encoding() {
        assert_eq!(TextEncoding::Utf8.decode("é".as_bytes()), "é");
        assert_eq!(TextEncoding::Latin1.decode(&[0xE9]), "é");
    }

    #[test]
    fn test_timestamp_to_naive() {
        let ts = Timestamp {
            year: 2024,
            month: 2,
            day: 29,
            hour: 13,
            minute: 5,
            second: 9,
        };
        assert_eq!(ts.to_naive().unwrap().to_string(), "2024-02-29 13:05:09");
        let invalid = Timestamp { month: 13, ..ts };
        assert!(invalid.to_naive().is_none());
    }

    #[test]
    fn test_data_type_from_byte() {
        assert_eq!(DataType::from_byte(9), Some(DataType::UhfList));
        assert_eq!(DataType::from_byte(4), Some(DataType::NfcOld));
        assert_eq!(DataType::from_byte(0x42), None);
    }
}
