//! Record codecs and response body parsers.
//!
//! Record bodies are decoded through a [`CodecTable`] keyed by
//! [`DataType`]. The table ships with codecs for every built-in type and
//! any entry can be replaced. UHF list entries and NFC bodies are further
//! keyed by [`UhfDataType`] and [`NfcDataFormat`], so a new sub-format is
//! one more registration.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::crypto::{AesKeyLength, Decryptor};
use crate::error::FrameError;
use crate::protocol::packet::RawRecord;
use crate::types::{
    AppDataType, ApplicationData, BarcodeData, BatteryStatus, DataType, DeviceInfo, DeviceRecord,
    ErrorSpace, GpsData, KeyEvent, MsrCardType, MsrData, MsrDataType, NfcData, NfcDataFormat,
    NfcTagType, RecordPayload, TextEncoding, UhfDataType, UhfTagList, UhfTagResult,
};

type ParseResult<T> = Result<T, FrameError>;

fn need(buf: &Bytes, n: usize, field: &'static str) -> ParseResult<()> {
    if buf.remaining() < n {
        return Err(FrameError::Truncated {
            field,
            expected: n,
            got: buf.remaining(),
        });
    }
    Ok(())
}

/// Settings that shape how record bodies are decoded.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    /// Character set of the text view.
    pub encoding: TextEncoding,
    /// MSR decryption collaborator.
    pub decryptor: Option<&'a dyn Decryptor>,
}

impl std::fmt::Debug for DecodeContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("encoding", &self.encoding)
            .field("decryptor", &self.decryptor.is_some())
            .finish()
    }
}

impl Default for DecodeContext<'_> {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            decryptor: None,
        }
    }
}

/// Decodes the body of one record type.
pub trait RecordCodec: Send + Sync {
    /// Returns the payload and its text view.
    fn decode(&self, body: Bytes, ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)>;
}

/// Barcode: `[symbology][data...]`.
#[derive(Debug, Default)]
pub struct BarcodeCodec;

impl RecordCodec for BarcodeCodec {
    fn decode(&self, mut body: Bytes, ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)> {
        need(&body, 1, "barcode symbology")?;
        let symbology = body.get_u8();
        let text = ctx.encoding.decode(&body);
        Ok((
            RecordPayload::Barcode(BarcodeData {
                symbology,
                data: body,
            }),
            text,
        ))
    }
}

/// Magstripe: `[card_type][data_type][encryption][key_length][data...]`.
#[derive(Debug, Default)]
pub struct MsrCodec;

impl RecordCodec for MsrCodec {
    fn decode(&self, mut body: Bytes, ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)> {
        need(&body, 4, "msr header")?;
        let card_byte = body.get_u8();
        let card_type = MsrCardType::from_byte(card_byte).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown MSR card type {card_byte}"),
        })?;
        let type_byte = body.get_u8();
        let data_type = MsrDataType::from_byte(type_byte).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown MSR data type {type_byte}"),
        })?;
        let encrypted = body.get_u8() != 0;
        let key_byte = body.get_u8();

        if !encrypted {
            let text = ctx.encoding.decode(&body);
            return Ok((
                RecordPayload::Msr(MsrData {
                    card_type,
                    data_type,
                    encryption: None,
                    data: body,
                    status: true,
                }),
                text,
            ));
        }

        let key_length = AesKeyLength::from_byte(key_byte).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown AES key length {key_byte}"),
        })?;
        let plain = match ctx.decryptor {
            Some(decryptor) => decryptor.decrypt(&body, key_length).map_err(|e| {
                tracing::warn!("MSR decryption failed: {}", e);
            }),
            None => {
                tracing::warn!("encrypted MSR record without decryptor");
                Err(())
            }
        };

        let (data, text, status) = match plain {
            Ok(plain) => {
                let text = ctx.encoding.decode(&plain);
                (Bytes::from(plain), text, true)
            }
            Err(()) => (Bytes::new(), String::new(), false),
        };
        Ok((
            RecordPayload::Msr(MsrData {
                card_type,
                data_type,
                encryption: Some(key_length),
                data,
                status,
            }),
            text,
        ))
    }
}

/// GPS: NMEA text.
#[derive(Debug, Default)]
pub struct GpsCodec;

impl RecordCodec for GpsCodec {
    fn decode(&self, body: Bytes, ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)> {
        let sentence = ctx.encoding.decode(&body);
        Ok((
            RecordPayload::Gps(GpsData {
                sentence: sentence.clone(),
            }),
            sentence,
        ))
    }
}

/// Decodes the part of an NFC record that follows the format byte.
pub trait NfcFormatCodec: Send + Sync {
    /// Returns the tag type and UID; `body` is left holding the tag data.
    fn decode(&self, body: &mut Bytes) -> ParseResult<(Option<NfcTagType>, Bytes)>;
}

/// `[tag_type][uid_len][uid][data...]`.
#[derive(Debug, Default)]
pub struct NfcPacketFormat;

impl NfcFormatCodec for NfcPacketFormat {
    fn decode(&self, body: &mut Bytes) -> ParseResult<(Option<NfcTagType>, Bytes)> {
        need(body, 2, "nfc tag header")?;
        let tag_byte = body.get_u8();
        let tag_type = NfcTagType::from_byte(tag_byte).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown NFC tag type {tag_byte}"),
        })?;
        let uid_len = usize::from(body.get_u8());
        need(body, uid_len, "nfc uid")?;
        Ok((Some(tag_type), body.split_to(uid_len)))
    }
}

/// `[data...]`.
#[derive(Debug, Default)]
pub struct NfcDataOnly;

impl NfcFormatCodec for NfcDataOnly {
    fn decode(&self, _body: &mut Bytes) -> ParseResult<(Option<NfcTagType>, Bytes)> {
        Ok((None, Bytes::new()))
    }
}

/// NFC: `[format]` then a body shaped by the format.
#[derive(Clone)]
pub struct NfcCodec {
    formats: HashMap<NfcDataFormat, Arc<dyn NfcFormatCodec>>,
}

impl std::fmt::Debug for NfcCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfcCodec")
            .field("formats", &self.formats.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for NfcCodec {
    fn default() -> Self {
        let mut codec = Self {
            formats: HashMap::new(),
        };
        codec.register(NfcDataFormat::PacketFormat, Arc::new(NfcPacketFormat));
        codec.register(NfcDataFormat::DataOnly, Arc::new(NfcDataOnly));
        codec
    }
}

impl NfcCodec {
    /// Registers or replaces the decoder for one format.
    pub fn register(&mut self, format: NfcDataFormat, codec: Arc<dyn NfcFormatCodec>) {
        self.formats.insert(format, codec);
    }
}

impl RecordCodec for NfcCodec {
    fn decode(&self, mut body: Bytes, ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)> {
        need(&body, 1, "nfc format")?;
        let format_byte = body.get_u8();
        let format = NfcDataFormat::from_byte(format_byte).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown NFC format {format_byte}"),
        })?;
        let codec = self.formats.get(&format).ok_or_else(|| FrameError::Malformed {
            reason: format!("no decoder for NFC format {format:?}"),
        })?;
        let (tag_type, uid) = codec.decode(&mut body)?;

        let text = ctx.encoding.decode(&body);
        Ok((
            RecordPayload::Nfc(NfcData {
                format,
                tag_type,
                uid,
                data: body,
            }),
            text,
        ))
    }
}

/// Application data: `[app_type][data...]`.
#[derive(Debug, Default)]
pub struct ApplicationDataCodec;

impl RecordCodec for ApplicationDataCodec {
    fn decode(&self, mut body: Bytes, ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)> {
        need(&body, 1, "application data type")?;
        let app_type = AppDataType::from_byte(body.get_u8());
        let text = ctx.encoding.decode(&body);
        Ok((
            RecordPayload::ApplicationData(ApplicationData {
                app_type,
                data: body,
            }),
            text,
        ))
    }
}

/// Key event: key text.
#[derive(Debug, Default)]
pub struct KeyEventCodec;

impl RecordCodec for KeyEventCodec {
    fn decode(&self, body: Bytes, ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)> {
        let key = ctx.encoding.decode(&body);
        Ok((RecordPayload::KeyEvent(KeyEvent { key: key.clone() }), key))
    }
}

/// Decodes one tag entry of a UHF list.
pub trait UhfEntryCodec: Send + Sync {
    /// Consumes one entry from the front of `body`.
    fn decode(&self, body: &mut Bytes) -> ParseResult<UhfTagResult>;
}

/// `[rssi:i8]? [pc:2BE]? [epc_len][epc]`, as the data type selects.
#[derive(Debug, Clone, Copy)]
pub struct StandardUhfEntry(pub UhfDataType);

impl UhfEntryCodec for StandardUhfEntry {
    fn decode(&self, body: &mut Bytes) -> ParseResult<UhfTagResult> {
        let rssi = if self.0.has_rssi() {
            need(body, 1, "uhf rssi")?;
            Some(body.get_i8())
        } else {
            None
        };
        let pc = if self.0.has_pc() {
            need(body, 2, "uhf pc")?;
            Some(body.get_u16())
        } else {
            None
        };
        need(body, 1, "uhf epc length")?;
        let epc_len = usize::from(body.get_u8());
        need(body, epc_len, "uhf epc")?;
        Ok(UhfTagResult {
            epc: body.split_to(epc_len),
            pc,
            rssi,
        })
    }
}

/// UHF list: `[data_type][flags][count]` then `count` tag entries.
///
/// Entries are decoded by the [`UhfEntryCodec`] registered for the data
/// type. Flag bit 0 marks the end of the inventory. The text view lists
/// EPCs in hex, one per line.
#[derive(Clone)]
pub struct UhfListCodec {
    entries: HashMap<UhfDataType, Arc<dyn UhfEntryCodec>>,
}

/// End-of-inventory flag bit.
pub const UHF_END_OF_INVENTORY: u8 = 0x01;

impl std::fmt::Debug for UhfListCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UhfListCodec")
            .field("data_types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for UhfListCodec {
    fn default() -> Self {
        let mut codec = Self {
            entries: HashMap::new(),
        };
        for data_type in [
            UhfDataType::Epc,
            UhfDataType::PcEpc,
            UhfDataType::RssiEpc,
            UhfDataType::RssiPcEpc,
        ] {
            codec.register(data_type, Arc::new(StandardUhfEntry(data_type)));
        }
        codec
    }
}

impl UhfListCodec {
    /// Registers or replaces the entry decoder for one data type.
    pub fn register(&mut self, data_type: UhfDataType, codec: Arc<dyn UhfEntryCodec>) {
        self.entries.insert(data_type, codec);
    }
}

impl RecordCodec for UhfListCodec {
    fn decode(&self, mut body: Bytes, _ctx: &DecodeContext<'_>) -> ParseResult<(RecordPayload, String)> {
        need(&body, 3, "uhf list header")?;
        let type_byte = body.get_u8();
        let data_type = UhfDataType::from_byte(type_byte).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown UHF data type {type_byte}"),
        })?;
        let entry = self.entries.get(&data_type).ok_or_else(|| FrameError::Malformed {
            reason: format!("no decoder for UHF data type {data_type:?}"),
        })?;
        let end_of_inventory = body.get_u8() & UHF_END_OF_INVENTORY != 0;
        let count = body.get_u8();

        let mut tags = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            tags.push(entry.decode(&mut body)?);
        }

        let text = tags
            .iter()
            .map(UhfTagResult::epc_hex)
            .collect::<Vec<_>>()
            .join("\n");
        Ok((
            RecordPayload::UhfList(UhfTagList {
                data_type,
                tags,
                end_of_inventory,
            }),
            text,
        ))
    }
}

/// Record codecs keyed by data type.
///
/// UHF list entries and NFC bodies have their own registries, one decoder
/// per [`UhfDataType`] and [`NfcDataFormat`].
#[derive(Clone)]
pub struct CodecTable {
    codecs: HashMap<DataType, Arc<dyn RecordCodec>>,
    uhf: UhfListCodec,
    nfc: NfcCodec,
}

impl std::fmt::Debug for CodecTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecTable")
            .field("types", &self.codecs.keys().collect::<Vec<_>>())
            .field("uhf", &self.uhf)
            .field("nfc", &self.nfc)
            .finish()
    }
}

impl Default for CodecTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register(DataType::Barcode, Arc::new(BarcodeCodec));
        table.register(DataType::Msr, Arc::new(MsrCodec));
        table.register(DataType::Gps, Arc::new(GpsCodec));
        table.register(DataType::ApplicationData, Arc::new(ApplicationDataCodec));
        table.register(DataType::KeyEvent, Arc::new(KeyEventCodec));
        table.install_nfc();
        table.install_uhf();
        table
    }
}

impl CodecTable {
    /// Creates a table with no record codecs.
    ///
    /// The sub-format registries start with the built-in decoders and are
    /// installed by the first `register_nfc_format` or `register_uhf_entry`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
            uhf: UhfListCodec::default(),
            nfc: NfcCodec::default(),
        }
    }

    /// Registers or replaces the codec for a data type.
    pub fn register(&mut self, data_type: DataType, codec: Arc<dyn RecordCodec>) {
        self.codecs.insert(data_type, codec);
    }

    /// Registers or replaces the decoder for one NFC format.
    ///
    /// Replaces any codec registered for the NFC data types.
    pub fn register_nfc_format(&mut self, format: NfcDataFormat, codec: Arc<dyn NfcFormatCodec>) {
        self.nfc.register(format, codec);
        self.install_nfc();
    }

    /// Registers or replaces the entry decoder for one UHF data type.
    ///
    /// Replaces any codec registered for [`DataType::UhfList`].
    pub fn register_uhf_entry(&mut self, data_type: UhfDataType, codec: Arc<dyn UhfEntryCodec>) {
        self.uhf.register(data_type, codec);
        self.install_uhf();
    }

    fn install_nfc(&mut self) {
        let nfc: Arc<dyn RecordCodec> = Arc::new(self.nfc.clone());
        for data_type in [DataType::Nfc, DataType::NfcOld, DataType::NfcNew] {
            self.register(data_type, Arc::clone(&nfc));
        }
    }

    fn install_uhf(&mut self) {
        self.register(DataType::UhfList, Arc::new(self.uhf.clone()));
    }

    /// Decodes a classified record.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::UnknownType` when no codec is registered, or the
    /// codec's error.
    pub fn decode(&self, raw: RawRecord, ctx: &DecodeContext<'_>) -> ParseResult<DeviceRecord> {
        let codec = self
            .codecs
            .get(&raw.data_type)
            .ok_or(FrameError::UnknownType(raw.data_type as u8))?;
        let (payload, text) = codec.decode(raw.body.clone(), ctx)?;
        Ok(DeviceRecord {
            timestamp: raw.timestamp,
            raw: raw.body,
            text,
            payload,
        })
    }
}

/// Parses the device info reply: `[fw_major][fw_minor][chipset][model...]`.
pub fn parse_device_info(data: &[u8]) -> ParseResult<DeviceInfo> {
    if data.len() < 3 {
        return Err(FrameError::TooShort {
            need: 3,
            got: data.len(),
        });
    }
    let model = String::from_utf8_lossy(&data[3..])
        .trim_end_matches('\0')
        .to_string();
    Ok(DeviceInfo {
        firmware_major: data[0],
        firmware_minor: data[1],
        error_space: ErrorSpace::from_byte(data[2]),
        model,
    })
}

/// Parses the battery reply: `[percent][charging]`.
pub fn parse_battery(data: &[u8]) -> ParseResult<BatteryStatus> {
    match data {
        [percent, charging, ..] => Ok(BatteryStatus {
            percent: (*percent).min(100),
            charging: *charging != 0,
        }),
        _ => Err(FrameError::TooShort {
            need: 2,
            got: data.len(),
        }),
    }
}

/// Parses a little-endian `u16` reply body.
pub fn parse_u16_le(data: &[u8]) -> ParseResult<u16> {
    match data {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(FrameError::TooShort {
            need: 2,
            got: data.len(),
        }),
    }
}
