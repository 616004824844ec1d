//! Protocol definitions for KDC reader communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding
//! - Packet classification
//! - Command opcodes, commands and responses
//! - Record codecs
//! - UHF parameter blocks

pub mod command;
pub mod frame;
pub mod packet;
pub mod parser;
pub mod uhf;

pub use command::{COMMON_ERROR_CODE, Command, CorrelationToken, Opcode, Response};
pub use frame::{
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER, FrameDecoder,
    encode as encode_frame,
};
pub use packet::{Packet, RESPONSE_MARKER, RawRecord};
pub use parser::{
    CodecTable, DecodeContext, NfcCodec, NfcDataOnly, NfcFormatCodec, NfcPacketFormat,
    RecordCodec, StandardUhfEntry, UHF_END_OF_INVENTORY, UhfEntryCodec, UhfListCodec,
    parse_battery, parse_device_info, parse_u16_le,
};
pub use uhf::{InventoryParams, MemoryAccess, decode_lock, encode_lock};
