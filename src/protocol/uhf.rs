//! UHF command parameter blocks.
//!
//! ```text
//! select:    [target][action][bank][pointer:4BE][length][mask:ceil(length/8)][truncated]
//! query:     [dr][cycle][trext][sel][session][target][slot_q]
//! inventory: [has_select][select?][query][data_type]
//! read:      [bank][word_ptr:2BE][word_count][access_pwd:4BE]
//! write:     [bank][word_ptr:2BE][word_count][access_pwd:4BE][data...]
//! lock:      [access_pwd:4BE][bits:3BE]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, FrameError, Result};
use crate::types::{LockMask, MemoryBank, QueryParameter, SelectParameter, UhfDataType};

/// Size of the fixed part of a select block.
const SELECT_FIXED_SIZE: usize = 9;

/// Size of a query block.
const QUERY_SIZE: usize = 7;

/// Size of the read/write header.
const ACCESS_HEADER_SIZE: usize = 8;

fn need(buf: &Bytes, n: usize, field: &'static str) -> std::result::Result<(), FrameError> {
    if buf.remaining() < n {
        return Err(FrameError::Truncated {
            field,
            expected: n,
            got: buf.remaining(),
        });
    }
    Ok(())
}

/// Appends a select block.
pub fn put_select(buf: &mut BytesMut, select: &SelectParameter) {
    buf.put_u8(select.target);
    buf.put_u8(select.action);
    buf.put_u8(select.memory_bank as u8);
    buf.put_u32(select.bit_pointer);
    buf.put_u8(select.bit_length);
    buf.put_slice(&select.mask);
    buf.put_u8(u8::from(select.is_truncated));
}

/// Reads a select block.
pub fn get_select(buf: &mut Bytes) -> std::result::Result<SelectParameter, FrameError> {
    need(buf, SELECT_FIXED_SIZE - 1, "select block")?;
    let target = buf.get_u8();
    let action = buf.get_u8();
    let bank = buf.get_u8();
    let memory_bank = MemoryBank::from_byte(bank).ok_or_else(|| FrameError::Malformed {
        reason: format!("unknown memory bank {bank}"),
    })?;
    let bit_pointer = buf.get_u32();
    let bit_length = buf.get_u8();
    let mask_len = usize::from(bit_length).div_ceil(8);
    need(buf, mask_len + 1, "select mask")?;
    let mask = buf.split_to(mask_len);
    let is_truncated = buf.get_u8() != 0;
    Ok(SelectParameter {
        target,
        action,
        memory_bank,
        bit_pointer,
        bit_length,
        mask,
        is_truncated,
    })
}

/// Appends a query block.
pub fn put_query(buf: &mut BytesMut, query: &QueryParameter) {
    buf.put_slice(&[
        query.dr,
        query.cycle,
        query.trext,
        query.sel,
        query.session,
        query.target,
        query.slot_number,
    ]);
}

/// Reads a query block.
pub fn get_query(buf: &mut Bytes) -> std::result::Result<QueryParameter, FrameError> {
    need(buf, QUERY_SIZE, "query block")?;
    Ok(QueryParameter {
        dr: buf.get_u8(),
        cycle: buf.get_u8(),
        trext: buf.get_u8(),
        sel: buf.get_u8(),
        session: buf.get_u8(),
        target: buf.get_u8(),
        slot_number: buf.get_u8(),
    })
}

/// Parameters of one inventory round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryParams {
    /// Tag filter sent ahead of the round; `None` inventories every tag.
    pub select: Option<SelectParameter>,
    /// Gen2 Query settings for the round.
    pub query: QueryParameter,
    /// Shape of the tag entries the reader reports.
    pub data_type: UhfDataType,
}

impl InventoryParams {
    /// Validates and encodes the parameters.
    pub fn encode(&self) -> Result<Bytes> {
        self.query.validate()?;
        let mut buf = BytesMut::with_capacity(2 + QUERY_SIZE + SELECT_FIXED_SIZE + 32);
        match &self.select {
            Some(select) => {
                select.validate()?;
                buf.put_u8(1);
                put_select(&mut buf, select);
            }
            None => buf.put_u8(0),
        }
        put_query(&mut buf, &self.query);
        buf.put_u8(self.data_type as u8);
        Ok(buf.freeze())
    }

    /// Decodes inventory parameters.
    pub fn decode(mut buf: Bytes) -> std::result::Result<Self, FrameError> {
        need(&buf, 1, "inventory flags")?;
        let select = if buf.get_u8() == 0 {
            None
        } else {
            Some(get_select(&mut buf)?)
        };
        let query = get_query(&mut buf)?;
        need(&buf, 1, "inventory data type")?;
        let raw = buf.get_u8();
        let data_type = UhfDataType::from_byte(raw).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown UHF data type {raw}"),
        })?;
        Ok(Self {
            select,
            query,
            data_type,
        })
    }
}

/// Tag memory access parameters shared by read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    /// Tag memory bank to access.
    pub bank: MemoryBank,
    /// First 16-bit word.
    pub word_pointer: u16,
    /// Access password; zero when the tag has none.
    pub access_password: u32,
}

impl MemoryAccess {
    fn put_header(&self, buf: &mut BytesMut, word_count: u8) {
        buf.put_u8(self.bank as u8);
        buf.put_u16(self.word_pointer);
        buf.put_u8(word_count);
        buf.put_u32(self.access_password);
    }

    /// Encodes a read of `word_count` words.
    pub fn encode_read(&self, word_count: u8) -> Result<Bytes> {
        if word_count == 0 {
            return Err(Error::InvalidParameter {
                reason: "read word count must be non-zero".into(),
            });
        }
        let mut buf = BytesMut::with_capacity(ACCESS_HEADER_SIZE);
        self.put_header(&mut buf, word_count);
        Ok(buf.freeze())
    }

    /// Encodes a write of `data`, which must be whole words.
    pub fn encode_write(&self, data: &[u8]) -> Result<Bytes> {
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(Error::InvalidParameter {
                reason: format!("write data must be whole words, got {} bytes", data.len()),
            });
        }
        let word_count = u8::try_from(data.len() / 2).map_err(|_| Error::InvalidParameter {
            reason: format!("write of {} bytes exceeds 255 words", data.len()),
        })?;
        let mut buf = BytesMut::with_capacity(ACCESS_HEADER_SIZE + data.len());
        self.put_header(&mut buf, word_count);
        buf.put_slice(data);
        Ok(buf.freeze())
    }

    /// Decodes a read/write header, returning the access and word count.
    pub fn decode_header(buf: &mut Bytes) -> std::result::Result<(Self, u8), FrameError> {
        need(buf, ACCESS_HEADER_SIZE, "memory access header")?;
        let bank_byte = buf.get_u8();
        let bank = MemoryBank::from_byte(bank_byte).ok_or_else(|| FrameError::Malformed {
            reason: format!("unknown memory bank {bank_byte}"),
        })?;
        let word_pointer = buf.get_u16();
        let word_count = buf.get_u8();
        let access_password = buf.get_u32();
        Ok((
            Self {
                bank,
                word_pointer,
                access_password,
            },
            word_count,
        ))
    }
}

/// Encodes lock parameters.
#[must_use]
pub fn encode_lock(access_password: u32, mask: &LockMask) -> Bytes {
    let mut buf = BytesMut::with_capacity(7);
    buf.put_u32(access_password);
    let bits = mask.pack();
    buf.put_slice(&bits.to_be_bytes()[1..]);
    buf.freeze()
}

/// Decodes lock parameters.
pub fn decode_lock(mut buf: Bytes) -> std::result::Result<(u32, LockMask), FrameError> {
    need(&buf, 7, "lock parameters")?;
    let password = buf.get_u32();
    let bits = buf.get_uint(3) as u32;
    Ok((password, LockMask::unpack(bits)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, CorrelationToken, FrameDecoder, Opcode, encode_frame};
    use crate::types::{LockAction, LockTarget};

    fn epc_select() -> SelectParameter {
        SelectParameter {
            target: 1,
            action: 0,
            memory_bank: MemoryBank::Epc,
            bit_pointer: 32,
            bit_length: 96,
            mask: Bytes::from_static(&[
                0xe2, 0x00, 0x34, 0x12, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
            ]),
            is_truncated: false,
        }
    }

    #[test]
    fn test_select_survives_command_frame() {
        let params = InventoryParams {
            select: Some(epc_select()),
            query: QueryParameter::default(),
            data_type: UhfDataType::RssiPcEpc,
        };
        let command = Command::new(CorrelationToken(7), Opcode::UhfInventory, params.encode().unwrap());
        let frame = encode_frame(&command.encode()).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame);
        let mut payload = decoder.decode().unwrap().unwrap();
        assert_eq!(payload.get_u8(), Opcode::UhfInventory as u8);

        let decoded = InventoryParams::decode(payload).unwrap();
        assert_eq!(decoded.select, Some(epc_select()));
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_select_layout() {
        let mut buf = BytesMut::new();
        put_select(&mut buf, &epc_select());
        assert_eq!(&buf[..9], &[1, 0, 1, 0, 0, 0, 32, 96, 0xe2]);
        assert_eq!(buf.len(), SELECT_FIXED_SIZE + 12);
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn test_inventory_rejects_bad_mask_length() {
        let mut select = epc_select();
        select.bit_length = 100;
        let params = InventoryParams {
            select: Some(select),
            query: QueryParameter::default(),
            data_type: UhfDataType::Epc,
        };
        assert!(matches!(params.encode(), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_inventory_without_select() {
        let params = InventoryParams {
            select: None,
            query: QueryParameter::default(),
            data_type: UhfDataType::Epc,
        };
        let bytes = params.encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0, 0, 0, 1, 0, 0, 0, 4, 0]);
        assert_eq!(InventoryParams::decode(bytes).unwrap(), params);
    }

    #[test]
    fn test_read_and_write_headers() {
        let access = MemoryAccess {
            bank: MemoryBank::User,
            word_pointer: 2,
            access_password: 0x1122_3344,
        };
        let read = access.encode_read(4).unwrap();
        assert_eq!(read.as_ref(), &[3, 0, 2, 4, 0x11, 0x22, 0x33, 0x44]);

        let mut write = access.encode_write(&[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();
        let (decoded, count) = MemoryAccess::decode_header(&mut write).unwrap();
        assert_eq!(decoded, access);
        assert_eq!(count, 2);
        assert_eq!(write.as_ref(), &[0xaa, 0xbb, 0xcc, 0xdd]);

        assert!(access.encode_write(&[0xaa]).is_err());
        assert!(access.encode_read(0).is_err());
    }

    #[test]
    fn test_lock_user_permanent() {
        let mask = LockMask::for_action(LockTarget::User, LockAction::PermanentLock);
        let params = encode_lock(0, &mask);
        assert_eq!(params.as_ref(), &[0, 0, 0, 0, 0x00, 0x08, 0x01]);

        let (password, decoded) = decode_lock(params).unwrap();
        assert_eq!(password, 0);
        assert_eq!(decoded, mask);
    }
}
