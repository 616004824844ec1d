//! UHF RFID value types: inventory parameters, tag results and lock masks.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Addressable memory region of a Gen2 tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryBank {
    /// Reserved bank (kill and access passwords).
    Rfu = 0,
    /// EPC bank.
    Epc = 1,
    /// Tag identifier bank.
    Tid = 2,
    /// User bank.
    User = 3,
}

impl MemoryBank {
    /// Parses a memory bank from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Rfu),
            1 => Some(Self::Epc),
            2 => Some(Self::Tid),
            3 => Some(Self::User),
            _ => None,
        }
    }
}

/// Shape of each tag entry reported during an inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum UhfDataType {
    /// EPC only.
    #[default]
    Epc = 0,
    /// Protocol control word and EPC.
    PcEpc = 1,
    /// Signal strength and EPC.
    RssiEpc = 2,
    /// Signal strength, protocol control word and EPC.
    RssiPcEpc = 3,
}

impl UhfDataType {
    /// Parses a data type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Epc),
            1 => Some(Self::PcEpc),
            2 => Some(Self::RssiEpc),
            3 => Some(Self::RssiPcEpc),
            _ => None,
        }
    }

    /// Returns true if entries carry a PC word.
    #[must_use]
    pub const fn has_pc(self) -> bool {
        matches!(self, Self::PcEpc | Self::RssiPcEpc)
    }

    /// Returns true if entries carry an RSSI value.
    #[must_use]
    pub const fn has_rssi(self) -> bool {
        matches!(self, Self::RssiEpc | Self::RssiPcEpc)
    }
}

/// Gen2 Select command parameters, filtering which tags join an inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectParameter {
    /// Session flag or SL flag to modify (0-7).
    pub target: u8,
    /// Action applied to matching / non-matching tags (0-7).
    pub action: u8,
    /// Bank the mask is compared against.
    pub memory_bank: MemoryBank,
    /// First bit of the compared region.
    pub bit_pointer: u32,
    /// Number of mask bits.
    pub bit_length: u8,
    /// Mask bytes, `ceil(bit_length / 8)` long.
    pub mask: Bytes,
    /// Truncate replies to the bits following the mask.
    pub is_truncated: bool,
}

impl SelectParameter {
    /// Creates a select parameter matching `mask` at `bit_pointer` in `memory_bank`.
    ///
    /// The bit length is taken from the mask.
    pub fn matching(memory_bank: MemoryBank, bit_pointer: u32, mask: impl Into<Bytes>) -> Result<Self> {
        let mask = mask.into();
        let bit_length = u8::try_from(mask.len() * 8).map_err(|_| Error::InvalidParameter {
            reason: format!("select mask of {} bytes exceeds 255 bits", mask.len()),
        })?;
        Ok(Self {
            target: 4,
            action: 0,
            memory_bank,
            bit_pointer,
            bit_length,
            mask,
            is_truncated: false,
        })
    }

    /// Checks field ranges and mask length.
    pub fn validate(&self) -> Result<()> {
        if self.target > 7 {
            return Err(Error::InvalidParameter {
                reason: format!("select target {} out of range (0-7)", self.target),
            });
        }
        if self.action > 7 {
            return Err(Error::InvalidParameter {
                reason: format!("select action {} out of range (0-7)", self.action),
            });
        }
        let expected = usize::from(self.bit_length).div_ceil(8);
        if self.mask.len() != expected {
            return Err(Error::InvalidParameter {
                reason: format!(
                    "select mask is {} bytes, {} bits need {expected}",
                    self.mask.len(),
                    self.bit_length
                ),
            });
        }
        Ok(())
    }
}

/// Gen2 Query command parameters tuning anti-collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParameter {
    /// Divide ratio (0 = 8, 1 = 64/3).
    pub dr: u8,
    /// Miller cycle (0-3).
    pub cycle: u8,
    /// Pilot tone (0-1).
    pub trext: u8,
    /// Which tags respond (0-3).
    pub sel: u8,
    /// Inventory session (S0-S3).
    pub session: u8,
    /// Inventoried flag target (0 = A, 1 = B).
    pub target: u8,
    /// Slot count exponent Q (0-15).
    pub slot_number: u8,
}

impl Default for QueryParameter {
    fn default() -> Self {
        Self {
            dr: 0,
            cycle: 0,
            trext: 1,
            sel: 0,
            session: 0,
            target: 0,
            slot_number: 4,
        }
    }
}

impl QueryParameter {
    /// Checks every field against its Gen2 range.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("dr", self.dr, 1),
            ("cycle", self.cycle, 3),
            ("trext", self.trext, 1),
            ("sel", self.sel, 3),
            ("session", self.session, 3),
            ("target", self.target, 1),
            ("slot_number", self.slot_number, 15),
        ];
        for (name, value, max) in fields {
            if value > max {
                return Err(Error::InvalidParameter {
                    reason: format!("query {name} {value} out of range (0-{max})"),
                });
            }
        }
        Ok(())
    }
}

/// One tag reported during an inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UhfTagResult {
    /// Electronic product code.
    pub epc: Bytes,
    /// Protocol control word, when the session reports it.
    pub pc: Option<u16>,
    /// Signal strength in dBm, when the session reports it.
    pub rssi: Option<i8>,
}

impl UhfTagResult {
    /// Returns the EPC as uppercase hex.
    #[must_use]
    pub fn epc_hex(&self) -> String {
        hex::encode_upper(&self.epc)
    }

    /// Returns the shape this entry has.
    #[must_use]
    pub const fn data_type(&self) -> UhfDataType {
        match (self.rssi.is_some(), self.pc.is_some()) {
            (false, false) => UhfDataType::Epc,
            (false, true) => UhfDataType::PcEpc,
            (true, false) => UhfDataType::RssiEpc,
            (true, true) => UhfDataType::RssiPcEpc,
        }
    }
}

/// Reader RF output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UhfPowerLevel(u8);

impl UhfPowerLevel {
    /// Highest supported level.
    pub const MAX: u8 = 12;

    /// Creates a power level (0-12).
    pub fn new(level: u8) -> Result<Self> {
        if level > Self::MAX {
            return Err(Error::InvalidParameter {
                reason: format!("power level {level} out of range (0-{})", Self::MAX),
            });
        }
        Ok(Self(level))
    }

    /// Returns the raw level.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

/// Regulatory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UhfRegion {
    Us = 1,
    Kr = 2,
    Jp = 3,
    Eu = 4,
}

/// Lockable field of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    KillPassword,
    AccessPassword,
    Epc,
    Tid,
    User,
}

impl LockTarget {
    /// Bit positions `(mask, perm_mask, lock, perm_lock)` of this field.
    const fn bit_positions(self) -> (u32, u32, u32, u32) {
        match self {
            Self::KillPassword => (19, 18, 9, 8),
            Self::AccessPassword => (17, 16, 7, 6),
            Self::Epc => (15, 14, 5, 4),
            Self::Tid => (13, 12, 3, 2),
            Self::User => (11, 10, 1, 0),
        }
    }
}

/// Requested lock action for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockAction {
    /// Writable only with the access password.
    Lock,
    /// Writable without a password.
    Unlock,
    /// Permanently locked.
    PermanentLock,
    /// Permanently writable.
    PermanentUnlock,
}

/// Mask and action bits for one lockable field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldLockBits {
    pub mask: bool,
    pub lock: bool,
    pub perm_mask: bool,
    pub perm_lock: bool,
}

/// Gen2 lock payload as one record per field.
///
/// Packs to the 20-bit wire layout:
///
/// ```text
/// bit 19..10: mask / perm-mask pairs (kill, access, epc, tid, user)
/// bit  9..0 : lock / perm-lock pairs (kill, access, epc, tid, user)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockMask {
    pub kill_password: FieldLockBits,
    pub access_password: FieldLockBits,
    pub epc: FieldLockBits,
    pub tid: FieldLockBits,
    pub user: FieldLockBits,
}

impl LockMask {
    /// Builds a mask setting only the bits for `action` on `target`.
    ///
    /// Lock actions set the mask bit and the matching lock bit; unlock
    /// actions set the mask bit and leave the lock bit clear.
    #[must_use]
    pub fn for_action(target: LockTarget, action: LockAction) -> Self {
        let bits = match action {
            LockAction::Lock => FieldLockBits {
                mask: true,
                lock: true,
                ..FieldLockBits::default()
            },
            LockAction::PermanentLock => FieldLockBits {
                mask: true,
                perm_lock: true,
                ..FieldLockBits::default()
            },
            LockAction::Unlock => FieldLockBits {
                mask: true,
                ..FieldLockBits::default()
            },
            LockAction::PermanentUnlock => FieldLockBits {
                perm_mask: true,
                ..FieldLockBits::default()
            },
        };
        let mut mask = Self::default();
        *mask.field_mut(target) = bits;
        mask
    }

    /// Returns the bits of one field.
    #[must_use]
    pub const fn field(&self, target: LockTarget) -> FieldLockBits {
        match target {
            LockTarget::KillPassword => self.kill_password,
            LockTarget::AccessPassword => self.access_password,
            LockTarget::Epc => self.epc,
            LockTarget::Tid => self.tid,
            LockTarget::User => self.user,
        }
    }

    fn field_mut(&mut self, target: LockTarget) -> &mut FieldLockBits {
        match target {
            LockTarget::KillPassword => &mut self.kill_password,
            LockTarget::AccessPassword => &mut self.access_password,
            LockTarget::Epc => &mut self.epc,
            LockTarget::Tid => &mut self.tid,
            LockTarget::User => &mut self.user,
        }
    }

    const TARGETS: [LockTarget; 5] = [
        LockTarget::KillPassword,
        LockTarget::AccessPassword,
        LockTarget::Epc,
        LockTarget::Tid,
        LockTarget::User,
    ];

    /// Packs the record into the wire bitfield.
    #[must_use]
    pub fn pack(&self) -> u32 {
        Self::TARGETS.iter().fold(0u32, |acc, &target| {
            let (mask, perm_mask, lock, perm_lock) = target.bit_positions();
            let bits = self.field(target);
            acc | (u32::from(bits.mask) << mask)
                | (u32::from(bits.perm_mask) << perm_mask)
                | (u32::from(bits.lock) << lock)
                | (u32::from(bits.perm_lock) << perm_lock)
        })
    }

    /// Unpacks a wire bitfield; bits above 19 are ignored.
    #[must_use]
    pub fn unpack(raw: u32) -> Self {
        let mut out = Self::default();
        for target in Self::TARGETS {
            let (mask, perm_mask, lock, perm_lock) = target.bit_positions();
            *out.field_mut(target) = FieldLockBits {
                mask: raw & (1 << mask) != 0,
                lock: raw & (1 << lock) != 0,
                perm_mask: raw & (1 << perm_mask) != 0,
                perm_lock: raw & (1 << perm_lock) != 0,
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_MEMORY_MASK: u32 = 1 << 11;
    const USER_MEMORY_PERM_LOCK: u32 = 1;

    #[test]
    fn test_user_permanent_lock_sets_exactly_two_bits() {
        let mask = LockMask::for_action(LockTarget::User, LockAction::PermanentLock);
        assert_eq!(mask.pack(), USER_MEMORY_MASK | USER_MEMORY_PERM_LOCK);
    }

    #[test]
    fn test_lock_only_touches_requested_field() {
        let mask = LockMask::for_action(LockTarget::Epc, LockAction::Lock);
        assert_eq!(mask.pack(), (1 << 15) | (1 << 5));
        assert_eq!(mask.user, FieldLockBits::default());
        assert_eq!(mask.kill_password, FieldLockBits::default());
    }

    #[test]
    fn test_unlock_leaves_lock_bit_clear() {
        let mask = LockMask::for_action(LockTarget::AccessPassword, LockAction::Unlock);
        assert_eq!(mask.pack(), 1 << 17);
        let mask = LockMask::for_action(LockTarget::KillPassword, LockAction::PermanentUnlock);
        assert_eq!(mask.pack(), 1 << 18);
    }

    #[test]
    fn test_unpack_reverses_pack() {
        let raw = (1 << 19) | (1 << 9) | (1 << 12) | (1 << 2);
        let mask = LockMask::unpack(raw);
        assert!(mask.kill_password.mask && mask.kill_password.lock);
        assert!(mask.tid.perm_mask && mask.tid.perm_lock);
        assert_eq!(mask.pack(), raw);
    }

    #[test]
    fn test_select_validate_mask_length() {
        let select = SelectParameter::matching(MemoryBank::Epc, 32, vec![0xAA; 12]).unwrap();
        assert_eq!(select.bit_length, 96);
        assert!(select.validate().is_ok());

        let bad = SelectParameter {
            bit_length: 20,
            ..select
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_query_validate_ranges() {
        assert!(QueryParameter::default().validate().is_ok());
        let bad = QueryParameter {
            session: 4,
            ..QueryParameter::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_tag_result_shape() {
        let tag = UhfTagResult {
            epc: Bytes::from_static(&[0xE2, 0x00]),
            pc: Some(0x3000),
            rssi: None,
        };
        assert_eq!(tag.data_type(), UhfDataType::PcEpc);
        assert_eq!(tag.epc_hex(), "E200");
    }

    #[test]
    fn test_power_level_bounds() {
        assert!(UhfPowerLevel::new(12).is_ok());
        assert!(UhfPowerLevel::new(13).is_err());
    }
}
