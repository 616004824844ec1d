//! UHF vendor error codes.
//!
//! Two chipset families report errors in separate code spaces:
//!
//! ```text
//! 0.5W modules (Phychips)            1.0W modules (RodinBell)
//! 0x00        success                0x5011 - 0x5057 error codes
//! 0x01 - 0x0F EPC Gen2 v2 tag errors
//! 0x10 - 0x7F vendor specific
//! 0x80 - 0x8F protocol
//! 0x90 - 0x9F modem
//! 0xA0 - 0xAF registry
//! 0xB0 - 0xBF peripheral bus
//! 0xC0 - 0xDF reserved
//! 0xE0 - 0xFF custom
//! 0x100       common error (no response, unsupported)
//! ```
//!
//! The raw code is always kept next to the decoded meaning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Code space a device reports UHF errors in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSpace {
    /// Phychips chipset (0.5W modules).
    #[default]
    Phychips,
    /// RodinBell chipset (1.0W modules).
    RodinBell,
}

impl ErrorSpace {
    /// Parses the chipset byte reported in device info.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::RodinBell,
            _ => Self::Phychips,
        }
    }
}

/// Range a code falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Success,
    Common,
    Gen2,
    VendorSpecific,
    Protocol,
    Modem,
    Registry,
    Peripheral,
    Reserved,
    Custom,
    RodinBell,
    Unknown,
}

impl ErrorCategory {
    /// Classifies a raw code within a code space.
    #[must_use]
    pub const fn classify(raw: u16, space: ErrorSpace) -> Self {
        match (space, raw) {
            (_, 0x00) => Self::Success,
            (_, 0x100) => Self::Common,
            (ErrorSpace::Phychips, 0x01..=0x0F) => Self::Gen2,
            (ErrorSpace::Phychips, 0x10..=0x7F) => Self::VendorSpecific,
            (ErrorSpace::Phychips, 0x80..=0x8F) => Self::Protocol,
            (ErrorSpace::Phychips, 0x90..=0x9F) => Self::Modem,
            (ErrorSpace::Phychips, 0xA0..=0xAF) => Self::Registry,
            (ErrorSpace::Phychips, 0xB0..=0xBF) => Self::Peripheral,
            (ErrorSpace::Phychips, 0xC0..=0xDF) => Self::Reserved,
            (ErrorSpace::Phychips, 0xE0..=0xFF) => Self::Custom,
            (ErrorSpace::RodinBell, 0x5011..=0x5057) => Self::RodinBell,
            _ => Self::Unknown,
        }
    }
}

/// Known Phychips error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PhychipsError {
    NotSupported = 0x01,
    InsufficientPrivileges = 0x02,
    MemoryOverrun = 0x03,
    MemoryLocked = 0x04,
    CryptoSuiteError = 0x05,
    CommandNotEncapsulated = 0x06,
    ResponseBufferOverflow = 0x07,
    SecurityTimeout = 0x08,
    InsufficientPower = 0x0B,
    NonSpecificError = 0x0F,
    SensorSchedulingConfig = 0x11,
    TagBusy = 0x12,
    MeasurementTypeNotSupported = 0x13,
    NoTagDetected = 0x80,
    HandleAcquisitionFailed = 0x81,
    AccessPasswordFailed = 0x82,
    CrcError = 0x90,
    RxTimeout = 0x91,
    RegistryUpdateFailed = 0xA0,
    RegistryEraseFailed = 0xA1,
    RegistryWriteFailed = 0xA2,
    RegistryNotExist = 0xA3,
    UartFailed = 0xB0,
    SpiFailed = 0xB1,
    I2cFailed = 0xB2,
    GpioFailed = 0xB3,
    NotSupportedCommand = 0xE0,
    UndefinedCommand = 0xE1,
    InvalidParameter = 0xE2,
    TooHighParameter = 0xE3,
    TooLowParameter = 0xE4,
    AutoReadOperationFailed = 0xE5,
    NotAutoReadMode = 0xE6,
    GetLastResponseFailed = 0xE7,
    ControlTestFailed = 0xE8,
    ResetReaderFailed = 0xE9,
    RfidBlockControlFailed = 0xEA,
    AutoReadInOperation = 0xEB,
    UndefinedOtherError = 0xF0,
    VerifyWriteOperationFailed = 0xF1,
    AbnormalAntenna = 0xFC,
    NotTagSelected = 0xFE,
    NoneError = 0xFF,
    CommonError = 0x100,
}

impl PhychipsError {
    /// Looks up a known Phychips code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x01 => Self::NotSupported,
            0x02 => Self::InsufficientPrivileges,
            0x03 => Self::MemoryOverrun,
            0x04 => Self::MemoryLocked,
            0x05 => Self::CryptoSuiteError,
            0x06 => Self::CommandNotEncapsulated,
            0x07 => Self::ResponseBufferOverflow,
            0x08 => Self::SecurityTimeout,
            0x0B => Self::InsufficientPower,
            0x0F => Self::NonSpecificError,
            0x11 => Self::SensorSchedulingConfig,
            0x12 => Self::TagBusy,
            0x13 => Self::MeasurementTypeNotSupported,
            0x80 => Self::NoTagDetected,
            0x81 => Self::HandleAcquisitionFailed,
            0x82 => Self::AccessPasswordFailed,
            0x90 => Self::CrcError,
            0x91 => Self::RxTimeout,
            0xA0 => Self::RegistryUpdateFailed,
            0xA1 => Self::RegistryEraseFailed,
            0xA2 => Self::RegistryWriteFailed,
            0xA3 => Self::RegistryNotExist,
            0xB0 => Self::UartFailed,
            0xB1 => Self::SpiFailed,
            0xB2 => Self::I2cFailed,
            0xB3 => Self::GpioFailed,
            0xE0 => Self::NotSupportedCommand,
            0xE1 => Self::UndefinedCommand,
            0xE2 => Self::InvalidParameter,
            0xE3 => Self::TooHighParameter,
            0xE4 => Self::TooLowParameter,
            0xE5 => Self::AutoReadOperationFailed,
            0xE6 => Self::NotAutoReadMode,
            0xE7 => Self::GetLastResponseFailed,
            0xE8 => Self::ControlTestFailed,
            0xE9 => Self::ResetReaderFailed,
            0xEA => Self::RfidBlockControlFailed,
            0xEB => Self::AutoReadInOperation,
            0xF0 => Self::UndefinedOtherError,
            0xF1 => Self::VerifyWriteOperationFailed,
            0xFC => Self::AbnormalAntenna,
            0xFE => Self::NotTagSelected,
            0xFF => Self::NoneError,
            0x100 => Self::CommonError,
            _ => return None,
        })
    }
}

/// Known RodinBell error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RodinBellError {
    CommandError = 0x5011,
    McuResetError = 0x5020,
    CwOnError = 0x5021,
    AntennaMissing = 0x5022,
    WriteFlashError = 0x5023,
    ReadFlashError = 0x5024,
    SetOutputPowerError = 0x5025,
    TagInventoryError = 0x5031,
    TagReadError = 0x5032,
    TagWriteError = 0x5033,
    TagLockError = 0x5034,
    TagKillError = 0x5035,
    NoTagError = 0x5036,
    InventoryAccessError = 0x5037,
    BufferIsEmpty = 0x5038,
    AccessPasswordError = 0x5040,
    ParameterError = 0x5041,
    WordCountTooLong = 0x5042,
    MembankOutOfRange = 0x5043,
    LockRegionOutOfRange = 0x5044,
    LockActionOutOfRange = 0x5045,
    AddressError = 0x5046,
    AntennaIdOutOfRange = 0x5047,
    OutputPowerOutOfRange = 0x5048,
    FrequencyRegionOutOfRange = 0x5049,
    BaudrateOutOfRange = 0x504A,
    BeeperModeOutOfRange = 0x504B,
    EpcMatchLengthTooLong = 0x504C,
    EpcMatchLengthError = 0x504D,
    EpcMatchModeError = 0x504E,
    FrequencyRangeError = 0x504F,
    GetRn16Error = 0x5050,
    DrmModeError = 0x5051,
    PllLockError = 0x5052,
    RfChipNoResponse = 0x5053,
    AchieveOutputPowerError = 0x5054,
    FirmwareAuthenticationError = 0x5055,
    SpectrumRegulationError = 0x5056,
    OutputPowerTooLow = 0x5057,
}

impl RodinBellError {
    /// Looks up a known RodinBell code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x5011 => Self::CommandError,
            0x5020 => Self::McuResetError,
            0x5021 => Self::CwOnError,
            0x5022 => Self::AntennaMissing,
            0x5023 => Self::WriteFlashError,
            0x5024 => Self::ReadFlashError,
            0x5025 => Self::SetOutputPowerError,
            0x5031 => Self::TagInventoryError,
            0x5032 => Self::TagReadError,
            0x5033 => Self::TagWriteError,
            0x5034 => Self::TagLockError,
            0x5035 => Self::TagKillError,
            0x5036 => Self::NoTagError,
            0x5037 => Self::InventoryAccessError,
            0x5038 => Self::BufferIsEmpty,
            0x5040 => Self::AccessPasswordError,
            0x5041 => Self::ParameterError,
            0x5042 => Self::WordCountTooLong,
            0x5043 => Self::MembankOutOfRange,
            0x5044 => Self::LockRegionOutOfRange,
            0x5045 => Self::LockActionOutOfRange,
            0x5046 => Self::AddressError,
            0x5047 => Self::AntennaIdOutOfRange,
            0x5048 => Self::OutputPowerOutOfRange,
            0x5049 => Self::FrequencyRegionOutOfRange,
            0x504A => Self::BaudrateOutOfRange,
            0x504B => Self::BeeperModeOutOfRange,
            0x504C => Self::EpcMatchLengthTooLong,
            0x504D => Self::EpcMatchLengthError,
            0x504E => Self::EpcMatchModeError,
            0x504F => Self::FrequencyRangeError,
            0x5050 => Self::GetRn16Error,
            0x5051 => Self::DrmModeError,
            0x5052 => Self::PllLockError,
            0x5053 => Self::RfChipNoResponse,
            0x5054 => Self::AchieveOutputPowerError,
            0x5055 => Self::FirmwareAuthenticationError,
            0x5056 => Self::SpectrumRegulationError,
            0x5057 => Self::OutputPowerTooLow,
            _ => return None,
        })
    }
}

/// Decoded meaning of a vendor code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorErrorKind {
    Phychips(PhychipsError),
    RodinBell(RodinBellError),
    /// Code not in the table of the active space.
    Unlisted,
}

/// A vendor error code as reported by the device, with its decoded meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VendorError {
    /// Code exactly as received.
    pub raw: u16,
    /// Code space active on the device that reported it.
    pub space: ErrorSpace,
    /// Range the code falls into.
    pub category: ErrorCategory,
    /// Named code, if known.
    pub kind: VendorErrorKind,
}

impl VendorError {
    /// Decodes a raw code in the given space.
    #[must_use]
    pub const fn new(raw: u16, space: ErrorSpace) -> Self {
        let kind = match space {
            ErrorSpace::Phychips => match PhychipsError::from_code(raw) {
                Some(e) => VendorErrorKind::Phychips(e),
                None => VendorErrorKind::Unlisted,
            },
            ErrorSpace::RodinBell => match RodinBellError::from_code(raw) {
                Some(e) => VendorErrorKind::RodinBell(e),
                None => VendorErrorKind::Unlisted,
            },
        };
        Self {
            raw,
            space,
            category: ErrorCategory::classify(raw, space),
            kind,
        }
    }

    /// The common "no response / unsupported" code.
    #[must_use]
    pub const fn common(space: ErrorSpace) -> Self {
        Self::new(0x100, space)
    }

    /// Returns true for the success code.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.raw == 0
    }
}

impl fmt::Display for VendorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VendorErrorKind::Phychips(e) => write!(f, "{e:?} (0x{:04X})", self.raw),
            VendorErrorKind::RodinBell(e) => write!(f, "{e:?} (0x{:04X})", self.raw),
            VendorErrorKind::Unlisted => {
                write!(f, "{:?} error 0x{:04X}", self.category, self.raw)
            }
        }
    }
}
