//! Data types for KDC readers.
//!
//! - Device identity, connection state and reader information
//! - Decoded data records
//! - UHF parameters, tag results and lock masks
//! - Vendor error codes

pub mod device;
pub mod error_code;
pub mod record;
pub mod uhf;

pub use device::{
    BatteryStatus, ConnectionState, DeviceId, DeviceIdentity, DeviceInfo, DeviceSubtype,
    DeviceType, ScanTimeout, SleepTimeout,
};
pub use error_code::{
    ErrorCategory, ErrorSpace, PhychipsError, RodinBellError, VendorError, VendorErrorKind,
};
pub use record::{
    AppDataType, ApplicationData, BarcodeData, DataType, DeviceRecord, GpsData, KeyEvent,
    MsrCardType, MsrData, MsrDataType, NfcData, NfcDataFormat, NfcTagType, RecordPayload,
    TextEncoding, Timestamp, UhfTagList,
};
pub use uhf::{
    FieldLockBits, LockAction, LockMask, LockTarget, MemoryBank, QueryParameter,
    SelectParameter, UhfDataType, UhfPowerLevel, UhfRegion, UhfTagResult,
};
