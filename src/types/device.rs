//! Device identity, connection state and reader information types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::error_code::ErrorSpace;

/// Stable identifier of a KDC device, unchanged across scans and reconnects.
///
/// For serial devices this is the port path, for BLE peripherals the
/// platform identifier, for accessories the accessory serial number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Transport family of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Serial port (Bluetooth SPP or USB CDC).
    Serial,
    /// Platform external accessory session.
    Accessory,
    /// Bluetooth Low Energy peripheral.
    Ble,
}

/// Transport sub-kind of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSubtype {
    /// Serial port over Bluetooth SPP.
    Spp,
    /// Serial port over USB CDC.
    Cdc,
    /// External accessory.
    Accessory,
    /// Bluetooth Classic.
    BluetoothClassic,
    /// Bluetooth Smart (GATT).
    BluetoothSmart,
}

impl DeviceSubtype {
    /// Returns true if this subtype is valid for the given device type.
    #[must_use]
    pub const fn belongs_to(self, device_type: DeviceType) -> bool {
        matches!(
            (device_type, self),
            (DeviceType::Serial, Self::Spp | Self::Cdc)
                | (DeviceType::Accessory, Self::Accessory | Self::BluetoothClassic)
                | (DeviceType::Ble, Self::BluetoothSmart)
        )
    }
}

/// Immutable identity of a discovered device.
///
/// `address` is the handle the transport uses to reach the device (a port
/// path, a peripheral address). Higher layers share the identity through
/// `Arc` and never rewrite it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Stable identifier.
    pub id: DeviceId,
    /// Transport family.
    pub device_type: DeviceType,
    /// Transport sub-kind.
    pub subtype: DeviceSubtype,
    /// Display name.
    pub name: String,
    /// Transport address.
    pub address: String,
}

impl DeviceIdentity {
    /// Creates a serial-port identity; the port path doubles as identifier.
    #[must_use]
    pub fn serial(port: impl Into<String>, subtype: DeviceSubtype, name: impl Into<String>) -> Self {
        let port = port.into();
        Self {
            id: DeviceId::new(port.clone()),
            device_type: DeviceType::Serial,
            subtype,
            name: name.into(),
            address: port,
        }
    }

    /// Creates a BLE peripheral identity.
    #[must_use]
    pub fn ble(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(id),
            device_type: DeviceType::Ble,
            subtype: DeviceSubtype::BluetoothSmart,
            name: name.into(),
            address: address.into(),
        }
    }

    /// Creates an external accessory identity.
    #[must_use]
    pub fn accessory(serial_number: impl Into<String>, name: impl Into<String>) -> Self {
        let serial_number = serial_number.into();
        Self {
            id: DeviceId::new(serial_number.clone()),
            device_type: DeviceType::Accessory,
            subtype: DeviceSubtype::Accessory,
            name: name.into(),
            address: serial_number,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Connection state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    None = 0,
    /// Listening for an incoming connection.
    Listening = 1,
    /// Connection attempt in progress.
    Connecting = 2,
    /// Connected and usable.
    Connected = 3,
    /// Connection dropped by the transport.
    Lost = 4,
    /// Connection attempt failed.
    Failed = 5,
    /// Post-connect handshake in progress.
    Initializing = 7,
    /// Post-connect handshake failed.
    InitializingFailed = 8,
}

impl ConnectionState {
    /// Returns true if the transport link is up in this state.
    #[must_use]
    pub const fn is_linked(self) -> bool {
        matches!(self, Self::Connected | Self::Initializing)
    }

    /// Returns true if the state ends a connection attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::InitializingFailed | Self::Lost)
    }

    /// Returns true if the lifecycle allows moving from `self` to `next`.
    ///
    /// Any state may return to `None` (explicit disconnect). `Listening`
    /// is optional before `Connecting`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{
            Connected, Connecting, Failed, Initializing, InitializingFailed, Listening, Lost, None,
        };
        matches!(
            (self, next),
            (_, None)
                | (None, Listening | Connecting)
                | (Listening | Lost | Failed | InitializingFailed, Connecting)
                | (Connecting, Connected | Failed)
                | (Connected, Initializing | Lost)
                | (Initializing, Connected | InitializingFailed | Lost)
        )
    }
}

/// Reader information returned by the post-connect handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Firmware major version.
    pub firmware_major: u8,
    /// Firmware minor version.
    pub firmware_minor: u8,
    /// Error code space of the installed UHF module.
    pub error_space: ErrorSpace,
    /// Model name.
    pub model: String,
}

impl DeviceInfo {
    /// Returns the firmware version as `major.minor`.
    #[must_use]
    pub fn firmware(&self) -> String {
        format!("{}.{}", self.firmware_major, self.firmware_minor)
    }
}

/// Battery level in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// Charge level (0-100).
    pub percent: u8,
    /// True while the reader is on external power.
    pub charging: bool,
}

/// Idle time after which the reader goes to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SleepTimeout {
    Disabled = 0,
    Secs1 = 1,
    Secs2 = 2,
    Secs3 = 3,
    Secs4 = 4,
    Secs5 = 5,
    Secs10 = 10,
    Secs20 = 20,
    Secs30 = 30,
    Secs60 = 60,
    Secs120 = 120,
    Secs300 = 300,
    Secs600 = 600,
}

impl SleepTimeout {
    /// Parses a sleep timeout from its wire value in seconds.
    #[must_use]
    pub const fn from_secs(secs: u16) -> Option<Self> {
        match secs {
            0 => Some(Self::Disabled),
            1 => Some(Self::Secs1),
            2 => Some(Self::Secs2),
            3 => Some(Self::Secs3),
            4 => Some(Self::Secs4),
            5 => Some(Self::Secs5),
            10 => Some(Self::Secs10),
            20 => Some(Self::Secs20),
            30 => Some(Self::Secs30),
            60 => Some(Self::Secs60),
            120 => Some(Self::Secs120),
            300 => Some(Self::Secs300),
            600 => Some(Self::Secs600),
            _ => None,
        }
    }
}

/// Maximum time the scan engine stays on per trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ScanTimeout {
    Ms500 = 500,
    Ms1000 = 1000,
    Ms2000 = 2000,
    Ms3000 = 3000,
    Ms4000 = 4000,
    Ms5000 = 5000,
    Ms6000 = 6000,
    Ms7000 = 7000,
    Ms8000 = 8000,
    Ms9000 = 9000,
    Ms10000 = 10000,
}

impl ScanTimeout {
    /// Parses a scan timeout from its wire value in milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u16) -> Option<Self> {
        match ms {
            500 => Some(Self::Ms500),
            1000 => Some(Self::Ms1000),
            2000 => Some(Self::Ms2000),
            3000 => Some(Self::Ms3000),
            4000 => Some(Self::Ms4000),
            5000 => Some(Self::Ms5000),
            6000 => Some(Self::Ms6000),
            7000 => Some(Self::Ms7000),
            8000 => Some(Self::Ms8000),
            9000 => Some(Self::Ms9000),
            10000 => Some(Self::Ms10000),
            _ => None,
        }
    }
}
