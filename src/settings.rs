//! Per-device settings and the persistence seam.
//!
//! Settings are stored as an opaque JSON blob per device identifier. The
//! store itself is a host collaborator; [`MemorySettingsStore`] keeps them
//! for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::AesKeyLength;
use crate::error::{Error, Result};
use crate::types::{DeviceId, ErrorSpace, NfcDataFormat, TextEncoding, UhfDataType};

/// Key/value store for settings blobs.
pub trait SettingsStore: Send + Sync {
    /// Returns the blob stored for a device.
    fn get(&self, device: &DeviceId) -> Result<Option<Bytes>>;

    /// Stores the blob for a device.
    fn put(&self, device: &DeviceId, blob: Bytes) -> Result<()>;
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<DeviceId, Bytes>>,
}

impl MemorySettingsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, device: &DeviceId) -> Result<Option<Bytes>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(device).cloned())
    }

    fn put(&self, device: &DeviceId, blob: Bytes) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(device.clone(), blob);
        Ok(())
    }
}

/// Configuration remembered per device across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Inventory record shape.
    pub uhf_data_type: UhfDataType,
    /// Drop repeated EPCs within one inventory.
    pub suppress_duplicates: bool,
    /// Character set of record text views.
    pub text_encoding: TextEncoding,
    /// Error code space of the UHF module, learned from device info.
    pub error_space: ErrorSpace,
    /// AES key length configured for MSR encryption.
    pub msr_key_length: AesKeyLength,
    /// NFC record layout.
    pub nfc_data_format: NfcDataFormat,
}

impl DeviceSettings {
    /// Serializes the settings.
    pub fn to_blob(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::Settings {
                reason: e.to_string(),
            })
    }

    /// Deserializes settings; missing fields take their defaults.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        serde_json::from_slice(blob).map_err(|e| Error::Settings {
            reason: e.to_string(),
        })
    }

    /// Loads settings for a device, or defaults if none are stored.
    pub fn load(store: &dyn SettingsStore, device: &DeviceId) -> Result<Self> {
        match store.get(device)? {
            Some(blob) => Self::from_blob(&blob),
            None => Ok(Self::default()),
        }
    }

    /// Stores settings for a device.
    pub fn save(&self, store: &dyn SettingsStore, device: &DeviceId) -> Result<()> {
        store.put(device, self.to_blob()?)
    }
}
