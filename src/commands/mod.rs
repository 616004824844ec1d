//! Command handlers for KDC reader operations.
//!
//! Every command goes through the device's [`Correlator`], so commands from
//! any number of callers reach the reader one at a time in call order.
//! Failed responses surface the vendor error code verbatim as
//! [`Error::Protocol`], interpreted in the device's error code space.

pub mod correlator;
pub mod uhf;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::crypto::AesKeyLength;
use crate::error::{Error, FrameError, Result};
use crate::protocol::{Command, Opcode, parse_battery, parse_device_info, parse_u16_le};
use crate::settings::DeviceSettings;
use crate::types::{
    BatteryStatus, DeviceInfo, ErrorSpace, MsrCardType, MsrDataType, NfcDataFormat, ScanTimeout,
    SleepTimeout, UhfDataType, UhfPowerLevel, UhfRegion,
};

pub use correlator::{Correlator, DEFAULT_TIMEOUT};
pub use uhf::{InventoryReport, UhfEngine};

/// Magstripe reader configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsrSettings {
    /// Card format swipes are decoded as.
    pub card_type: MsrCardType,
    /// Whether track data is sent bare or with packet framing.
    pub data_type: MsrDataType,
    /// AES key length, or `None` for plain output.
    pub encryption: Option<AesKeyLength>,
}

/// Command handler for one reader.
#[derive(Clone)]
pub struct CommandHandler {
    correlator: Arc<Correlator>,
    settings: Arc<RwLock<DeviceSettings>>,
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

fn unexpected(opcode: Opcode, err: &FrameError) -> Error {
    tracing::warn!("failed to parse response to {:?}: {}", opcode, err);
    Error::UnexpectedResponse {
        opcode: opcode as u8,
    }
}

impl CommandHandler {
    /// Creates a command handler.
    #[must_use]
    pub const fn new(correlator: Arc<Correlator>, settings: Arc<RwLock<DeviceSettings>>) -> Self {
        Self {
            correlator,
            settings,
        }
    }

    /// Returns the correlator.
    #[must_use]
    pub const fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Returns the error code space of the connected reader.
    #[must_use]
    pub fn error_space(&self) -> ErrorSpace {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .error_space
    }

    /// Returns a snapshot of the session settings.
    #[must_use]
    pub fn settings(&self) -> DeviceSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update_settings(&self, update: impl FnOnce(&mut DeviceSettings)) {
        update(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Sends a command and returns the response body.
    pub async fn execute(&self, opcode: Opcode, params: Bytes) -> Result<Option<Bytes>> {
        self.execute_with_timeout(opcode, params, self.correlator.timeout())
            .await
    }

    /// Sends a command with an explicit timeout.
    pub async fn execute_with_timeout(
        &self,
        opcode: Opcode,
        params: Bytes,
        timeout: Duration,
    ) -> Result<Option<Bytes>> {
        let command = Command::new(self.correlator.next_token(), opcode, params);
        let response = self.correlator.issue_with_timeout(command, timeout).await?;
        response.into_result(self.error_space())
    }

    /// Sends a command that must answer with a body.
    async fn query(&self, opcode: Opcode, params: Bytes) -> Result<Bytes> {
        self.execute(opcode, params)
            .await?
            .ok_or(Error::UnexpectedResponse {
                opcode: opcode as u8,
            })
    }

    async fn set(&self, opcode: Opcode, params: &[u8]) -> Result<()> {
        self.execute(opcode, Bytes::copy_from_slice(params)).await?;
        Ok(())
    }

    // ==================== Reader Commands ====================

    /// Reads firmware version, UHF chipset and model.
    pub async fn get_device_info(&self) -> Result<DeviceInfo> {
        let body = self.query(Opcode::GetDeviceInfo, Bytes::new()).await?;
        parse_device_info(&body).map_err(|e| unexpected(Opcode::GetDeviceInfo, &e))
    }

    /// Reads the battery level.
    pub async fn get_battery(&self) -> Result<BatteryStatus> {
        let body = self.query(Opcode::GetBattery, Bytes::new()).await?;
        parse_battery(&body).map_err(|e| unexpected(Opcode::GetBattery, &e))
    }

    /// Reads the sleep timeout.
    pub async fn get_sleep_timeout(&self) -> Result<SleepTimeout> {
        let body = self.query(Opcode::GetSleepTimeout, Bytes::new()).await?;
        let secs = parse_u16_le(&body).map_err(|e| unexpected(Opcode::GetSleepTimeout, &e))?;
        SleepTimeout::from_secs(secs).ok_or(Error::UnexpectedResponse {
            opcode: Opcode::GetSleepTimeout as u8,
        })
    }

    /// Sets the sleep timeout.
    pub async fn set_sleep_timeout(&self, timeout: SleepTimeout) -> Result<()> {
        self.set(Opcode::SetSleepTimeout, &(timeout as u16).to_le_bytes())
            .await
    }

    /// Reads the scan timeout.
    pub async fn get_scan_timeout(&self) -> Result<ScanTimeout> {
        let body = self.query(Opcode::GetScanTimeout, Bytes::new()).await?;
        let ms = parse_u16_le(&body).map_err(|e| unexpected(Opcode::GetScanTimeout, &e))?;
        ScanTimeout::from_millis(ms).ok_or(Error::UnexpectedResponse {
            opcode: Opcode::GetScanTimeout as u8,
        })
    }

    /// Sets the scan timeout.
    pub async fn set_scan_timeout(&self, timeout: ScanTimeout) -> Result<()> {
        self.set(Opcode::SetScanTimeout, &(timeout as u16).to_le_bytes())
            .await
    }

    /// Selects the NFC record layout.
    pub async fn set_nfc_data_format(&self, format: NfcDataFormat) -> Result<()> {
        self.set(Opcode::SetNfcDataFormat, &[format as u8]).await?;
        self.update_settings(|s| s.nfc_data_format = format);
        Ok(())
    }

    /// Configures the magstripe reader.
    pub async fn set_msr_settings(&self, settings: MsrSettings) -> Result<()> {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u8(settings.card_type as u8);
        buf.put_u8(settings.data_type as u8);
        buf.put_u8(u8::from(settings.encryption.is_some()));
        buf.put_u8(settings.encryption.unwrap_or_default() as u8);
        self.execute(Opcode::SetMsrSettings, buf.freeze()).await?;
        if let Some(key_length) = settings.encryption {
            self.update_settings(|s| s.msr_key_length = key_length);
        }
        Ok(())
    }

    // ==================== UHF Module Commands ====================

    /// Reads the RF power level.
    pub async fn uhf_get_power(&self) -> Result<UhfPowerLevel> {
        let body = self.query(Opcode::UhfGetPower, Bytes::new()).await?;
        body.first()
            .and_then(|&level| UhfPowerLevel::new(level).ok())
            .ok_or(Error::UnexpectedResponse {
                opcode: Opcode::UhfGetPower as u8,
            })
    }

    /// Sets the RF power level.
    pub async fn uhf_set_power(&self, level: UhfPowerLevel) -> Result<()> {
        self.set(Opcode::UhfSetPower, &[level.value()]).await
    }

    /// Selects the RF region.
    pub async fn uhf_set_region(&self, region: UhfRegion) -> Result<()> {
        self.set(Opcode::UhfSetRegion, &[region as u8]).await
    }

    /// Selects the inventory record shape for this session.
    pub async fn uhf_set_data_type(&self, data_type: UhfDataType) -> Result<()> {
        self.set(Opcode::UhfSetDataType, &[data_type as u8]).await?;
        self.update_settings(|s| s.uhf_data_type = data_type);
        Ok(())
    }
}
