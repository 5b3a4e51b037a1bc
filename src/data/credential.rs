//! Credential Store
//!
//! Resolves the API key and the stable device identity for the host binary.

use anyhow::{anyhow, Result};

use crate::data::AppConfig;
use crate::platform::{DeviceId, RandomSource};

/// Credentials needed before the first connect
pub struct CredentialStore {
    api_key: String,
    device_id: DeviceId,
}

impl CredentialStore {
    /// Resolve credentials, generating and persisting a device id when none is configured
    pub fn ensure(config: &mut AppConfig, random: &dyn RandomSource) -> Result<Self> {
        if config.asr.api_key.is_empty() {
            return Err(anyhow!(
                "No API key configured: set asr.api_key in {:?} or ASR_API_KEY",
                AppConfig::config_path()
            ));
        }

        let device_id = match config.device.mac.as_deref() {
            Some(mac) => {
                tracing::info!("Using configured device id");
                DeviceId::from_hex(mac)?
            }
            None => {
                let device_id = DeviceId::generate(random);
                config.device.mac = Some(device_id.uid());
                config.save()?;
                tracing::info!("Generated device id {}", device_id.uid());
                device_id
            }
        };

        Ok(Self {
            api_key: config.asr.api_key.clone(),
            device_id,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}
