//! Data module for configuration and credential management

mod config;
mod credential;

pub use config::{
    AppConfig, AsrConfig, AudioConfig, DeviceConfig, EndpointConfig, EndpointingConfig,
    LoggingConfig, MicrophoneConfig, SessionConfig,
};
pub use credential::CredentialStore;
