//! Application Configuration
//!
//! Handles loading and saving application configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::asr::{
    BITS_PER_SAMPLE, CHANNELS, CONFIG_ACK_TIMEOUT_MS, CONFIG_SETTLE_MS, DEFAULT_CLUSTER,
    DEFAULT_HOST, DEFAULT_PATH, DEFAULT_PORT, HANDSHAKE_TIMEOUT_MS, MAX_JSON_BYTES,
    MAX_RECORDING_SECONDS, RECONNECT_DELAY_MS, SAMPLES_PER_READ, SAMPLE_RATE, SEND_BATCH_BYTES,
    SILENCE_TIMEOUT_MS, STABLE_RESULT_REPEATS,
};
use crate::audio::{MicrophoneKind, MicrophonePins};
use crate::error::AsrError;

/// Recognition client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub endpointing: EndpointingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_cluster() -> String {
    DEFAULT_CLUSTER.to_string()
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            cluster: default_cluster(),
            endpoint: EndpointConfig::default(),
            audio: AudioConfig::default(),
            endpointing: EndpointingConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl AsrConfig {
    pub fn new(api_key: &str, cluster: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            cluster: cluster.to_string(),
            ..Default::default()
        }
    }

    /// Reject settings the streaming core cannot honour
    pub fn validate(&self) -> Result<(), AsrError> {
        if self.api_key.is_empty() {
            return Err(AsrError::Config("api_key is not set".into()));
        }
        self.audio.validate()?;
        if self.endpointing.stable_result_repeats == 0 {
            return Err(AsrError::Config("stable_result_repeats must be at least 1".into()));
        }
        if self.endpoint.host.is_empty() || !self.endpoint.path.starts_with('/') {
            return Err(AsrError::Config(format!(
                "invalid endpoint {}{}",
                self.endpoint.host, self.endpoint.path
            )));
        }
        Ok(())
    }
}

/// Websocket endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Fail the handshake when Sec-WebSocket-Accept does not match
    #[serde(default)]
    pub verify_accept: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    HANDSHAKE_TIMEOUT_MS
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            verify_accept: false,
        }
    }
}

/// Capture format and pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_samples_per_read")]
    pub samples_per_read: usize,
    #[serde(default = "default_send_batch_bytes")]
    pub send_batch_bytes: usize,
}

fn default_sample_rate() -> u32 {
    SAMPLE_RATE
}

fn default_bits_per_sample() -> u16 {
    BITS_PER_SAMPLE
}

fn default_channels() -> u16 {
    CHANNELS
}

fn default_samples_per_read() -> usize {
    SAMPLES_PER_READ
}

fn default_send_batch_bytes() -> usize {
    SEND_BATCH_BYTES
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            bits_per_sample: BITS_PER_SAMPLE,
            channels: CHANNELS,
            samples_per_read: SAMPLES_PER_READ,
            send_batch_bytes: SEND_BATCH_BYTES,
        }
    }
}

impl AudioConfig {
    /// Only 16 kHz, 16-bit mono PCM is streamed
    pub fn validate(&self) -> Result<(), AsrError> {
        if self.sample_rate != SAMPLE_RATE
            || self.bits_per_sample != BITS_PER_SAMPLE
            || self.channels != CHANNELS
        {
            return Err(AsrError::Config(format!(
                "unsupported audio format {} Hz / {} bit / {} ch",
                self.sample_rate, self.bits_per_sample, self.channels
            )));
        }
        if self.samples_per_read == 0 {
            return Err(AsrError::Config("samples_per_read must be positive".into()));
        }
        if self.send_batch_bytes < 2 || self.send_batch_bytes % 2 != 0 {
            return Err(AsrError::Config(format!(
                "send_batch_bytes must be a positive even number, got {}",
                self.send_batch_bytes
            )));
        }
        Ok(())
    }

    /// Staging buffer capacity in samples
    pub fn batch_samples(&self) -> usize {
        self.send_batch_bytes / 2
    }
}

/// End-of-utterance heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointingConfig {
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,
    #[serde(default = "default_stable_result_repeats")]
    pub stable_result_repeats: u32,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u32,
}

fn default_silence_timeout_ms() -> u64 {
    SILENCE_TIMEOUT_MS
}

fn default_stable_result_repeats() -> u32 {
    STABLE_RESULT_REPEATS
}

fn default_max_seconds() -> u32 {
    MAX_RECORDING_SECONDS
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: SILENCE_TIMEOUT_MS,
            stable_result_repeats: STABLE_RESULT_REPEATS,
            max_seconds: MAX_RECORDING_SECONDS,
        }
    }
}

/// Session boundary behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_config_settle_ms")]
    pub config_settle_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Wait for the server to acknowledge the config instead of a fixed settle
    #[serde(default)]
    pub await_config_ack: bool,
    #[serde(default = "default_config_ack_timeout_ms")]
    pub config_ack_timeout_ms: u64,
    #[serde(default = "default_max_json_bytes")]
    pub max_json_bytes: usize,
}

fn default_config_settle_ms() -> u64 {
    CONFIG_SETTLE_MS
}

fn default_reconnect_delay_ms() -> u64 {
    RECONNECT_DELAY_MS
}

fn default_config_ack_timeout_ms() -> u64 {
    CONFIG_ACK_TIMEOUT_MS
}

fn default_max_json_bytes() -> usize {
    MAX_JSON_BYTES
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            config_settle_ms: CONFIG_SETTLE_MS,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            await_config_ack: false,
            config_ack_timeout_ms: CONFIG_ACK_TIMEOUT_MS,
            max_json_bytes: MAX_JSON_BYTES,
        }
    }
}

/// Application configuration for the host binary
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub asr: AsrConfig,
    #[serde(default)]
    pub microphone: MicrophoneConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Load configuration from file or create default
    pub fn load_or_default() -> Result<Self> {
        let path = Self::config_path();

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            let config = AppConfig::default();
            config.save()?;
            config
        };

        if let Ok(key) = std::env::var("ASR_API_KEY") {
            config.asr.api_key = key;
        }
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }
}

/// Microphone front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrophoneConfig {
    #[serde(default = "default_microphone_kind")]
    pub kind: MicrophoneKind,
    #[serde(default = "default_pins")]
    pub pins: MicrophonePins,
}

fn default_microphone_kind() -> MicrophoneKind {
    MicrophoneKind::StandardI2s
}

fn default_pins() -> MicrophonePins {
    MicrophonePins::StandardI2s {
        sck: 4,
        ws: 5,
        sd: 6,
    }
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            kind: default_microphone_kind(),
            pins: default_pins(),
        }
    }
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    /// MAC address used as the stable uid; generated and saved when absent
    #[serde(default)]
    pub mac: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}
