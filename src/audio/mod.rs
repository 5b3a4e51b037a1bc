//! Audio capture and staging module

#[cfg(feature = "host-mic")]
mod capture;
mod source;
mod staging;

#[cfg(feature = "host-mic")]
pub use capture::CpalMicrophone;
pub use source::{
    is_capture_artifact, AudioSource, MicrophoneKind, MicrophonePins, PcmPeripheral,
    STARTUP_DRAIN_SAMPLES, STARTUP_SETTLE_MS,
};
pub use staging::StagingBuffer;
