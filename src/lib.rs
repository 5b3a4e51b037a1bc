//! Streaming speech recognition for microcontroller microphones.
//!
//! Microphone samples are batched into 200 ms chunks and streamed over a
//! TLS websocket to a cloud ASR service using its binary JSON protocol.
//! Everything runs on one execution context: the host calls
//! [`RecognitionController::step`] from its loop and receives transcripts
//! through callbacks.

pub mod asr;
pub mod audio;
pub mod business;
pub mod data;
pub mod error;
pub mod platform;

pub use business::{RecognitionController, SessionState};
pub use data::AsrConfig;
pub use error::{AsrError, AsrResult};
