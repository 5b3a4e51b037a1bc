//! Business logic module
//!
//! Contains the recognition state machine driven by the host loop.

mod recognition_controller;
mod session;

pub use recognition_controller::{NoSpeechCallback, RecognitionController, ResultCallback};
pub use session::{IdleKind, SessionState, SessionStats};
