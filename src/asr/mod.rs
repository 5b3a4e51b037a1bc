//! ASR (Automatic Speech Recognition) module
//!
//! This module implements the websocket framing and the binary ASR protocol
//! used for streaming recognition.

mod client;
mod constants;
pub mod frame;
pub mod handshake;
pub mod protocol;
mod transport;

pub use client::{Polled, SessionClient};
pub use constants::*;
pub use protocol::{FullRequest, MessageFlags, MessageType, ServerMessage};
pub use transport::{SecureStream, TlsStream};
