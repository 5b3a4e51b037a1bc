//! ASR WebSocket Client
//!
//! Owns the secure stream, performs the upgrade handshake and frames
//! protocol messages. Control frames (ping, pong, close) are answered here;
//! application messages are handed back to the caller one frame at a time.

use std::rc::Rc;

use super::constants::*;
use super::frame::{self, Decoded, Frame, Opcode};
use super::handshake::{self, UpgradeResponse};
use super::protocol::{self, MessageFlags, MessageType, ServerMessage};
use super::transport::SecureStream;
use crate::data::EndpointConfig;
use crate::error::{AsrError, AsrResult, ProtocolError};
use crate::platform::{Clock, RandomSource};

const READ_CHUNK: usize = 16 * 1024;
const HANDSHAKE_POLL_MS: u64 = 10;

/// Result of polling for one inbound frame
#[derive(Debug, PartialEq)]
pub enum Polled {
    /// No complete frame is buffered
    Pending,
    /// A ping/pong frame was handled
    Control,
    /// A frame was discarded (malformed, oversized or unsupported)
    Dropped,
    Message(ServerMessage),
}

/// Client side of the framed transport
pub struct SessionClient {
    transport: Box<dyn SecureStream>,
    clock: Rc<dyn Clock>,
    random: Rc<dyn RandomSource>,
    connected: bool,
    max_json_bytes: usize,
    /// Reused for every outbound frame
    outbound: Vec<u8>,
    inbound: Vec<u8>,
    /// Bytes of an oversized frame still to be skipped
    discard_remaining: u64,
}

impl SessionClient {
    /// Create a client whose outbound buffer fits `send_batch_bytes` of audio
    pub fn new(
        transport: Box<dyn SecureStream>,
        clock: Rc<dyn Clock>,
        random: Rc<dyn RandomSource>,
        send_batch_bytes: usize,
        max_json_bytes: usize,
    ) -> Self {
        Self {
            transport,
            clock,
            random,
            connected: false,
            max_json_bytes,
            outbound: Vec::with_capacity(send_batch_bytes + OUTBOUND_HEADER_OVERHEAD),
            inbound: Vec::with_capacity(READ_CHUNK),
            discard_remaining: 0,
        }
    }

    /// Open the secure stream and run the upgrade handshake
    pub fn connect(&mut self, endpoint: &EndpointConfig, api_key: &str) -> AsrResult<()> {
        self.connected = false;
        self.reset_buffers();
        tracing::info!("Connecting to wss://{}:{}{}", endpoint.host, endpoint.port, endpoint.path);

        if let Err(e) = self.transport.connect(&endpoint.host, endpoint.port) {
            tracing::error!("TLS connection failed: {}", e);
            self.transport.close();
            return Err(AsrError::Transport(e));
        }

        match self.upgrade(endpoint, api_key) {
            Ok(()) => {
                self.connected = true;
                tracing::info!("WebSocket connected");
                Ok(())
            }
            Err(e) => {
                tracing::error!("WebSocket handshake failed: {}", e);
                self.transport.close();
                self.reset_buffers();
                Err(e)
            }
        }
    }

    fn upgrade(&mut self, endpoint: &EndpointConfig, api_key: &str) -> AsrResult<()> {
        // Latency-sensitive small writes
        self.transport.set_nodelay(true)?;

        let key = handshake::generate_key(&*self.random);
        let request = handshake::build_request(&endpoint.host, &endpoint.path, &key, api_key);
        self.transport.write_all(request.as_bytes())?;

        let deadline = self.clock.now_ms() + endpoint.handshake_timeout_ms;
        let (response, head_len) = loop {
            self.fill_inbound()?;
            if let Some(parsed) = UpgradeResponse::parse(&self.inbound)? {
                break parsed;
            }
            if !self.transport.is_connected() {
                return Err(AsrError::Handshake("connection closed during upgrade".into()));
            }
            if self.clock.now_ms() >= deadline {
                return Err(AsrError::Handshake("response timeout".into()));
            }
            self.clock.delay_ms(HANDSHAKE_POLL_MS);
        };

        // Frames sent right after the 101 stay buffered
        self.inbound.drain(..head_len);

        let expected = handshake::accept_key(&key);
        match response.header("sec-websocket-accept") {
            Some(accept) if accept == expected => {}
            other => {
                if endpoint.verify_accept {
                    return Err(AsrError::Handshake(format!(
                        "Sec-WebSocket-Accept mismatch: got {:?}",
                        other
                    )));
                }
                tracing::warn!("Sec-WebSocket-Accept not verified (got {:?})", other);
            }
        }
        Ok(())
    }

    /// Close the stream unconditionally
    pub fn disconnect(&mut self) {
        if self.connected {
            tracing::info!("WebSocket disconnected");
        }
        self.connected = false;
        self.transport.close();
        self.reset_buffers();
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.transport.is_connected()
    }

    /// Send the session config as a full client request
    pub fn send_full_request(&mut self, json: &[u8]) -> AsrResult<()> {
        self.send_message(MessageType::ClientFullRequest, MessageFlags::NoSequence, json)
    }

    /// Send PCM samples as one audio-only request, little-endian
    pub fn send_audio(&mut self, samples: &[i16]) -> AsrResult<()> {
        let audio_len = samples.len() * 2;
        let mask = self.mask_key();

        self.outbound.clear();
        frame::write_header(
            &mut self.outbound,
            Opcode::Binary,
            protocol::HEADER_LEN + audio_len,
            mask,
        )?;
        let start = self.outbound.len();
        protocol::write_header(
            &mut self.outbound,
            MessageType::ClientAudioOnlyRequest,
            MessageFlags::NoSequence,
            audio_len as u32,
        );
        for sample in samples {
            self.outbound.extend_from_slice(&sample.to_le_bytes());
        }
        frame::apply_mask(&mut self.outbound[start..], mask);

        self.flush_outbound()
    }

    /// Send the zero-length negative-sequence audio request
    pub fn send_end_marker(&mut self) -> AsrResult<()> {
        let marker = protocol::end_marker();
        self.send_frame(Opcode::Binary, &marker)
    }

    fn send_message(
        &mut self,
        message_type: MessageType,
        flags: MessageFlags,
        payload: &[u8],
    ) -> AsrResult<()> {
        let mask = self.mask_key();

        self.outbound.clear();
        frame::write_header(
            &mut self.outbound,
            Opcode::Binary,
            protocol::HEADER_LEN + payload.len(),
            mask,
        )?;
        let start = self.outbound.len();
        protocol::write_header(&mut self.outbound, message_type, flags, payload.len() as u32);
        self.outbound.extend_from_slice(payload);
        frame::apply_mask(&mut self.outbound[start..], mask);

        self.flush_outbound()
    }

    /// Send a raw frame (control frames, prebuilt messages)
    pub fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> AsrResult<()> {
        let mask = self.mask_key();

        self.outbound.clear();
        frame::write_header(&mut self.outbound, opcode, payload.len(), mask)?;
        let start = self.outbound.len();
        self.outbound.extend_from_slice(payload);
        frame::apply_mask(&mut self.outbound[start..], mask);

        self.flush_outbound()
    }

    fn mask_key(&self) -> [u8; 4] {
        let mut mask = [0u8; 4];
        self.random.fill_bytes(&mut mask);
        mask
    }

    fn flush_outbound(&mut self) -> AsrResult<()> {
        if !self.is_connected() {
            return Err(AsrError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "WebSocket not connected",
            )));
        }
        if let Err(e) = self.transport.write_all(&self.outbound) {
            self.connected = false;
            return Err(AsrError::Transport(e));
        }
        Ok(())
    }

    /// Whether inbound bytes are buffered or waiting on the stream.
    ///
    /// A failing stream marks the client disconnected.
    pub fn has_pending_input(&mut self) -> AsrResult<bool> {
        if !self.inbound.is_empty() {
            return Ok(true);
        }
        match self.transport.available() {
            Ok(available) => Ok(available > 0),
            Err(e) => {
                self.connected = false;
                Err(AsrError::Transport(e))
            }
        }
    }

    /// Handle at most one inbound frame.
    ///
    /// Pings are answered with an empty pong. A close frame shuts the
    /// stream down and yields [`AsrError::RemoteClosed`].
    pub fn poll(&mut self) -> AsrResult<Polled> {
        if let Err(e) = self.fill_inbound() {
            self.connected = false;
            return Err(e);
        }

        if self.discard_remaining > 0 {
            let skip = self.discard_remaining.min(self.inbound.len() as u64) as usize;
            self.inbound.drain(..skip);
            self.discard_remaining -= skip as u64;
            return Ok(if self.discard_remaining == 0 {
                Polled::Dropped
            } else {
                Polled::Pending
            });
        }

        match frame::decode(&self.inbound, MAX_INBOUND_PAYLOAD) {
            Decoded::Incomplete => Ok(Polled::Pending),
            Decoded::Malformed => {
                tracing::warn!("Malformed frame header, dropping connection");
                self.disconnect();
                Err(ProtocolError::MalformedFrame.into())
            }
            Decoded::Oversized {
                header_len,
                payload_len,
            } => {
                tracing::debug!(bytes = payload_len, "Dropping oversized frame");
                let total = header_len as u64 + payload_len;
                let skip = total.min(self.inbound.len() as u64) as usize;
                self.inbound.drain(..skip);
                self.discard_remaining = total - skip as u64;
                Ok(if self.discard_remaining == 0 {
                    Polled::Dropped
                } else {
                    Polled::Pending
                })
            }
            Decoded::Frame { frame, consumed } => {
                self.inbound.drain(..consumed);
                self.dispatch(frame)
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) -> AsrResult<Polled> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                match protocol::decode_server_message(&frame.payload, self.max_json_bytes) {
                    Ok(message) => Ok(Polled::Message(message)),
                    Err(e) => {
                        tracing::trace!("Ignoring inbound message: {}", e);
                        Ok(Polled::Dropped)
                    }
                }
            }
            Opcode::Ping => {
                tracing::debug!("Ping received, sending pong");
                self.send_frame(Opcode::Pong, &[])?;
                Ok(Polled::Control)
            }
            Opcode::Pong => Ok(Polled::Control),
            Opcode::Close => {
                tracing::info!("Server closed connection");
                self.disconnect();
                Err(AsrError::RemoteClosed)
            }
            Opcode::Continuation | Opcode::Reserved(_) => {
                tracing::trace!("Ignoring frame with opcode {:?}", frame.opcode);
                Ok(Polled::Dropped)
            }
        }
    }

    fn fill_inbound(&mut self) -> AsrResult<()> {
        let available = self.transport.available()?;
        if available == 0 {
            return Ok(());
        }

        let start = self.inbound.len();
        let want = available.min(READ_CHUNK);
        self.inbound.resize(start + want, 0);
        match self.transport.read(&mut self.inbound[start..]) {
            Ok(n) => {
                self.inbound.truncate(start + n);
                Ok(())
            }
            Err(e) => {
                self.inbound.truncate(start);
                Err(AsrError::Transport(e))
            }
        }
    }

    fn reset_buffers(&mut self) {
        self.inbound.clear();
        self.discard_remaining = 0;
    }
}
