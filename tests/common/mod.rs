//! In-memory server, clock and microphone for driving the controller

#![allow(dead_code)]

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use asr_stream::asr::frame::{self, Decoded, Frame, Opcode};
use asr_stream::asr::handshake;
use asr_stream::asr::SecureStream;
use asr_stream::audio::{MicrophonePins, PcmPeripheral};
use asr_stream::data::{AsrConfig, AudioConfig};
use asr_stream::platform::{Clock, DeviceId, Platform, SeededRandom};
use asr_stream::RecognitionController;

pub const DEVICE_MAC: [u8; 6] = [0xa4, 0xcf, 0x12, 0x34, 0x56, 0x78];

pub struct ManualClock {
    now: Cell<u64>,
    /// Added on every `now_ms` call, for loops that never delay
    pub drift_per_read: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Cell::new(start_ms),
            drift_per_read: Cell::new(0),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.set(self.now.get() + self.drift_per_read.get());
        self.now.get()
    }

    fn delay_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

/// A frame the client sent, with the mask key it used
#[derive(Debug, Clone)]
pub struct ClientFrame {
    pub connection: u32,
    pub mask: Option<[u8; 4]>,
    pub frame: Frame,
}

impl ClientFrame {
    fn protocol_kind(&self) -> Option<(u8, u8)> {
        if self.frame.opcode != Opcode::Binary || self.frame.payload.len() < 8 {
            return None;
        }
        Some((self.frame.payload[1] >> 4, self.frame.payload[1] & 0x0F))
    }

    pub fn is_config(&self) -> bool {
        self.protocol_kind() == Some((0x1, 0x0))
    }

    pub fn is_audio(&self) -> bool {
        self.protocol_kind() == Some((0x2, 0x0))
    }

    pub fn is_end_marker(&self) -> bool {
        self.protocol_kind() == Some((0x2, 0x2)) && self.frame.payload.len() == 8
    }

    pub fn body(&self) -> &[u8] {
        &self.frame.payload[8..]
    }
}

pub struct ServerState {
    pub connected: bool,
    pub connects: u32,
    pub nodelay: bool,
    pub fail_connect: bool,
    pub fail_writes: bool,
    /// Reads fail while the stream still reports itself connected
    pub fail_reads: bool,
    pub fail_writes_after_config: bool,
    pub answer_handshake: bool,
    pub status_line: String,
    pub accept_override: Option<String>,
    /// Sent back whenever a config request arrives
    pub config_reply: Option<Vec<u8>>,
    pub requests: Vec<String>,
    pub frames: Vec<ClientFrame>,
    pub inbound: VecDeque<u8>,
    awaiting_request: bool,
    pending: Vec<u8>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            connected: false,
            connects: 0,
            nodelay: false,
            fail_connect: false,
            fail_writes: false,
            fail_reads: false,
            fail_writes_after_config: false,
            answer_handshake: true,
            status_line: "HTTP/1.1 101 Switching Protocols".to_string(),
            accept_override: None,
            config_reply: None,
            requests: Vec::new(),
            frames: Vec::new(),
            inbound: VecDeque::new(),
            awaiting_request: false,
            pending: Vec::new(),
        }
    }
}

impl ServerState {
    pub fn push(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Drop the connection without a close frame
    pub fn drop_connection(&mut self) {
        self.connected = false;
        self.inbound.clear();
    }

    pub fn configs(&self) -> Vec<Value> {
        self.frames
            .iter()
            .filter(|f| f.is_config())
            .map(|f| serde_json::from_slice(f.body()).unwrap())
            .collect()
    }

    pub fn audio_chunks(&self) -> Vec<Vec<i16>> {
        self.frames
            .iter()
            .filter(|f| f.is_audio())
            .map(|f| {
                f.body()
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect()
            })
            .collect()
    }

    pub fn end_markers(&self) -> usize {
        self.frames.iter().filter(|f| f.is_end_marker()).count()
    }

    pub fn pongs(&self) -> Vec<&ClientFrame> {
        self.frames
            .iter()
            .filter(|f| f.frame.opcode == Opcode::Pong)
            .collect()
    }

    fn handle_request(&mut self) {
        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Request::new(&mut headers);
        let Ok(httparse::Status::Complete(end)) = parsed.parse(&self.pending) else {
            return;
        };
        let key = parsed
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("sec-websocket-key"))
            .map(|h| String::from_utf8_lossy(h.value).into_owned())
            .unwrap_or_default();

        let request = String::from_utf8_lossy(&self.pending[..end]).into_owned();
        self.pending.drain(..end);
        self.awaiting_request = false;
        self.requests.push(request);

        if self.answer_handshake {
            let accept = self
                .accept_override
                .clone()
                .unwrap_or_else(|| handshake::accept_key(&key));
            let response = format!(
                "{}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                self.status_line, accept
            );
            self.push(response.as_bytes());
        }
    }

    fn handle_frames(&mut self) {
        while let Decoded::Frame { frame, consumed } = frame::decode(&self.pending, u64::MAX) {
            let masked = self.pending[1] & 0x80 != 0;
            let mask = masked.then(|| {
                let at = consumed - frame.payload.len() - 4;
                [
                    self.pending[at],
                    self.pending[at + 1],
                    self.pending[at + 2],
                    self.pending[at + 3],
                ]
            });
            self.pending.drain(..consumed);

            let client_frame = ClientFrame {
                connection: self.connects,
                mask,
                frame,
            };
            if client_frame.is_config() {
                if let Some(reply) = self.config_reply.clone() {
                    self.push(&reply);
                }
                if self.fail_writes_after_config {
                    self.fail_writes = true;
                }
            }
            self.frames.push(client_frame);
        }
    }
}

pub struct MockStream {
    state: Rc<RefCell<ServerState>>,
}

impl SecureStream for MockStream {
    fn connect(&mut self, _host: &str, _port: u16) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_connect {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        state.connected = true;
        state.connects += 1;
        state.awaiting_request = true;
        state.pending.clear();
        state.inbound.clear();
        Ok(())
    }

    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
        self.state.borrow_mut().nodelay = nodelay;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.connected || state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        state.pending.extend_from_slice(buf);
        if state.awaiting_request {
            state.handle_request();
        }
        if !state.awaiting_request {
            state.handle_frames();
        }
        Ok(())
    }

    fn available(&mut self) -> io::Result<usize> {
        let state = self.state.borrow();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        }
        Ok(if state.connected { state.inbound.len() } else { 0 })
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }
}

#[derive(Default)]
pub struct MicState {
    pub samples: VecDeque<i16>,
    /// Returned forever once `samples` runs out
    pub fill: Option<i16>,
    pub refuse: bool,
}

pub struct ScriptedMic {
    state: Rc<RefCell<MicState>>,
}

impl PcmPeripheral for ScriptedMic {
    fn begin(&mut self, _pins: &MicrophonePins, _audio: &AudioConfig) -> anyhow::Result<()> {
        if self.state.borrow().refuse {
            anyhow::bail!("I2S mode refused");
        }
        Ok(())
    }

    fn try_read(&mut self) -> Option<i16> {
        let mut state = self.state.borrow_mut();
        state.samples.pop_front().or(state.fill)
    }
}

/// Unmasked server frame
pub fn server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x80 | opcode];
    if payload.len() < 126 {
        out.push(payload.len() as u8);
    } else if payload.len() < 65536 {
        out.push(126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// SERVER_FULL_RESPONSE in a binary frame
pub fn full_response(body: &Value) -> Vec<u8> {
    let json = serde_json::to_vec(body).unwrap();
    let mut message = vec![0x11, 0x90, 0x10, 0x00];
    message.extend_from_slice(&(json.len() as u32).to_be_bytes());
    message.extend_from_slice(&json);
    server_frame(0x02, &message)
}

/// SERVER_ACK in a binary frame
pub fn ack(sequence: i32, body: &Value) -> Vec<u8> {
    let json = serde_json::to_vec(body).unwrap();
    let mut message = vec![0x11, 0xB0, 0x10, 0x00];
    message.extend_from_slice(&sequence.to_be_bytes());
    message.extend_from_slice(&(json.len() as u32).to_be_bytes());
    message.extend_from_slice(&json);
    server_frame(0x02, &message)
}

/// SERVER_ERROR_RESPONSE in a binary frame
pub fn error_response(code: u32, text: &str) -> Vec<u8> {
    let mut message = vec![0x11, 0xF0, 0x10, 0x00];
    message.extend_from_slice(&code.to_be_bytes());
    message.extend_from_slice(&(text.len() as u32).to_be_bytes());
    message.extend_from_slice(text.as_bytes());
    server_frame(0x02, &message)
}

pub fn text_result(text: &str) -> Vec<u8> {
    full_response(&serde_json::json!({
        "code": 1000,
        "result": [{ "text": text, "confidence": 0 }]
    }))
}

pub struct Harness {
    pub controller: RecognitionController,
    pub server: Rc<RefCell<ServerState>>,
    pub mic: Rc<RefCell<MicState>>,
    pub clock: Rc<ManualClock>,
    pub results: Rc<RefCell<Vec<String>>>,
    pub no_speech: Rc<Cell<u32>>,
}

impl Harness {
    pub fn new(config: AsrConfig) -> Self {
        let server = Rc::new(RefCell::new(ServerState::default()));
        let mic = Rc::new(RefCell::new(MicState::default()));
        let clock = Rc::new(ManualClock::new(10_000));
        let platform = Platform::new(
            clock.clone(),
            Rc::new(SeededRandom::new(42)),
            DeviceId::new(DEVICE_MAC),
        );

        let mut controller = RecognitionController::new(
            config,
            platform,
            Box::new(MockStream {
                state: server.clone(),
            }),
            Box::new(ScriptedMic { state: mic.clone() }),
        );

        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = results.clone();
        controller.set_result_callback(move |text| sink.borrow_mut().push(text));

        let no_speech = Rc::new(Cell::new(0));
        let counter = no_speech.clone();
        controller.set_no_speech_timeout_callback(move || counter.set(counter.get() + 1));

        Self {
            controller,
            server,
            mic,
            clock,
            results,
            no_speech,
        }
    }

    /// Microphone initialized and websocket connected
    pub fn connected(config: AsrConfig) -> Self {
        let mut harness = Self::new(config);
        harness
            .controller
            .initialize_microphone(MicrophonePins::StandardI2s { sck: 4, ws: 5, sd: 6 })
            .unwrap();
        harness.controller.connect().unwrap();
        harness
    }

    pub fn tick(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.controller.step();
    }

    /// Step every `step_ms` until recording stops or `limit_ms` passes
    pub fn run_until_stopped(&mut self, step_ms: u64, limit_ms: u64) -> u64 {
        let start = self.clock.now_ms();
        while self.controller.is_recording() && self.clock.now_ms() - start < limit_ms {
            self.tick(step_ms);
        }
        self.clock.now_ms() - start
    }

    pub fn push(&self, bytes: &[u8]) {
        self.server.borrow_mut().push(bytes);
    }
}

pub fn config() -> AsrConfig {
    let mut config = AsrConfig::new("test-key", "test_cluster");
    config.endpoint.host = "asr.test".to_string();
    config
}
