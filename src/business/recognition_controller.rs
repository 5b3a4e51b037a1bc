//! Recognition Controller
//!
//! Top-level state machine. The host calls [`RecognitionController::step`]
//! from its event loop; each step moves microphone samples into the staging
//! buffer, ships full chunks, checks the end-of-utterance conditions and
//! consumes inbound frames.

use serde_json::Value;

use super::session::{IdleKind, SessionState, SessionStats};
use crate::asr::{
    Polled, SecureStream, ServerMessage, SessionClient, CODE_SILENCE, CODE_SUCCESS,
};
use crate::asr::protocol::{self, FullRequest};
use crate::audio::{is_capture_artifact, AudioSource, MicrophoneKind, MicrophonePins, PcmPeripheral, StagingBuffer};
use crate::data::{AsrConfig, AudioConfig};
use crate::error::{AsrError, AsrResult};
use crate::platform::Platform;

const ACK_POLL_MS: u64 = 10;
const PROGRESS_INTERVAL_MS: u64 = 1000;

/// Called with the recognized text when a session ends
pub type ResultCallback = Box<dyn FnMut(String)>;

/// Called when the maximum duration elapsed without any speech
pub type NoSpeechCallback = Box<dyn FnMut()>;

/// Streaming recognition state machine
pub struct RecognitionController {
    config: AsrConfig,
    microphone_kind: MicrophoneKind,
    platform: Platform,
    audio: AudioSource,
    client: SessionClient,
    state: SessionState,
    staging: StagingBuffer,
    stats: SessionStats,
    recognized_text: String,
    has_new_result: bool,
    result_callback: Option<ResultCallback>,
    no_speech_callback: Option<NoSpeechCallback>,
}

impl RecognitionController {
    /// Create a controller; nothing touches the network or the microphone yet
    pub fn new(
        config: AsrConfig,
        platform: Platform,
        transport: Box<dyn SecureStream>,
        microphone: Box<dyn PcmPeripheral>,
    ) -> Self {
        let client = SessionClient::new(
            transport,
            platform.clock.clone(),
            platform.random.clone(),
            config.audio.send_batch_bytes,
            config.session.max_json_bytes,
        );
        let audio = AudioSource::new(microphone, platform.clock.clone());
        let staging = StagingBuffer::new(config.audio.batch_samples());

        Self {
            config,
            microphone_kind: MicrophoneKind::StandardI2s,
            platform,
            audio,
            client,
            state: SessionState::Disconnected,
            staging,
            stats: SessionStats::default(),
            recognized_text: String::new(),
            has_new_result: false,
            result_callback: None,
            no_speech_callback: None,
        }
    }

    fn ensure_configurable(&self, operation: &'static str) -> AsrResult<()> {
        if self.state.expects_connection() || self.state == SessionState::Connecting {
            tracing::warn!("{} ignored while {:?}", operation, self.state);
            return Err(AsrError::BadState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Replace the API key and/or cluster
    pub fn set_api_config(&mut self, api_key: Option<&str>, cluster: Option<&str>) -> AsrResult<()> {
        self.ensure_configurable("set_api_config")?;
        if let Some(api_key) = api_key {
            self.config.api_key = api_key.to_string();
        }
        if let Some(cluster) = cluster {
            self.config.cluster = cluster.to_string();
        }
        Ok(())
    }

    pub fn set_microphone_kind(&mut self, kind: MicrophoneKind) {
        self.microphone_kind = kind;
    }

    pub fn set_audio_params(
        &mut self,
        sample_rate: u32,
        bits_per_sample: u16,
        channels: u16,
    ) -> AsrResult<()> {
        self.ensure_configurable("set_audio_params")?;
        let audio = AudioConfig {
            sample_rate,
            bits_per_sample,
            channels,
            ..self.config.audio
        };
        audio.validate()?;
        self.config.audio = audio;
        Ok(())
    }

    pub fn set_silence_timeout_ms(&mut self, timeout_ms: u64) -> AsrResult<()> {
        self.ensure_configurable("set_silence_timeout_ms")?;
        self.config.endpointing.silence_timeout_ms = timeout_ms;
        Ok(())
    }

    pub fn set_max_recording_seconds(&mut self, seconds: u32) -> AsrResult<()> {
        self.ensure_configurable("set_max_recording_seconds")?;
        self.config.endpointing.max_seconds = seconds;
        Ok(())
    }

    /// Bring up the microphone; the pin set must match the configured kind
    pub fn initialize_microphone(&mut self, pins: MicrophonePins) -> AsrResult<()> {
        if pins.kind() != self.microphone_kind {
            return Err(AsrError::Config(format!(
                "{:?} pins given for a {:?} microphone",
                pins.kind(),
                self.microphone_kind
            )));
        }
        self.audio.initialize(&pins, &self.config.audio)
    }

    pub fn set_result_callback<F>(&mut self, callback: F)
    where
        F: FnMut(String) + 'static,
    {
        self.result_callback = Some(Box::new(callback));
    }

    pub fn set_no_speech_timeout_callback<F>(&mut self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.no_speech_callback = Some(Box::new(callback));
    }

    /// Open the secure stream and upgrade it
    pub fn connect(&mut self) -> AsrResult<()> {
        if self.state.expects_connection() {
            if self.client.is_connected() {
                tracing::debug!("Already connected");
                return Ok(());
            }
            self.handle_transport_loss();
        }
        self.config.validate()?;

        self.state = SessionState::Connecting;
        match self.client.connect(&self.config.endpoint, &self.config.api_key) {
            Ok(()) => {
                self.state = SessionState::Idle(IdleKind::Fresh);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Close the stream, abandoning any session in progress
    pub fn disconnect(&mut self) {
        if self.state.is_recording() {
            self.abandon_session();
        }
        self.client.disconnect();
        self.state = SessionState::Disconnected;
    }

    pub fn is_connected(&self) -> bool {
        self.state.expects_connection() && self.client.is_connected()
    }

    /// Begin a new utterance
    pub fn start_recording(&mut self) -> AsrResult<()> {
        if self.state.end_marker_sent() {
            tracing::info!("Reconnecting WebSocket for new session...");
            self.client.disconnect();
            self.state = SessionState::Disconnected;
            self.platform.clock.delay_ms(self.config.session.reconnect_delay_ms);
            if let Err(e) = self.connect() {
                tracing::error!("Failed to reconnect WebSocket: {}", e);
                return Err(AsrError::Reconnect(Box::new(e)));
            }
        }

        if self.state != SessionState::Idle(IdleKind::Fresh) {
            tracing::warn!("Cannot start recording while {:?}", self.state);
            return Err(AsrError::BadState {
                operation: "start_recording",
                state: self.state,
            });
        }
        if !self.client.is_connected() {
            self.handle_transport_loss();
            return Err(AsrError::BadState {
                operation: "start_recording",
                state: self.state,
            });
        }

        let now = self.platform.clock.now_ms();
        self.stats = SessionStats::started_at(now);
        self.staging.clear();
        self.recognized_text.clear();
        self.has_new_result = false;

        let reqid = protocol::request_id(now, &*self.platform.random);
        let request = FullRequest::new(
            &self.config.cluster,
            &self.platform.device_id.uid(),
            reqid.clone(),
            &self.config.audio,
        );
        let json = request.to_json().map_err(AsrError::Encode)?;
        tracing::info!(request_id = %reqid, "Recording started");

        if let Err(e) = self.client.send_full_request(&json) {
            tracing::error!("Failed to send session config: {}", e);
            self.handle_transport_loss();
            return Err(e);
        }
        self.state = SessionState::AwaitingConfigAck;

        let accepted = match self.await_config_acceptance() {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("Session config not accepted: {}", e);
                if self.state == SessionState::AwaitingConfigAck {
                    // Close the server-side session so the next start reconnects cleanly
                    match self.client.send_end_marker() {
                        Ok(()) => self.state = SessionState::Idle(IdleKind::PostEndMarker),
                        Err(end_err) => {
                            tracing::warn!("Failed to send end marker: {}", end_err);
                            self.terminate();
                        }
                    }
                }
                return Err(e);
            }
        };

        self.state = SessionState::Streaming;
        if let Some(body) = accepted {
            self.handle_full_response(&body);
        }
        Ok(())
    }

    /// Settle or wait for the server to accept the config. A full response
    /// that doubles as the acceptance is handed back for result handling.
    fn await_config_acceptance(&mut self) -> AsrResult<Option<Value>> {
        let session = self.config.session;
        if !session.await_config_ack {
            self.platform.clock.delay_ms(session.config_settle_ms);
            return Ok(None);
        }

        let deadline = self.platform.clock.now_ms() + session.config_ack_timeout_ms;
        loop {
            let polled = match self.client.poll() {
                Ok(polled) => polled,
                Err(e) => {
                    self.handle_transport_loss();
                    return Err(e);
                }
            };

            match polled {
                Polled::Message(ServerMessage::Ack { sequence, body }) => {
                    if let Some((code, message)) = server_error(&body) {
                        return Err(AsrError::Server { code, message });
                    }
                    tracing::debug!(sequence, "Session config acknowledged");
                    return Ok(None);
                }
                Polled::Message(ServerMessage::FullResponse(body)) => {
                    if let Some((code, message)) = server_error(&body) {
                        return Err(AsrError::Server { code, message });
                    }
                    tracing::debug!("Session config accepted");
                    return Ok(Some(body));
                }
                Polled::Message(ServerMessage::Error { code, body }) => {
                    return Err(AsrError::Server {
                        code: code as i64,
                        message: body.to_string(),
                    });
                }
                Polled::Pending => self.platform.clock.delay_ms(ACK_POLL_MS),
                Polled::Control | Polled::Dropped => {}
            }

            if self.platform.clock.now_ms() >= deadline {
                return Err(AsrError::Timeout("session config acknowledgement"));
            }
        }
    }

    /// End the utterance: flush, send the end marker, publish the transcript
    pub fn stop_recording(&mut self) {
        if self.state != SessionState::Streaming {
            return;
        }

        if !self.staging.is_empty() {
            if let Err(e) = self.ship_staged() {
                tracing::warn!("Failed to flush residual audio: {}", e);
                self.handle_transport_loss();
                return;
            }
        }

        self.state = SessionState::Draining;
        tracing::info!(
            chunks = self.stats.chunks_sent,
            "Recording stopped, final result: {}",
            self.stats.last_result_text
        );

        let end_marker = self.client.send_end_marker();
        self.publish_result();

        match end_marker {
            Ok(()) => tracing::info!("End marker sent"),
            Err(e) => {
                tracing::warn!("Failed to send end marker: {}", e);
                self.terminate();
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    /// Cooperative tick
    pub fn step(&mut self) {
        match self.state {
            SessionState::Disconnected | SessionState::Connecting => return,
            SessionState::Terminated => {
                self.state = SessionState::Disconnected;
                return;
            }
            _ => {}
        }

        if !self.client.is_connected() {
            tracing::warn!("Connection lost");
            self.handle_transport_loss();
            return;
        }

        if self.state == SessionState::Streaming {
            self.pump_audio();
            self.log_progress();
            if self.state == SessionState::Streaming {
                self.check_end_of_utterance();
            }
        }

        if self.state.expects_connection() {
            self.process_inbound();
        }

        if self.state == SessionState::Draining {
            match self.client.has_pending_input() {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Session drained");
                    self.state = SessionState::Idle(IdleKind::PostEndMarker);
                }
                Err(e) => {
                    tracing::warn!("Receive failed: {}", e);
                    self.handle_transport_loss();
                }
            }
        }
    }

    /// Pull up to one read's worth of samples, shipping full batches
    fn pump_audio(&mut self) {
        for _ in 0..self.config.audio.samples_per_read {
            let Some(sample) = self.audio.try_read() else {
                break;
            };
            if is_capture_artifact(sample) {
                continue;
            }
            if self.staging.push(sample) {
                if let Err(e) = self.ship_staged() {
                    tracing::warn!("Failed to send audio chunk: {}", e);
                    self.handle_transport_loss();
                    return;
                }
            }
        }
    }

    fn ship_staged(&mut self) -> AsrResult<()> {
        let result = self.client.send_audio(self.staging.samples());
        self.staging.clear();
        result?;
        self.stats.chunks_sent += 1;
        Ok(())
    }

    fn log_progress(&mut self) {
        let now = self.platform.clock.now_ms();
        if now.saturating_sub(self.stats.last_progress_ms) >= PROGRESS_INTERVAL_MS {
            self.stats.last_progress_ms = now;
            tracing::debug!(
                chunks = self.stats.chunks_sent,
                elapsed_ms = self.stats.elapsed_ms(now),
                "Streaming"
            );
        }
    }

    fn check_end_of_utterance(&mut self) {
        let now = self.platform.clock.now_ms();
        let endpointing = self.config.endpointing;

        if self.stats.elapsed_ms(now) >= endpointing.max_seconds as u64 * 1000 {
            let no_speech = !self.stats.has_speech();
            tracing::info!("Max duration reached, stopping recording");
            self.stop_recording();

            if no_speech {
                tracing::info!("No speech detected during recording");
                if let Some(callback) = self.no_speech_callback.as_mut() {
                    callback();
                }
            }
            return;
        }

        if let Some(silence) = self.stats.silence_ms(now) {
            if silence >= endpointing.silence_timeout_ms {
                tracing::info!("Silence detected ({:.1}s), stopping", silence as f64 / 1000.0);
                self.stop_recording();
            }
        }
    }

    /// One frame per step while streaming, everything available otherwise
    fn process_inbound(&mut self) {
        match self.client.has_pending_input() {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::warn!("Receive failed: {}", e);
                self.handle_transport_loss();
                return;
            }
        }
        let single_frame = self.state == SessionState::Streaming;

        loop {
            match self.client.poll() {
                Ok(Polled::Pending) => break,
                Ok(Polled::Message(message)) => self.handle_message(message),
                Ok(Polled::Control) | Ok(Polled::Dropped) => {}
                Err(AsrError::RemoteClosed) => {
                    self.handle_transport_loss();
                    break;
                }
                Err(e) => {
                    tracing::warn!("Receive failed: {}", e);
                    self.handle_transport_loss();
                    break;
                }
            }

            if single_frame || !self.state.expects_connection() {
                break;
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::FullResponse(body) => self.handle_full_response(&body),
            ServerMessage::Ack { sequence, body } => {
                tracing::debug!(sequence, "Server ack");
                if let Some((code, message)) = server_error(&body) {
                    tracing::error!(code, "Server error: {}", message);
                }
            }
            ServerMessage::Error { code, body } => {
                tracing::error!(code, "Server error response: {}", body);
            }
        }
    }

    fn handle_full_response(&mut self, body: &Value) {
        if let Some((code, message)) = server_error(body) {
            tracing::error!(code, "Server error: {}", message);
        }

        let Some(text) = first_result_text(body) else {
            return;
        };
        if text.trim().is_empty() {
            return;
        }

        if !self.stats.has_speech() {
            tracing::info!("Speech detected...");
        }
        let now = self.platform.clock.now_ms();
        let repeats = self.stats.observe_result(text, now);
        match repeats {
            1..=3 => tracing::info!("Recognizing: {}", text),
            4 => tracing::info!("Result stable: {}", text),
            _ => {}
        }

        if repeats >= self.config.endpointing.stable_result_repeats
            && self.state == SessionState::Streaming
        {
            tracing::info!("Result stable, stopping recording");
            self.stop_recording();
        }
    }

    fn publish_result(&mut self) {
        self.recognized_text = self.stats.last_result_text.clone();
        self.has_new_result = true;

        if self.recognized_text.is_empty() {
            return;
        }
        if let Some(callback) = self.result_callback.as_mut() {
            callback(self.recognized_text.clone());
        }
    }

    /// Drop the session without an end marker, keeping any partial transcript
    fn abandon_session(&mut self) {
        self.staging.clear();
        if !self.stats.last_result_text.is_empty() {
            self.publish_result();
        }
    }

    fn handle_transport_loss(&mut self) {
        if self.state.is_recording() {
            tracing::warn!("Connection lost while recording");
            self.abandon_session();
        }
        self.terminate();
    }

    fn terminate(&mut self) {
        self.client.disconnect();
        self.state = SessionState::Terminated;
    }

    pub fn recognized_text(&self) -> &str {
        &self.recognized_text
    }

    pub fn has_new_result(&self) -> bool {
        self.has_new_result
    }

    pub fn clear_result(&mut self) {
        self.has_new_result = false;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &AsrConfig {
        &self.config
    }
}

/// `code` and message of a response whose code is neither success nor silence
fn server_error(body: &Value) -> Option<(i64, String)> {
    let code = body.get("code")?.as_i64()?;
    if code == CODE_SUCCESS || code == CODE_SILENCE {
        return None;
    }
    let message = body
        .get("message")
        .or_else(|| body.get("msg"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    Some((code, message))
}

fn first_result_text(body: &Value) -> Option<&str> {
    body.get("result")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
}
