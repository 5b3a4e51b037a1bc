//! Session state and per-utterance statistics
//!
//! ```text
//! Disconnected ── connect ──► Idle(Fresh)
//! Idle(Fresh) ── start_recording: config ──► AwaitingConfigAck ── settle ──► Streaming
//! Streaming ── stop / max duration / silence / stable result ──► Draining
//! Draining ── inbound drained ──► Idle(PostEndMarker)
//! Idle(PostEndMarker) ── start_recording: reconnect ──► Idle(Fresh) ──► ...
//! any ── transport loss / close frame ──► Terminated ── next step ──► Disconnected
//! ```

/// What an idle connection is good for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleKind {
    /// Freshly upgraded, ready for a config request
    Fresh,
    /// The end marker was sent; the next session needs a new connection
    PostEndMarker,
}

/// Recognition session state, advanced only by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Idle(IdleKind),
    AwaitingConfigAck,
    Streaming,
    Draining,
    Terminated,
}

impl SessionState {
    /// Whether the next start has to reconnect first
    pub fn end_marker_sent(&self) -> bool {
        matches!(
            self,
            SessionState::Draining | SessionState::Idle(IdleKind::PostEndMarker)
        )
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingConfigAck | SessionState::Streaming
        )
    }

    /// States in which the controller believes the transport is up
    pub fn expects_connection(&self) -> bool {
        matches!(
            self,
            SessionState::Idle(_)
                | SessionState::AwaitingConfigAck
                | SessionState::Streaming
                | SessionState::Draining
        )
    }
}

/// Statistics of the current utterance, zeroed at every start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub recording_start_ms: u64,
    /// Set by the first non-empty transcript
    pub last_speech_ms: Option<u64>,
    pub last_result_text: String,
    pub same_result_count: u32,
    pub chunks_sent: u32,
    pub last_progress_ms: u64,
}

impl SessionStats {
    pub fn started_at(now_ms: u64) -> Self {
        Self {
            recording_start_ms: now_ms,
            last_progress_ms: now_ms,
            ..Default::default()
        }
    }

    pub fn has_speech(&self) -> bool {
        self.last_speech_ms.is_some()
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.recording_start_ms)
    }

    /// Silence since the last transcript; `None` until speech was heard
    pub fn silence_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_speech_ms.map(|last| now_ms.saturating_sub(last))
    }

    /// Record a non-empty transcript and return how often it has repeated
    pub fn observe_result(&mut self, text: &str, now_ms: u64) -> u32 {
        self.last_speech_ms = Some(now_ms);
        if text == self.last_result_text {
            self.same_result_count += 1;
        } else {
            self.same_result_count = 1;
            self.last_result_text = text.to_string();
        }
        self.same_result_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_marker_is_structural() {
        assert!(SessionState::Draining.end_marker_sent());
        assert!(SessionState::Idle(IdleKind::PostEndMarker).end_marker_sent());
        assert!(!SessionState::Idle(IdleKind::Fresh).end_marker_sent());
        assert!(!SessionState::Streaming.end_marker_sent());
        assert!(!SessionState::Terminated.end_marker_sent());
    }

    #[test]
    fn silence_timer_disabled_until_speech() {
        let mut stats = SessionStats::started_at(1000);
        assert!(!stats.has_speech());
        assert_eq!(stats.silence_ms(5000), None);

        stats.observe_result("hi", 1500);
        assert!(stats.has_speech());
        assert_eq!(stats.silence_ms(2500), Some(1000));
        assert_eq!(stats.elapsed_ms(2500), 1500);
    }

    #[test]
    fn repeats_are_counted_per_text() {
        let mut stats = SessionStats::started_at(0);
        assert_eq!(stats.observe_result("hel", 10), 1);
        assert_eq!(stats.observe_result("hel", 20), 2);
        assert_eq!(stats.observe_result("hello", 30), 1);
        assert_eq!(stats.last_result_text, "hello");
        assert_eq!(stats.observe_result("hello", 40), 2);
        assert_eq!(stats.last_speech_ms, Some(40));
    }
}
