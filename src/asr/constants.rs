//! ASR Protocol Constants

/// Default ASR endpoint
pub const DEFAULT_HOST: &str = "openspeech.bytedance.com";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_PATH: &str = "/api/v2/asr";
pub const DEFAULT_CLUSTER: &str = "volcengine_streaming_common";

/// Recognition pipeline requested in every session config
pub const WORKFLOW: &str = "audio_in,resample,partition,vad,fe,decode,itn,nlu_punctuate";

/// Audio configuration
pub const SAMPLE_RATE: u32 = 16000;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const CHANNELS: u16 = 1;

/// 50 ms of samples pulled per step
pub const SAMPLES_PER_READ: usize = 800;

/// 200 ms of 16-bit PCM per audio chunk
pub const SEND_BATCH_BYTES: usize = 3200;

/// End-of-utterance defaults
pub const SILENCE_TIMEOUT_MS: u64 = 1000;
pub const STABLE_RESULT_REPEATS: u32 = 10;
pub const MAX_RECORDING_SECONDS: u32 = 50;

/// Session boundary timings
pub const HANDSHAKE_TIMEOUT_MS: u64 = 5000;
pub const CONFIG_SETTLE_MS: u64 = 50;
pub const RECONNECT_DELAY_MS: u64 = 100;
pub const CONFIG_ACK_TIMEOUT_MS: u64 = 1000;

/// Bound of the inbound JSON parser
pub const MAX_JSON_BYTES: usize = 2048;

/// Inbound frames with a payload this large are dropped
pub const MAX_INBOUND_PAYLOAD: u64 = 100_000;

/// Server codes that are not errors: success and silence detection
pub const CODE_SUCCESS: i64 = 1000;
pub const CODE_SILENCE: i64 = 1013;

/// Websocket header plus protocol header in front of every outbound payload
pub const OUTBOUND_HEADER_OVERHEAD: usize = 14 + 8;
