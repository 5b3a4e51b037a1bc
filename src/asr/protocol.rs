//! ASR Protocol Handling
//!
//! Handles building and parsing the binary envelope carried inside
//! websocket binary frames.
//!
//! ```text
//! byte 0   0x11  version 1, header size 1 (x4 bytes)
//! byte 1   message type << 4 | flags
//! byte 2   0x10  JSON serialization, no compression marker in low nibble
//! byte 3   0x00  reserved
//! 4..8     payload length, big-endian u32
//! 8..      payload
//! ```

use serde::Serialize;
use serde_json::Value;

use super::constants::WORKFLOW;
use crate::data::AudioConfig;
use crate::error::ProtocolError;
use crate::platform::RandomSource;

pub const VERSION_AND_HEADER_SIZE: u8 = 0x11;
pub const SERIALIZATION_JSON: u8 = 0x10;
pub const COMPRESSION_NONE: u8 = 0x00;

/// Fixed header plus the length field
pub const HEADER_LEN: usize = 8;

/// Message type nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ClientFullRequest = 0x1,
    ClientAudioOnlyRequest = 0x2,
    ServerFullResponse = 0x9,
    ServerAck = 0xB,
    ServerErrorResponse = 0xF,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x1 => Some(MessageType::ClientFullRequest),
            0x2 => Some(MessageType::ClientAudioOnlyRequest),
            0x9 => Some(MessageType::ServerFullResponse),
            0xB => Some(MessageType::ServerAck),
            0xF => Some(MessageType::ServerErrorResponse),
            _ => None,
        }
    }
}

/// Sequence flags nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageFlags {
    NoSequence = 0x0,
    PositiveSequence = 0x1,
    NegativeSequence = 0x2,
}

/// The first four bytes of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    /// In 4-byte units
    pub header_size: u8,
    pub message_type: u8,
    pub flags: u8,
    pub serialization: u8,
    pub compression: u8,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::Truncated {
                needed: 4,
                actual: data.len(),
            });
        }
        Ok(Self {
            version: data[0] >> 4,
            header_size: data[0] & 0x0F,
            message_type: data[1] >> 4,
            flags: data[1] & 0x0F,
            serialization: data[2] >> 4,
            compression: data[2] & 0x0F,
        })
    }

    pub fn header_bytes(&self) -> usize {
        self.header_size as usize * 4
    }
}

/// Append the 8-byte envelope header for a payload of `payload_len` bytes
pub fn write_header(
    out: &mut Vec<u8>,
    message_type: MessageType,
    flags: MessageFlags,
    payload_len: u32,
) {
    out.extend_from_slice(&[
        VERSION_AND_HEADER_SIZE,
        ((message_type as u8) << 4) | flags as u8,
        SERIALIZATION_JSON,
        COMPRESSION_NONE,
    ]);
    out.extend_from_slice(&payload_len.to_be_bytes());
}

/// Build a complete message
pub fn encode(message_type: MessageType, flags: MessageFlags, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    write_header(&mut out, message_type, flags, payload.len() as u32);
    out.extend_from_slice(payload);
    out
}

/// The end-of-utterance marker: audio-only, negative sequence, empty payload
pub fn end_marker() -> [u8; HEADER_LEN] {
    [
        VERSION_AND_HEADER_SIZE,
        ((MessageType::ClientAudioOnlyRequest as u8) << 4) | MessageFlags::NegativeSequence as u8,
        SERIALIZATION_JSON,
        COMPRESSION_NONE,
        0,
        0,
        0,
        0,
    ]
}

/// Parsed server message
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    FullResponse(Value),
    Ack { sequence: i32, body: Value },
    Error { code: u32, body: Value },
}

/// Parse a server message, bounding the JSON body to `max_json` bytes
pub fn decode_server_message(data: &[u8], max_json: usize) -> Result<ServerMessage, ProtocolError> {
    let header = Header::parse(data)?;
    let header_bytes = header.header_bytes();
    if data.len() < header_bytes {
        return Err(ProtocolError::Truncated {
            needed: header_bytes,
            actual: data.len(),
        });
    }
    let rest = &data[header_bytes..];

    match MessageType::from_u8(header.message_type) {
        Some(MessageType::ServerFullResponse) => {
            let body = prefixed(rest, 4)?;
            Ok(ServerMessage::FullResponse(parse_json(body, max_json)?))
        }
        Some(MessageType::ServerAck) => {
            let body = prefixed(rest, 8)?;
            let sequence = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let body = if body.is_empty() {
                Value::Null
            } else {
                parse_json(body, max_json)?
            };
            Ok(ServerMessage::Ack { sequence, body })
        }
        Some(MessageType::ServerErrorResponse) => {
            let body = prefixed(rest, 8)?;
            let code = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
            // Some gateways answer with plain text
            let body = match parse_json(body, max_json) {
                Ok(value) => value,
                Err(ProtocolError::InvalidJson(_)) => {
                    Value::String(String::from_utf8_lossy(body).into_owned())
                }
                Err(e) => return Err(e),
            };
            Ok(ServerMessage::Error { code, body })
        }
        _ => Err(ProtocolError::UnsupportedMessageType(header.message_type)),
    }
}

fn prefixed(rest: &[u8], prefix: usize) -> Result<&[u8], ProtocolError> {
    rest.get(prefix..).ok_or(ProtocolError::Truncated {
        needed: prefix,
        actual: rest.len(),
    })
}

fn parse_json(body: &[u8], max_json: usize) -> Result<Value, ProtocolError> {
    if body.len() > max_json {
        return Err(ProtocolError::PayloadTooLarge {
            size: body.len(),
            limit: max_json,
        });
    }
    Ok(serde_json::from_slice(body)?)
}

/// Session configuration sent as the full client request
#[derive(Debug, Serialize)]
pub struct FullRequest {
    pub app: AppSection,
    pub user: UserSection,
    pub request: RequestSection,
    pub audio: AudioSection,
}

#[derive(Debug, Serialize)]
pub struct AppSection {
    pub cluster: String,
}

#[derive(Debug, Serialize)]
pub struct UserSection {
    pub uid: String,
}

#[derive(Debug, Serialize)]
pub struct RequestSection {
    pub reqid: String,
    pub nbest: u32,
    pub workflow: String,
    pub result_type: String,
    pub sequence: i32,
}

#[derive(Debug, Serialize)]
pub struct AudioSection {
    pub format: String,
    pub rate: u32,
    pub bits: u16,
    pub channel: u16,
    pub codec: String,
}

impl FullRequest {
    pub fn new(cluster: &str, uid: &str, reqid: String, audio: &AudioConfig) -> Self {
        Self {
            app: AppSection {
                cluster: cluster.to_string(),
            },
            user: UserSection {
                uid: uid.to_string(),
            },
            request: RequestSection {
                reqid,
                nbest: 1,
                workflow: WORKFLOW.to_string(),
                result_type: "full".to_string(),
                sequence: 1,
            },
            audio: AudioSection {
                format: "raw".to_string(),
                rate: audio.sample_rate,
                bits: audio.bits_per_sample,
                channel: audio.channels,
                codec: "raw".to_string(),
            },
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// `<monotonic_ms>_<10000..99999>`
pub fn request_id(now_ms: u64, random: &dyn RandomSource) -> String {
    format!("{}_{}", now_ms, random.range(10000, 99999))
}
