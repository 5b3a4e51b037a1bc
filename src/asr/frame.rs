//! Websocket Frame Codec
//!
//! Header packing and parsing go through tungstenite's `FrameHeader`; this
//! module adds the oversize policy and works on caller-owned buffers so
//! audio frames can be built in place. Client frames are always masked with
//! a fresh key; server frames are normally unmasked but masked ones are
//! accepted too.

use std::io::Cursor;
use tungstenite::protocol::frame::coding::OpCode;
use tungstenite::protocol::frame::FrameHeader;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x00 => Opcode::Continuation,
            0x01 => Opcode::Text,
            0x02 => Opcode::Binary,
            0x08 => Opcode::Close,
            0x09 => Opcode::Ping,
            0x0A => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x00,
            Opcode::Text => 0x01,
            Opcode::Binary => 0x02,
            Opcode::Close => 0x08,
            Opcode::Ping => 0x09,
            Opcode::Pong => 0x0A,
            Opcode::Reserved(value) => value & 0x0F,
        }
    }
}

impl From<Opcode> for OpCode {
    fn from(opcode: Opcode) -> Self {
        OpCode::from(opcode.as_u8())
    }
}

impl From<OpCode> for Opcode {
    fn from(opcode: OpCode) -> Self {
        Opcode::from_u8(u8::from(opcode))
    }
}

/// A decoded frame with its payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Outcome of decoding the front of a byte buffer
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// More bytes are needed
    Incomplete,
    /// A complete frame occupying the first `consumed` bytes
    Frame { frame: Frame, consumed: usize },
    /// The header announces a payload at or above the limit
    Oversized { header_len: usize, payload_len: u64 },
    /// The header cannot be parsed; the stream is out of sync
    Malformed,
}

/// Length of the unmasked part of a header for a payload of `payload_len` bytes
pub fn header_len(payload_len: usize) -> usize {
    FrameHeader::default().len(payload_len as u64)
}

/// Append a masked, final client header for a payload of `payload_len` bytes
pub fn write_header(
    out: &mut Vec<u8>,
    opcode: Opcode,
    payload_len: usize,
    mask: [u8; 4],
) -> tungstenite::Result<()> {
    let header = FrameHeader {
        is_final: true,
        opcode: opcode.into(),
        mask: Some(mask),
        ..FrameHeader::default()
    };
    header.format(payload_len as u64, out)
}

/// XOR `buf` with the repeating mask key. Applying it twice restores the input.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encode a complete masked client frame
pub fn encode(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> tungstenite::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(header_len(payload.len()) + 4 + payload.len());
    write_header(&mut out, opcode, payload.len(), mask)?;
    let start = out.len();
    out.extend_from_slice(payload);
    apply_mask(&mut out[start..], mask);
    Ok(out)
}

/// Decode the frame at the front of `buf`.
///
/// Payloads of `max_payload` bytes or more are reported as
/// [`Decoded::Oversized`] as soon as the header is complete, so the caller
/// can skip them without buffering.
pub fn decode(buf: &[u8], max_payload: u64) -> Decoded {
    let mut cursor = Cursor::new(buf);
    let (header, payload_len) = match FrameHeader::parse(&mut cursor) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return Decoded::Incomplete,
        Err(_) => return Decoded::Malformed,
    };
    let offset = cursor.position() as usize;

    if payload_len >= max_payload {
        return Decoded::Oversized {
            header_len: offset,
            payload_len,
        };
    }

    let end = offset + payload_len as usize;
    if buf.len() < end {
        return Decoded::Incomplete;
    }

    let mut payload = buf[offset..end].to_vec();
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    Decoded::Frame {
        frame: Frame {
            fin: header.is_final,
            opcode: header.opcode.into(),
            payload,
        },
        consumed: end,
    }
}
