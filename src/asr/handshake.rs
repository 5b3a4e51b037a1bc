//! Websocket upgrade handshake

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};

use crate::error::AsrError;
use crate::platform::RandomSource;

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Fresh base64-encoded 16-byte nonce for `Sec-WebSocket-Key`
pub fn generate_key(random: &dyn RandomSource) -> String {
    let mut nonce = [0u8; 16];
    random.fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// `Sec-WebSocket-Accept` value the server must answer for `key`
pub fn accept_key(key: &str) -> String {
    let hash = digest(
        &SHA1_FOR_LEGACY_USE_ONLY,
        format!("{}{}", key, ACCEPT_GUID).as_bytes(),
    );
    STANDARD.encode(hash.as_ref())
}

/// HTTP/1.1 upgrade request carrying the API key
pub fn build_request(host: &str, path: &str, key: &str, api_key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         x-api-key: {api_key}\r\n\
         \r\n"
    )
}

const MAX_RESPONSE_HEADERS: usize = 32;

/// Parsed upgrade response head
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    pub code: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
}

impl UpgradeResponse {
    /// Parse the response head at the front of `buf` and require
    /// `101 Switching Protocols`.
    ///
    /// Returns `None` until the head is complete, otherwise the response
    /// and the number of bytes it occupies.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, AsrError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        let head_len = match response.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => {
                return Err(AsrError::Handshake(format!("malformed response head: {}", e)));
            }
        };

        let code = response.code.unwrap_or_default();
        let reason = response.reason.unwrap_or_default().to_string();
        if code != 101 || !reason.contains("Switching Protocols") {
            return Err(AsrError::Handshake(format!(
                "unexpected status: {} {}",
                code, reason
            )));
        }

        let headers = response
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_ascii_lowercase(),
                    String::from_utf8_lossy(h.value).trim().to_string(),
                )
            })
            .collect();

        Ok(Some((
            Self {
                code,
                reason,
                headers,
            },
            head_len,
        )))
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}
