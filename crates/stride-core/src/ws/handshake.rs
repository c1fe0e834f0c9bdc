//! HTTP Upgrade request/response handling for the client handshake.

use core::fmt::Write;

use heapless::String as HeaplessString;

pub const CLIENT_KEY_BYTES: usize = 16;
pub const HANDSHAKE_RESPONSE_TIMEOUT_MS: u64 = 5_000;

const UPGRADE_REQUEST_BYTES: usize = 384;
const WS_KEY_CHARS: usize = 24;

pub type WsKey = HeaplessString<WS_KEY_CHARS>;
pub type UpgradeRequest = HeaplessString<UPGRADE_REQUEST_BYTES>;

const BASE64_TABLE: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Base64 of 16 random bytes: the `Sec-WebSocket-Key` value (24 chars
/// including the trailing `==`).
pub fn encode_client_key(random: &[u8; CLIENT_KEY_BYTES]) -> WsKey {
    let mut out = WsKey::new();
    for chunk in random.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied().unwrap_or(0);
        let b2 = chunk.get(2).copied().unwrap_or(0);

        let _ = out.push(BASE64_TABLE[usize::from(b0 >> 2)] as char);
        let _ = out.push(BASE64_TABLE[usize::from(((b0 & 0x03) << 4) | (b1 >> 4))] as char);
        if chunk.len() > 1 {
            let _ = out.push(BASE64_TABLE[usize::from(((b1 & 0x0F) << 2) | (b2 >> 6))] as char);
        } else {
            let _ = out.push('=');
        }
        if chunk.len() > 2 {
            let _ = out.push(BASE64_TABLE[usize::from(b2 & 0x3F)] as char);
        } else {
            let _ = out.push('=');
        }
    }
    out
}

/// The full Upgrade request for the fixed server endpoint.
pub fn upgrade_request(host: &str, path: &str, key: &str) -> UpgradeRequest {
    let mut out = UpgradeRequest::new();
    let _ = write!(
        out,
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeError {
    /// Response does not look like an HTTP status line.
    Malformed,
    /// Server answered with a status other than 101.
    Rejected { status: u16 },
}

/// True once the header section (terminated by a blank line) is fully
/// buffered; the caller keeps reading until then or its timeout fires.
pub fn response_complete(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Validates the status line; only `101 Switching Protocols` counts as
/// an accepted upgrade.
pub fn check_upgrade_response(response: &[u8]) -> Result<(), HandshakeError> {
    if !response.starts_with(b"HTTP/") {
        return Err(HandshakeError::Malformed);
    }

    let first_space = response
        .iter()
        .position(|&b| b == b' ')
        .ok_or(HandshakeError::Malformed)?;
    let digits = response
        .get(first_space + 1..first_space + 4)
        .ok_or(HandshakeError::Malformed)?;

    let mut status = 0u16;
    for &d in digits {
        if !d.is_ascii_digit() {
            return Err(HandshakeError::Malformed);
        }
        status = status * 10 + u16::from(d - b'0');
    }

    if status == 101 {
        Ok(())
    } else {
        Err(HandshakeError::Rejected { status })
    }
}
