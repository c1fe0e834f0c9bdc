//! WebSocket client protocol: pure frame codec and HTTP Upgrade
//! handshake, with no socket I/O. The firmware binary owns the TCP
//! session and drives these encoders/parsers against it.

mod codec;
mod handshake;

#[cfg(test)]
mod tests;

pub use codec::{
    FrameError, FrameHeader, MAX_HEADER_BYTES, Opcode, encode_masked_frame, encode_unmasked_frame,
    parse_frame_header, unmask_payload,
};
pub use handshake::{
    CLIENT_KEY_BYTES, HANDSHAKE_RESPONSE_TIMEOUT_MS, HandshakeError, UpgradeRequest, WsKey,
    check_upgrade_response, encode_client_key, response_complete, upgrade_request,
};

/// Application-level socket state; single writer (the transport task),
/// multiple readers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TransportState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Error = 3,
}

impl TransportState {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

/// Client ping cadence while the link is otherwise idle.
pub const KEEPALIVE_INTERVAL_MS: u64 = 60_000;
