//! Wire message formatting for the step upload endpoint.

use core::fmt::Write;

use heapless::String as HeaplessString;

// Fixed JSON skeleton plus a 20-digit seconds field and the MAC leaves
// headroom below this capacity, so the writes cannot truncate.
pub const STEP_MESSAGE_BYTES: usize = 160;
pub const MAC_STR_BYTES: usize = 17;

pub type StepMessage = HeaplessString<STEP_MESSAGE_BYTES>;
pub type MacString = HeaplessString<MAC_STR_BYTES>;

/// Six uppercase hex byte pairs joined by `:`, e.g. `AA:BB:CC:DD:EE:FF`.
pub fn format_mac(mac: &[u8; 6]) -> MacString {
    let mut out = MacString::new();
    for (i, byte) in mac.iter().enumerate() {
        if i > 0 {
            let _ = out.push(':');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// `{"action":"sendStep","data":{"sent_at":<secs>.<millis>,"deviceMAC":"..."}}`
/// with `sent_at` as an unquoted decimal carrying exactly three
/// fractional digits of millisecond resolution.
pub fn step_message(timestamp_ms: u64, device_mac: &str) -> StepMessage {
    let mut out = StepMessage::new();
    let _ = write!(
        out,
        "{{\"action\":\"sendStep\",\"data\":{{\"sent_at\":{}.{:03},\"deviceMAC\":\"{}\"}}}}",
        timestamp_ms / 1000,
        timestamp_ms % 1000,
        device_mac
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_formats_as_uppercase_colon_pairs() {
        let mac = format_mac(&[0xaa, 0x0b, 0xcc, 0x1d, 0xee, 0x0f]);
        assert_eq!(mac.as_str(), "AA:0B:CC:1D:EE:0F");
    }

    #[test]
    fn step_message_matches_the_schema() {
        let msg = step_message(1_234_567_890_123, "AA:BB:CC:DD:EE:FF");
        assert_eq!(
            msg.as_str(),
            "{\"action\":\"sendStep\",\"data\":{\"sent_at\":1234567890.123,\"deviceMAC\":\"AA:BB:CC:DD:EE:FF\"}}"
        );
    }

    #[test]
    fn sub_second_millis_are_zero_padded() {
        let msg = step_message(5_007, "00:00:00:00:00:00");
        assert!(msg.contains("\"sent_at\":5.007,"));
    }
}
