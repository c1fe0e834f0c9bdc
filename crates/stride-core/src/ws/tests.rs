use super::*;

#[test]
fn short_text_frame_encodes_with_mask_bit() {
    let mask = [0x11, 0x22, 0x33, 0x44];
    let mut out = [0u8; 32];
    let len = encode_masked_frame(Opcode::Text, mask, b"hi", &mut out).unwrap();

    assert_eq!(len, 2 + 4 + 2);
    assert_eq!(out[0], 0x81);
    assert_eq!(out[1], 0x80 | 2);
    assert_eq!(&out[2..6], &mask);
    assert_eq!(out[6], b'h' ^ 0x11);
    assert_eq!(out[7], b'i' ^ 0x22);
}

#[test]
fn medium_payload_uses_sixteen_bit_length() {
    let payload = [0xAAu8; 200];
    let mut out = [0u8; 256];
    let len = encode_masked_frame(Opcode::Text, [0; 4], &payload, &mut out).unwrap();

    assert_eq!(len, 4 + 4 + 200);
    assert_eq!(out[1], 0x80 | 126);
    assert_eq!(u16::from_be_bytes([out[2], out[3]]), 200);
}

#[test]
fn masking_round_trips_through_unmask() {
    let mask = [0xDE, 0xAD, 0xBE, 0xEF];
    let mut out = [0u8; 64];
    let len = encode_masked_frame(Opcode::Text, mask, b"step payload", &mut out).unwrap();

    let header = parse_frame_header(&out[..len]).unwrap();
    assert_eq!(header.opcode, Opcode::Text);
    assert!(header.masked);
    assert_eq!(header.payload_len, 12);

    let mut payload = [0u8; 12];
    payload.copy_from_slice(&out[header.header_len..len]);
    unmask_payload(header.mask, &mut payload);
    assert_eq!(&payload, b"step payload");
}

#[test]
fn unmasked_server_text_frame_parses() {
    // FIN + text, 5-byte unmasked payload "hello".
    let frame = [0x81, 0x05, b'h', b'e', b'l', b'l', b'o'];
    let header = parse_frame_header(&frame).unwrap();

    assert!(header.fin);
    assert_eq!(header.opcode, Opcode::Text);
    assert!(!header.masked);
    assert_eq!(header.payload_len, 5);
    assert_eq!(header.header_len, 2);
}

#[test]
fn close_ping_pong_opcodes_parse() {
    assert_eq!(parse_frame_header(&[0x88, 0x00]).unwrap().opcode, Opcode::Close);
    assert_eq!(parse_frame_header(&[0x89, 0x00]).unwrap().opcode, Opcode::Ping);
    assert_eq!(parse_frame_header(&[0x8A, 0x00]).unwrap().opcode, Opcode::Pong);
}

#[test]
fn reserved_opcode_is_a_protocol_error() {
    assert_eq!(parse_frame_header(&[0x83, 0x00]), Err(FrameError::UnknownOpcode));
}

#[test]
fn truncated_headers_ask_for_more_bytes() {
    assert_eq!(parse_frame_header(&[0x81]), Err(FrameError::Truncated));
    // 16-bit extended length announced but only one length byte present.
    assert_eq!(parse_frame_header(&[0x81, 126, 0x01]), Err(FrameError::Truncated));
    // Mask announced but absent.
    assert_eq!(parse_frame_header(&[0x81, 0x80 | 2]), Err(FrameError::Truncated));
}

#[test]
fn pong_reply_is_unmasked_and_echoes_payload() {
    let mut out = [0u8; 16];
    let len = encode_unmasked_frame(Opcode::Pong, b"ka", &mut out).unwrap();

    assert_eq!(len, 4);
    assert_eq!(&out[..4], &[0x8A, 0x02, b'k', b'a']);
}

#[test]
fn client_key_is_base64_of_sixteen_bytes() {
    let key = encode_client_key(&[0u8; 16]);
    assert_eq!(key.as_str(), "AAAAAAAAAAAAAAAAAAAAAA==");

    let key = encode_client_key(&[
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
        0x0E, 0x0F,
    ]);
    assert_eq!(key.as_str(), "AAECAwQFBgcICQoLDA0ODw==");
}

#[test]
fn upgrade_request_carries_the_required_headers() {
    let request = upgrade_request("steps.example.com", "/", "dGVzdGtleQ==");
    let text = request.as_str();

    assert!(text.starts_with("GET / HTTP/1.1\r\n"));
    assert!(text.contains("Host: steps.example.com\r\n"));
    assert!(text.contains("Upgrade: websocket\r\n"));
    assert!(text.contains("Connection: Upgrade\r\n"));
    assert!(text.contains("Sec-WebSocket-Key: dGVzdGtleQ==\r\n"));
    assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn only_status_101_is_accepted() {
    assert_eq!(
        check_upgrade_response(b"HTTP/1.1 101 Switching Protocols\r\n\r\n"),
        Ok(())
    );
    assert_eq!(
        check_upgrade_response(b"HTTP/1.1 403 Forbidden\r\n\r\n"),
        Err(HandshakeError::Rejected { status: 403 })
    );
    assert_eq!(
        check_upgrade_response(b"not http at all"),
        Err(HandshakeError::Malformed)
    );
}

#[test]
fn response_complete_requires_the_blank_line() {
    assert!(!response_complete(b"HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response_complete(b"HTTP/1.1 101 Switching Protocols\r\n\r\n"));
}
