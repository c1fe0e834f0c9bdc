//! RFC 6455 frame encode/decode against raw byte slices.

/// Largest header this codec emits or accepts: 2 bytes of flags and
/// length, 8 bytes of 64-bit extended length, 4 bytes of mask.
pub const MAX_HEADER_BYTES: usize = 14;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    const fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// Not enough bytes yet to decide; read more and retry.
    Truncated,
    /// Reserved opcode bits; treated as a transport error upstream.
    UnknownOpcode,
    /// Output buffer cannot hold the encoded frame.
    BufferTooSmall,
    /// 64-bit payload length exceeding what this device could buffer.
    PayloadTooLong,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub mask: [u8; 4],
    pub payload_len: usize,
    pub header_len: usize,
}

/// Parses one frame header from the front of `buf`. `Truncated` is the
/// resumable case: accumulate more bytes and call again.
pub fn parse_frame_header(buf: &[u8]) -> Result<FrameHeader, FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::Truncated);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_bits(buf[0] & 0x0F).ok_or(FrameError::UnknownOpcode)?;
    let masked = buf[1] & 0x80 != 0;
    let len7 = buf[1] & 0x7F;

    let mut pos = 2usize;
    let payload_len = match len7 {
        126 => {
            if buf.len() < pos + 2 {
                return Err(FrameError::Truncated);
            }
            let len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
            pos += 2;
            len
        }
        127 => {
            if buf.len() < pos + 8 {
                return Err(FrameError::Truncated);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            pos += 8;
            usize::try_from(len).map_err(|_| FrameError::PayloadTooLong)?
        }
        len => usize::from(len),
    };

    let mut mask = [0u8; 4];
    if masked {
        if buf.len() < pos + 4 {
            return Err(FrameError::Truncated);
        }
        mask.copy_from_slice(&buf[pos..pos + 4]);
        pos += 4;
    }

    Ok(FrameHeader {
        fin,
        opcode,
        masked,
        mask,
        payload_len,
        header_len: pos,
    })
}

/// XORs the payload with the mask, cyclically, in place.
pub fn unmask_payload(mask: [u8; 4], payload: &mut [u8]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

fn encode_length(len: usize, mask_bit: u8, out: &mut [u8]) -> Result<usize, FrameError> {
    if len < 126 {
        if out.len() < 2 {
            return Err(FrameError::BufferTooSmall);
        }
        out[1] = mask_bit | len as u8;
        Ok(2)
    } else if len < 65_536 {
        if out.len() < 4 {
            return Err(FrameError::BufferTooSmall);
        }
        out[1] = mask_bit | 126;
        out[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        Ok(4)
    } else {
        if out.len() < 10 {
            return Err(FrameError::BufferTooSmall);
        }
        out[1] = mask_bit | 127;
        out[2..10].copy_from_slice(&(len as u64).to_be_bytes());
        Ok(10)
    }
}

/// Encodes a single-frame client message (FIN set, mask bit set, payload
/// XORed with `mask`). Returns the total frame length written to `out`.
pub fn encode_masked_frame(
    opcode: Opcode,
    mask: [u8; 4],
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, FrameError> {
    if out.is_empty() {
        return Err(FrameError::BufferTooSmall);
    }
    out[0] = 0x80 | opcode.bits();

    let mut pos = encode_length(payload.len(), 0x80, out)?;
    if out.len() < pos + 4 + payload.len() {
        return Err(FrameError::BufferTooSmall);
    }

    out[pos..pos + 4].copy_from_slice(&mask);
    pos += 4;
    for (i, byte) in payload.iter().enumerate() {
        out[pos + i] = byte ^ mask[i % 4];
    }
    Ok(pos + payload.len())
}

/// Encodes a single frame without masking; used for the pong reply,
/// which echoes the ping payload verbatim.
pub fn encode_unmasked_frame(
    opcode: Opcode,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, FrameError> {
    if out.is_empty() {
        return Err(FrameError::BufferTooSmall);
    }
    out[0] = 0x80 | opcode.bits();

    let pos = encode_length(payload.len(), 0x00, out)?;
    if out.len() < pos + payload.len() {
        return Err(FrameError::BufferTooSmall);
    }
    out[pos..pos + payload.len()].copy_from_slice(payload);
    Ok(pos + payload.len())
}
