//! WebSocket frame parsing and encoding.
//!
//! This module speaks a 32-bit dialect of the RFC 6455 framing layout: the
//! `127` length marker is followed by a 4-byte big-endian length instead of
//! the RFC's 8-byte field, so payloads above `u32::MAX` bytes cannot be
//! framed and peers that emit full 64-bit length fields are not supported.
//! Frames up to 65535 payload bytes are wire-compatible with standard peers.

use std::fmt;

/// WebSocket opcodes as defined in RFC 6455 Section 5.2.
///
/// Values outside the six assigned opcodes are preserved as
/// [`Opcode::Reserved`] so that rejecting them is a dispatch decision,
/// not a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation frame (0x0)
    Continuation,
    /// Text data frame (0x1)
    Text,
    /// Binary data frame (0x2)
    Binary,
    /// Connection close frame (0x8)
    Close,
    /// Ping frame (0x9)
    Ping,
    /// Pong frame (0xA)
    Pong,
    /// Reserved or unassigned opcode (low 4 bits preserved)
    Reserved(u8),
}

impl Opcode {
    /// Map a 4-bit wire value to an opcode. Never fails.
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    /// The 4-bit wire value of this opcode.
    pub fn as_u8(&self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(value) => *value & 0x0F,
        }
    }

    /// Check if this is a control frame opcode.
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Check if this is a data frame opcode.
    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary | Opcode::Continuation)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Continuation => write!(f, "continuation"),
            Opcode::Text => write!(f, "text"),
            Opcode::Binary => write!(f, "binary"),
            Opcode::Close => write!(f, "close"),
            Opcode::Ping => write!(f, "ping"),
            Opcode::Pong => write!(f, "pong"),
            Opcode::Reserved(value) => write!(f, "reserved({:#X})", value),
        }
    }
}

/// A single WebSocket frame.
///
/// The masking key is always present; it is all zeroes when the frame is
/// unmasked. Payloads are stored unmasked regardless of how they arrived
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// FIN bit: indicates this is the final fragment of a message
    pub fin: bool,
    /// Opcode: identifies the frame type
    pub opcode: Opcode,
    /// Mask bit: whether the payload arrived XOR-masked
    pub masked: bool,
    /// Decoded payload length
    pub payload_len: u32,
    /// Masking key; all zeroes for unmasked frames
    pub masking_key: [u8; 4],
    /// Payload data, already unmasked
    pub payload: Vec<u8>,
}

impl Frame {
    /// Parse one frame from the front of `data`.
    ///
    /// Returns the frame and the number of bytes consumed, or `None` when
    /// the buffer does not yet hold a complete frame. There is no failure
    /// case: malformed input is indistinguishable from incomplete input at
    /// this layer, and unassigned opcodes survive as [`Opcode::Reserved`].
    /// The reserved header bits are ignored.
    ///
    /// # Frame format
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-------+-+-------------+-------------------------------+
    /// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
    /// |I|S|S|S|  (4)  |A|     (7)     |            (16/32)            |
    /// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
    /// +-+-+-+-+-------+-+-------------+-------------------------------+
    /// |Masking-key, if MASK set to 1  |          Payload Data         |
    /// +-------------------------------- - - - - - - - - - - - - - - - +
    /// :                     Payload Data continued ...                :
    /// + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
    /// ```
    pub fn parse(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < 2 {
            return None;
        }

        let byte1 = data[0];
        let fin = (byte1 & 0b1000_0000) != 0;
        let opcode = Opcode::from_u8(byte1 & 0b0000_1111);

        let byte2 = data[1];
        let masked = (byte2 & 0b1000_0000) != 0;
        let mut payload_len = (byte2 & 0b0111_1111) as u32;

        let mut offset = 2;

        if payload_len == 126 {
            if data.len() < offset + 2 {
                return None;
            }
            payload_len = u16::from_be_bytes([data[offset], data[offset + 1]]) as u32;
            offset += 2;
        } else if payload_len == 127 {
            if data.len() < offset + 4 {
                return None;
            }
            payload_len = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            offset += 4;
        }

        let mut masking_key = [0u8; 4];
        if masked {
            if data.len() < offset + 4 {
                return None;
            }
            masking_key.copy_from_slice(&data[offset..offset + 4]);
            offset += 4;
        }

        // offset never exceeds data.len() here, so the subtraction is safe
        // even when payload_len is near u32::MAX.
        if data.len() - offset < payload_len as usize {
            return None;
        }

        let mut payload = data[offset..offset + payload_len as usize].to_vec();
        offset += payload_len as usize;

        if masked {
            apply_mask(&mut payload, &masking_key);
        }

        Some((
            Frame {
                fin,
                opcode,
                masked,
                payload_len,
                masking_key,
                payload,
            },
            offset,
        ))
    }

    /// Encode the frame to wire bytes.
    ///
    /// The output is always unmasked; the mask bit is never set even when
    /// [`Frame::masked`] is true. Payloads above 65535 bytes use the `127`
    /// marker with a 4-byte length (see the module docs for the dialect
    /// this implies).
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!((self.payload.len() as u64) <= u64::from(u32::MAX));

        let payload_len = self.payload.len();
        let mut frame = Vec::with_capacity(payload_len + 6);

        let mut byte1 = self.opcode.as_u8();
        if self.fin {
            byte1 |= 0b1000_0000;
        }
        frame.push(byte1);

        if payload_len < 126 {
            frame.push(payload_len as u8);
        } else if payload_len <= 65535 {
            frame.push(126);
            frame.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            frame.push(127);
            frame.extend_from_slice(&(payload_len as u32).to_be_bytes());
        }

        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Create a final, unmasked frame with the given opcode and payload.
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        let payload_len = payload.len() as u32;
        Frame {
            fin: true,
            opcode,
            masked: false,
            payload_len,
            masking_key: [0; 4],
            payload,
        }
    }

    /// Set the FIN bit, for building fragmented messages.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Create a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    /// Create a binary frame.
    pub fn binary(data: Vec<u8>) -> Self {
        Self::new(Opcode::Binary, data)
    }

    /// Create a continuation frame.
    pub fn continuation(data: Vec<u8>) -> Self {
        Self::new(Opcode::Continuation, data)
    }

    /// Create a ping frame.
    pub fn ping(data: Vec<u8>) -> Self {
        Self::new(Opcode::Ping, data)
    }

    /// Create a pong frame.
    pub fn pong(data: Vec<u8>) -> Self {
        Self::new(Opcode::Pong, data)
    }

    /// Create the minimal close frame.
    ///
    /// Close frames carry no status code or reason; the encoded form is
    /// always the two bytes `[0x88, 0x00]`.
    pub fn close() -> Self {
        Self::new(Opcode::Close, Vec::new())
    }
}

/// Apply the XOR mask to payload data per RFC 6455 Section 5.3.
///
/// Applying the same mask twice yields the original data.
fn apply_mask(payload: &mut [u8], mask: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}
