//! Frame codec for use with `tokio_util::codec::Framed`.
//!
//! The codec moves whole frames between byte buffers and [`Frame`] values
//! and nothing more: fragmentation reassembly and control dispatch live in
//! [`crate::session::Session`], so every frame on the wire surfaces here,
//! continuations and control frames included.

use crate::frame::Frame;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Stateless codec implementing tokio_util's `Decoder` and `Encoder` traits.
///
/// Use with `tokio_util::codec::Framed` to turn any `AsyncRead + AsyncWrite`
/// transport into a stream of raw frames and a sink for outgoing ones.
///
/// Decoding never fails: bytes that do not yet form a whole frame leave the
/// buffer untouched and yield `None`, and unassigned opcodes survive as
/// [`crate::frame::Opcode::Reserved`] for the dispatch layer to judge.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match Frame::parse(src) {
            Some((frame, consumed)) => {
                src.advance(consumed);
                trace!(
                    fin = frame.fin,
                    opcode = ?frame.opcode,
                    masked = frame.masked,
                    payload_len = frame.payload_len,
                    "decoded frame"
                );
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = frame.encode();
        trace!(
            fin = frame.fin,
            opcode = ?frame.opcode,
            payload_len = frame.payload.len(),
            "encoded frame"
        );
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}
