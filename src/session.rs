//! Frame dispatch and message reassembly.
//!
//! [`Session`] is the per-connection protocol state machine: it takes
//! decoded frames one at a time and answers with a [`Step`] describing
//! what the transport driver owes in return, whether that is a completed
//! message, a control reply, a close acknowledgement, or a protocol
//! violation. It performs no IO of its own, which keeps every dispatch
//! rule testable with plain frames.
//!
//! Dispatch rules:
//! - Text and binary frames begin or complete messages; continuation
//!   frames extend the one in progress. A fragmented message must finish
//!   before another data frame may start.
//! - Control frames are handled the same way in any assembly state and
//!   never touch the in-progress buffer. They must not be fragmented.
//! - A violation marks the connection closing. The partial assembly is
//!   kept, not cleared; if the dying drain still completes it with
//!   continuations, the message is delivered as usual.
//! - Once closing, the only frame owed to the peer is the single close
//!   acknowledgement: pings go unanswered and further violations carry
//!   no close frame of their own.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::frame::{Frame, Opcode};

/// The kind of an application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// UTF-8 text
    Text,
    /// Raw bytes
    Binary,
}

/// A completed application message, reassembled from one or more frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message with validated UTF-8 content.
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

impl Message {
    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Text(_) => MessageKind::Text,
            Message::Binary(_) => MessageKind::Binary,
        }
    }

    /// Check if this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Check if this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// The text content, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// The payload bytes of either message kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Consume the message, returning its payload bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// A protocol violation detected during frame dispatch.
///
/// Every violation is fatal to the connection: the session marks itself
/// closing when it reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// A continuation frame arrived with no message in progress.
    StrayContinuation,
    /// A data frame arrived while another message was still unfinished.
    InterruptedMessage,
    /// A frame carried an opcode outside the assigned range.
    UnknownOpcode(u8),
    /// A control frame arrived with the FIN bit clear.
    FragmentedControl,
    /// A text message did not decode as UTF-8.
    InvalidUtf8,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::StrayContinuation => {
                write!(f, "initial frame can't be continuation")
            }
            ProtocolError::InterruptedMessage => write!(f, "incomplete frame"),
            ProtocolError::UnknownOpcode(value) => {
                write!(f, "unhandled websocket opcode {:#X}", value)
            }
            ProtocolError::FragmentedControl => write!(f, "fragmented control frame"),
            ProtocolError::InvalidUtf8 => write!(f, "invalid UTF-8 in text message"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// The outcome of dispatching one frame.
///
/// The driving loop matches on this exhaustively; nothing else escapes
/// the session.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// The frame was absorbed with nothing further to do.
    None,
    /// A complete message is ready for the application.
    Message(Message),
    /// A control reply owed to the peer (pong for a ping).
    Reply(Frame),
    /// The peer opened the close handshake: notify the application and
    /// send the acknowledgement.
    PeerClose {
        /// The close frame to send back.
        ack: Frame,
    },
    /// The close handshake finished; tear the connection down.
    Closed,
    /// A protocol violation. When `close` is `Some`, this violation
    /// opened the close handshake and the frame must be sent.
    Violation {
        /// What went wrong.
        error: ProtocolError,
        /// Close frame to send, unless the handshake was already open.
        close: Option<Frame>,
    },
}

/// Reassembly state for a fragmented message.
#[derive(Debug)]
enum Assembly {
    Idle,
    Assembling { kind: MessageKind, buffer: Vec<u8> },
}

/// Per-connection protocol state: fragmentation reassembly plus the
/// closing flag for the close handshake.
///
/// The closing flag is an atomic shared with any send handles derived
/// from the connection, so application sends are rejected from the
/// moment either side opens the handshake.
///
/// # Examples
///
/// ```
/// use ws_framing::{Frame, Message, Session, Step};
///
/// let mut session = Session::new();
/// let step = session.handle_frame(Frame::text("Hello"));
/// assert_eq!(step, Step::Message(Message::Text("Hello".into())));
/// ```
#[derive(Debug)]
pub struct Session {
    assembly: Assembly,
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Create the state machine for a fresh connection.
    pub fn new() -> Self {
        Session {
            assembly: Assembly::Idle,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Dispatch one decoded frame and report what it produced.
    pub fn handle_frame(&mut self, frame: Frame) -> Step {
        match frame.opcode {
            Opcode::Close | Opcode::Ping | Opcode::Pong if !frame.fin => {
                self.violation(ProtocolError::FragmentedControl)
            }
            Opcode::Close => {
                if self.closing.swap(true, Ordering::SeqCst) {
                    Step::Closed
                } else {
                    Step::PeerClose { ack: Frame::close() }
                }
            }
            Opcode::Ping => {
                if self.is_closing() {
                    Step::None
                } else {
                    Step::Reply(Frame::pong(frame.payload))
                }
            }
            Opcode::Pong => Step::None,
            Opcode::Continuation => self.continuation(frame),
            Opcode::Text => self.data_frame(MessageKind::Text, frame),
            Opcode::Binary => self.data_frame(MessageKind::Binary, frame),
            Opcode::Reserved(value) => self.unknown_opcode(value),
        }
    }

    /// Whether the close handshake has been opened by either side.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Whether a fragmented message is currently being reassembled.
    pub fn is_assembling(&self) -> bool {
        matches!(self.assembly, Assembly::Assembling { .. })
    }

    /// Mark the close handshake as opened by this side.
    ///
    /// Returns `true` if this call performed the transition, `false` if
    /// the connection was already closing. The caller owning the
    /// transport sends the close frame exactly when this returns `true`.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn close_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closing)
    }

    fn continuation(&mut self, frame: Frame) -> Step {
        match std::mem::replace(&mut self.assembly, Assembly::Idle) {
            Assembly::Assembling { kind, mut buffer } => {
                buffer.extend_from_slice(&frame.payload);
                if frame.fin {
                    self.finish(kind, buffer)
                } else {
                    self.assembly = Assembly::Assembling { kind, buffer };
                    Step::None
                }
            }
            Assembly::Idle => self.violation(ProtocolError::StrayContinuation),
        }
    }

    fn data_frame(&mut self, kind: MessageKind, frame: Frame) -> Step {
        if self.is_assembling() {
            // A new message may not start while another is unfinished.
            // The partial assembly stays in place (module docs).
            return self.violation(ProtocolError::InterruptedMessage);
        }
        if frame.fin {
            self.finish(kind, frame.payload)
        } else {
            self.assembly = Assembly::Assembling {
                kind,
                buffer: frame.payload,
            };
            Step::None
        }
    }

    fn unknown_opcode(&mut self, value: u8) -> Step {
        if self.is_assembling() {
            self.violation(ProtocolError::InterruptedMessage)
        } else {
            self.violation(ProtocolError::UnknownOpcode(value))
        }
    }

    fn finish(&mut self, kind: MessageKind, bytes: Vec<u8>) -> Step {
        match kind {
            MessageKind::Text => match String::from_utf8(bytes) {
                Ok(text) => Step::Message(Message::Text(text)),
                Err(_) => self.violation(ProtocolError::InvalidUtf8),
            },
            MessageKind::Binary => Step::Message(Message::Binary(bytes)),
        }
    }

    fn violation(&mut self, error: ProtocolError) -> Step {
        let close = if self.closing.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Frame::close())
        };
        Step::Violation { error, close }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_text_frame() {
        let mut session = Session::new();
        let step = session.handle_frame(Frame::text("Hello"));
        assert_eq!(step, Step::Message(Message::Text("Hello".into())));
        assert!(!session.is_assembling());
        assert!(!session.is_closing());
    }

    #[test]
    fn test_single_binary_frame() {
        let mut session = Session::new();
        let step = session.handle_frame(Frame::binary(b"hello!".to_vec()));
        assert_eq!(step, Step::Message(Message::Binary(b"hello!".to_vec())));
    }

    #[test]
    fn test_fragmented_message_reassembles() {
        let mut session = Session::new();

        assert_eq!(
            session.handle_frame(Frame::text("He").with_fin(false)),
            Step::None
        );
        assert!(session.is_assembling());
        assert_eq!(
            session.handle_frame(Frame::continuation(b"ll".to_vec()).with_fin(false)),
            Step::None
        );
        let step = session.handle_frame(Frame::continuation(b"o".to_vec()));
        assert_eq!(step, Step::Message(Message::Text("Hello".into())));
        assert!(!session.is_assembling());
    }

    #[test]
    fn test_fragmented_binary_keeps_kind() {
        let mut session = Session::new();

        session.handle_frame(Frame::binary(vec![1, 2]).with_fin(false));
        let step = session.handle_frame(Frame::continuation(vec![3]));
        assert_eq!(step, Step::Message(Message::Binary(vec![1, 2, 3])));
    }

    #[test]
    fn test_stray_continuation() {
        let mut session = Session::new();

        let step = session.handle_frame(Frame::continuation(b"lost".to_vec()));
        match step {
            Step::Violation { error, close } => {
                assert_eq!(error, ProtocolError::StrayContinuation);
                assert_eq!(error.to_string(), "initial frame can't be continuation");
                assert_eq!(close.unwrap().encode(), vec![0x88, 0x00]);
            }
            other => panic!("unexpected step: {:?}", other),
        }
        assert!(session.is_closing());
    }

    #[test]
    fn test_stray_continuation_without_fin() {
        let mut session = Session::new();

        let step = session.handle_frame(Frame::continuation(b"lost".to_vec()).with_fin(false));
        assert!(matches!(
            step,
            Step::Violation {
                error: ProtocolError::StrayContinuation,
                ..
            }
        ));
    }

    #[test]
    fn test_data_frame_interrupting_assembly() {
        let mut session = Session::new();

        session.handle_frame(Frame::text("He").with_fin(false));
        let step = session.handle_frame(Frame::text("new"));
        match step {
            Step::Violation { error, close } => {
                assert_eq!(error, ProtocolError::InterruptedMessage);
                assert_eq!(error.to_string(), "incomplete frame");
                assert!(close.is_some());
            }
            other => panic!("unexpected step: {:?}", other),
        }

        // The partial assembly survives the violation; a continuation
        // arriving during the dying drain still completes it.
        assert!(session.is_assembling());
        let step = session.handle_frame(Frame::continuation(b"llo".to_vec()));
        assert_eq!(step, Step::Message(Message::Text("Hello".into())));
    }

    #[test]
    fn test_ping_replies_pong() {
        let mut session = Session::new();

        let step = session.handle_frame(Frame::ping(b"abc".to_vec()));
        match step {
            Step::Reply(frame) => {
                assert_eq!(frame.opcode, Opcode::Pong);
                assert_eq!(frame.payload, b"abc");
                assert!(frame.fin);
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_pong_is_discarded() {
        let mut session = Session::new();
        assert_eq!(session.handle_frame(Frame::pong(b"abc".to_vec())), Step::None);
    }

    #[test]
    fn test_control_frames_leave_assembly_alone() {
        let mut session = Session::new();

        session.handle_frame(Frame::text("He").with_fin(false));
        let step = session.handle_frame(Frame::ping(b"keepalive".to_vec()));
        assert!(matches!(step, Step::Reply(_)));
        assert!(session.is_assembling());

        let step = session.handle_frame(Frame::continuation(b"llo".to_vec()));
        assert_eq!(step, Step::Message(Message::Text("Hello".into())));
    }

    #[test]
    fn test_fragmented_control_is_violation() {
        let mut session = Session::new();

        let step = session.handle_frame(Frame::ping(b"x".to_vec()).with_fin(false));
        assert!(matches!(
            step,
            Step::Violation {
                error: ProtocolError::FragmentedControl,
                ..
            }
        ));
    }

    #[test]
    fn test_peer_close_then_ack() {
        let mut session = Session::new();

        let step = session.handle_frame(Frame::close());
        match step {
            Step::PeerClose { ack } => assert_eq!(ack.encode(), vec![0x88, 0x00]),
            other => panic!("unexpected step: {:?}", other),
        }
        assert!(session.is_closing());

        // A second close while closing tears down without further frames.
        assert_eq!(session.handle_frame(Frame::close()), Step::Closed);
    }

    #[test]
    fn test_close_ack_after_local_initiation() {
        let mut session = Session::new();

        assert!(session.begin_close());
        assert!(!session.begin_close());

        // The peer's reply is an ack, not a fresh handshake.
        assert_eq!(session.handle_frame(Frame::close()), Step::Closed);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut session = Session::new();

        let step = session.handle_frame(Frame::new(Opcode::Reserved(3), Vec::new()));
        match step {
            Step::Violation { error, close } => {
                assert_eq!(error, ProtocolError::UnknownOpcode(3));
                assert!(error.to_string().contains("0x3"));
                assert!(close.is_some());
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_opcode_display_is_uppercase_hex() {
        assert_eq!(
            ProtocolError::UnknownOpcode(11).to_string(),
            "unhandled websocket opcode 0xB"
        );
    }

    #[test]
    fn test_invalid_utf8_text() {
        let mut session = Session::new();

        let step = session.handle_frame(Frame::new(Opcode::Text, vec![0xFF, 0xFE]));
        assert!(matches!(
            step,
            Step::Violation {
                error: ProtocolError::InvalidUtf8,
                close: Some(_),
            }
        ));
        assert!(session.is_closing());
    }

    #[test]
    fn test_invalid_utf8_across_fragments() {
        let mut session = Session::new();

        // Valid prefix, invalid once assembled.
        session.handle_frame(Frame::text("ok").with_fin(false));
        let step = session.handle_frame(Frame::continuation(vec![0xFF]));
        assert!(matches!(
            step,
            Step::Violation {
                error: ProtocolError::InvalidUtf8,
                ..
            }
        ));
    }

    #[test]
    fn test_ping_while_closing_gets_no_pong() {
        let mut session = Session::new();

        session.begin_close();
        assert_eq!(session.handle_frame(Frame::ping(b"x".to_vec())), Step::None);
    }

    #[test]
    fn test_violation_while_closing_sends_no_close_frame() {
        let mut session = Session::new();

        session.begin_close();
        let step = session.handle_frame(Frame::continuation(b"x".to_vec()));
        assert_eq!(
            step,
            Step::Violation {
                error: ProtocolError::StrayContinuation,
                close: None,
            }
        );
    }

    #[test]
    fn test_messages_still_delivered_while_closing() {
        let mut session = Session::new();

        session.begin_close();
        let step = session.handle_frame(Frame::text("flush"));
        assert_eq!(step, Step::Message(Message::Text("flush".into())));
    }

    #[test]
    fn test_message_accessors() {
        let text = Message::Text("hi".into());
        assert!(text.is_text());
        assert_eq!(text.kind(), MessageKind::Text);
        assert_eq!(text.as_text(), Some("hi"));
        assert_eq!(text.as_bytes(), b"hi");
        assert_eq!(text.len(), 2);
        assert!(!text.is_empty());

        let binary = Message::Binary(vec![1, 2, 3]);
        assert!(binary.is_binary());
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.clone().into_bytes(), vec![1, 2, 3]);
        assert_eq!(binary.kind(), MessageKind::Binary);
    }
}
