//! Handler trait for connection events.
//!
//! A [`Handler`] receives everything a connection produces: completed
//! messages, raw frames for low-level observers, the close notification,
//! and protocol violations. Only [`Handler::on_message`] must be
//! implemented; the other slots default to doing nothing.
//!
//! # Examples
//!
//! An echo handler holding a send handle:
//!
//! ```
//! use ws_framing::{Handler, Message, Sender};
//!
//! struct Echo {
//!     sender: Sender,
//! }
//!
//! impl Handler for Echo {
//!     async fn on_message(&mut self, message: Message) {
//!         let _ = match &message {
//!             Message::Text(text) => self.sender.send_text(text).await,
//!             Message::Binary(data) => self.sender.send_binary(data).await,
//!         };
//!     }
//! }
//! ```

use crate::frame::Frame;
use crate::session::{Message, ProtocolError};

/// Trait for types that consume connection events.
///
/// All methods run on the connection's driving task, one at a time and in
/// wire order, so implementations may hold mutable state without locking.
///
/// # Examples
///
/// ```
/// use ws_framing::{Handler, Message, ProtocolError};
///
/// #[derive(Default)]
/// struct Collector {
///     messages: Vec<Message>,
///     errors: Vec<String>,
/// }
///
/// impl Handler for Collector {
///     async fn on_message(&mut self, message: Message) {
///         self.messages.push(message);
///     }
///
///     async fn on_error(&mut self, error: ProtocolError) {
///         self.errors.push(error.to_string());
///     }
/// }
/// ```
pub trait Handler {
    /// Called for every decoded frame, before any dispatch.
    ///
    /// Control frames, continuations and frames with reserved opcodes all
    /// pass through here, which makes this the hook for low-level
    /// inspection. The default does nothing.
    #[allow(async_fn_in_trait)]
    async fn on_frame(&mut self, frame: &Frame) {
        let _ = frame;
    }

    /// Called once per completed text or binary message.
    #[allow(async_fn_in_trait)]
    async fn on_message(&mut self, message: Message);

    /// Called exactly once when the connection reaches its end: close
    /// handshake completion, peer end-of-stream, or transport failure.
    ///
    /// Close frames in this dialect carry no status code or reason, so
    /// there is nothing further to report. The default does nothing.
    #[allow(async_fn_in_trait)]
    async fn on_closed(&mut self) {}

    /// Called when the peer commits a protocol violation.
    ///
    /// Violations are fatal: the connection is closing by the time this
    /// runs. The default does nothing.
    #[allow(async_fn_in_trait)]
    async fn on_error(&mut self, error: ProtocolError) {
        let _ = error;
    }
}
