//! WebSocket framing over raw byte streams.
//!
//! This crate implements a WebSocket frame dialect with 32-bit extended
//! payload lengths: parsing and encoding of individual frames, a
//! [`tokio_util::codec`]-compatible [`FrameCodec`], a transport-free
//! [`Session`] state machine for fragmentation and the close handshake,
//! and an async [`Connection`] driver that dispatches protocol events to
//! a [`Handler`].
//!
//! # Examples
//!
//! Echo every message back to the peer:
//!
//! ```
//! use tokio::io::DuplexStream;
//! use ws_framing::{Connection, ConnectionError, Handler, Message, Sender};
//!
//! struct Echo {
//!     sender: Sender,
//! }
//!
//! impl Handler for Echo {
//!     async fn on_message(&mut self, message: Message) {
//!         let _ = self.sender.send(message).await;
//!     }
//! }
//!
//! async fn serve(stream: DuplexStream) -> Result<(), ConnectionError> {
//!     let connection = Connection::new(stream);
//!     let mut handler = Echo {
//!         sender: connection.sender(),
//!     };
//!     connection.run(&mut handler).await
//! }
//! ```

#![warn(clippy::dbg_macro, clippy::print_stdout)]
#![warn(missing_docs)]

pub mod codec;
pub mod connection;
pub mod frame;
pub mod handler;
pub mod session;

pub use codec::FrameCodec;
pub use connection::{Connection, ConnectionError, FrameReader, Sender};
pub use frame::{Frame, Opcode};
pub use handler::Handler;
pub use session::{Message, MessageKind, ProtocolError, Session, Step};
