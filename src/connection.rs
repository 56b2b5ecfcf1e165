//! Connection driver, send handle, and pull-style frame reader.
//!
//! [`Connection::run`] owns the receive side of a transport: it drains
//! every fully-buffered frame through the [`Session`] state machine,
//! dispatches the outcomes to a [`Handler`], then yields to the scheduler
//! once before reading again. The send side lives behind a cloneable
//! [`Sender`], which shares the session's closing flag so application
//! sends are refused from the moment either side opens the close
//! handshake.
//!
//! [`FrameReader`] is the lower-level alternative for callers that want
//! raw frames without dispatch: an async pull API that also implements
//! [`futures_core::Stream`].

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_core::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::codec::FrameCodec;
use crate::frame::Frame;
use crate::handler::Handler;
use crate::session::{Message, Session, Step};

const DEFAULT_BUFFER_SIZE: usize = 8192;

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Errors surfaced by the connection layer.
///
/// Protocol violations committed by the peer are not represented here;
/// those reach the [`Handler`] as [`crate::ProtocolError`] values.
#[derive(Debug)]
pub enum ConnectionError {
    /// The close handshake is open; application sends are refused.
    Closing,
    /// The payload does not fit the 32-bit length field.
    PayloadTooLarge,
    /// The transport failed.
    Io(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Closing => write!(f, "connection is closing"),
            ConnectionError::PayloadTooLarge => {
                write!(f, "payload exceeds the 32-bit length limit")
            }
            ConnectionError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(err.to_string())
    }
}

/// Cloneable handle for sending frames on a connection.
///
/// All sends produce single final unmasked frames; outgoing messages are
/// never fragmented. Once the close handshake is open, every send fails
/// with [`ConnectionError::Closing`]; the connection's own close
/// acknowledgement is the only frame that may still go out.
#[derive(Clone)]
pub struct Sender {
    writer: SharedWriter,
    closing: Arc<AtomicBool>,
}

impl Sender {
    /// Send a text message.
    pub async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        self.send_frame(Frame::text(text)).await
    }

    /// Send a binary message.
    pub async fn send_binary(&self, data: &[u8]) -> Result<(), ConnectionError> {
        self.send_frame(Frame::binary(data.to_vec())).await
    }

    /// Send a message of either kind.
    pub async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        match message {
            Message::Text(text) => self.send_frame(Frame::text(text)).await,
            Message::Binary(data) => self.send_frame(Frame::binary(data)).await,
        }
    }

    /// Send a ping frame.
    pub async fn send_ping(&self, data: &[u8]) -> Result<(), ConnectionError> {
        self.send_frame(Frame::ping(data.to_vec())).await
    }

    /// Send a pong frame.
    pub async fn send_pong(&self, data: &[u8]) -> Result<(), ConnectionError> {
        self.send_frame(Frame::pong(data.to_vec())).await
    }

    /// Open the close handshake: send the minimal close frame and mark
    /// the connection closing.
    ///
    /// Idempotent: repeated calls return `Ok` without emitting further
    /// frames. The connection tears down once the peer's acknowledgement
    /// arrives (or its end of the transport closes).
    pub async fn close(&self) -> Result<(), ConnectionError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("close handshake opened locally");
        self.write_frame(&Frame::close()).await
    }

    /// Whether the close handshake has been opened by either side.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.is_closing() {
            return Err(ConnectionError::Closing);
        }
        if frame.payload.len() as u64 > u64::from(u32::MAX) {
            return Err(ConnectionError::PayloadTooLarge);
        }
        self.write_frame(&frame).await
    }

    /// Raw frame write, bypassing the closing guard. The driver uses
    /// this for pongs and close acknowledgements.
    pub(crate) async fn write_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        let encoded = frame.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        Ok(())
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// The receive-side driver for one connection.
///
/// `run` consumes the connection: after it returns the transport has been
/// torn down and no further frames are processed. Obtain [`Sender`]
/// handles with [`Connection::sender`] before calling it.
///
/// # Examples
///
/// ```
/// use tokio::io::DuplexStream;
/// use ws_framing::{Connection, ConnectionError, Handler, Message};
///
/// struct Ignore;
///
/// impl Handler for Ignore {
///     async fn on_message(&mut self, _message: Message) {}
/// }
///
/// async fn serve(stream: DuplexStream) -> Result<(), ConnectionError> {
///     let connection = Connection::new(stream);
///     let mut handler = Ignore;
///     connection.run(&mut handler).await
/// }
/// ```
pub struct Connection<R> {
    reader: R,
    sender: Sender,
    session: Session,
    codec: FrameCodec,
    buffer: BytesMut,
    read_capacity: usize,
    closed_notified: bool,
    torn_down: bool,
}

impl<S> Connection<ReadHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a connection over a bidirectional transport.
    pub fn new(stream: S) -> Self {
        Self::new_with_buffer_size(stream, DEFAULT_BUFFER_SIZE)
    }

    /// Create a connection with a custom read-buffer capacity.
    pub fn new_with_buffer_size(stream: S, buffer_size: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::assemble(reader, Box::new(writer), buffer_size)
    }
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a connection from separate read and write halves.
    pub fn from_parts(reader: R, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::assemble(reader, Box::new(writer), DEFAULT_BUFFER_SIZE)
    }

    fn assemble(reader: R, writer: Box<dyn AsyncWrite + Send + Unpin>, buffer_size: usize) -> Self {
        let session = Session::new();
        let sender = Sender {
            writer: Arc::new(Mutex::new(writer)),
            closing: session.close_flag(),
        };
        Connection {
            reader,
            sender,
            session,
            codec: FrameCodec::new(),
            buffer: BytesMut::with_capacity(buffer_size),
            read_capacity: buffer_size,
            closed_notified: false,
            torn_down: false,
        }
    }

    /// A cloneable send handle sharing this connection's closing state.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Drive the connection until it ends.
    ///
    /// Returns `Ok(())` when the close handshake completes or the peer
    /// closes its end of the transport, and `Err` when the transport
    /// fails mid-protocol. [`Handler::on_closed`] is delivered exactly
    /// once on every path, before this returns.
    pub async fn run<H: Handler>(mut self, handler: &mut H) -> Result<(), ConnectionError> {
        let result = self.drive(handler).await;
        if !self.closed_notified {
            self.closed_notified = true;
            handler.on_closed().await;
        }
        self.teardown().await;
        result
    }

    async fn drive<H: Handler>(&mut self, handler: &mut H) -> Result<(), ConnectionError> {
        loop {
            // Drain every frame the buffer already holds before touching
            // the transport again; reads stay strictly FIFO.
            while let Some(frame) = self.codec.decode(&mut self.buffer)? {
                handler.on_frame(&frame).await;
                match self.session.handle_frame(frame) {
                    Step::None => {}
                    Step::Message(message) => handler.on_message(message).await,
                    Step::Reply(reply) => self.sender.write_frame(&reply).await?,
                    Step::PeerClose { ack } => {
                        debug!("peer opened close handshake");
                        if !self.closed_notified {
                            self.closed_notified = true;
                            handler.on_closed().await;
                        }
                        self.sender.write_frame(&ack).await?;
                    }
                    Step::Closed => {
                        debug!("close handshake complete");
                        return Ok(());
                    }
                    Step::Violation { error, close } => {
                        debug!(error = %error, "protocol violation");
                        handler.on_error(error).await;
                        if let Some(frame) = close {
                            self.sender.write_frame(&frame).await?;
                        }
                    }
                }
            }

            // One scheduler yield per drained buffer bounds how long a
            // continuously-sending peer can keep this task busy.
            tokio::task::yield_now().await;

            self.buffer.reserve(self.read_capacity);
            match self.reader.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    debug!("transport closed by peer");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.sender.closing.store(true, Ordering::SeqCst);
        let mut writer = self.sender.writer.lock().await;
        let _ = writer.shutdown().await;
        trace!("connection torn down");
    }
}

/// Pull-style frame source over any `AsyncRead`.
///
/// Yields raw frames without fragmentation handling or control dispatch;
/// pair it with [`Session`] to drive the protocol by hand. Also
/// implements [`futures_core::Stream`] for use with stream combinators.
pub struct FrameReader<R> {
    reader: R,
    codec: FrameCodec,
    buffer: BytesMut,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a frame reader over a byte source.
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            codec: FrameCodec::new(),
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(Some(frame))` for each complete frame, and `Ok(None)`
    /// once the source is exhausted. Bytes of a trailing partial frame
    /// are discarded at end-of-stream.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }
            self.buffer.reserve(DEFAULT_BUFFER_SIZE);
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
        }
    }
}

impl<R> Stream for FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    type Item = Result<Frame, ConnectionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.codec.decode(&mut this.buffer) {
                Ok(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
                Ok(None) => {}
                Err(err) => return Poll::Ready(Some(Err(err.into()))),
            }
            this.buffer.reserve(DEFAULT_BUFFER_SIZE);
            match tokio_util::io::poll_read_buf(Pin::new(&mut this.reader), cx, &mut this.buffer) {
                Poll::Ready(Ok(0)) => return Poll::Ready(None),
                Poll::Ready(Ok(_)) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
