//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between a client and a server.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about envelopes or values.
//!   It moves opaque buffers.
//! - **Request-Response**: The client interaction model is "send bytes, await bytes",
//!   strictly alternating on one channel.
//!
//! ## Framing
//!
//! On TCP every frame is `[Len: u32 LE][Payload: Len]`. The first frame a client
//! sends on a new connection is its identity; every later frame is a payload.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::identity::Identity;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Buffer reserved up front for an incoming frame.
const INITIAL_FRAME_CAPACITY: usize = 64 * 1024;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// A frame exceeded `MAX_FRAME_LEN`.
    PayloadTooLarge(usize),
    /// Generic I/O error or internal transport failure.
    Io(String),
    /// The local end was closed; pending and later calls fail with this.
    ChannelClosed,
    /// No live connection is registered for the identity.
    UnknownPeer(Identity),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::PayloadTooLarge(len) => write!(f, "Payload of {} bytes too large for transport", len),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::ChannelClosed => write!(f, "Channel closed"),
            Self::UnknownPeer(id) => write!(f, "No connection for identity {}", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A mechanism to send a byte buffer and receive a reply.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload and waits for its reply.
    ///
    /// # Invariants
    /// - At most one call is on the wire at a time; concurrent callers queue.
    /// - A call pending while `close()` runs fails with `Error::ChannelClosed`.
    /// - Should not interpret the payload content.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Closes the channel. Idempotent.
    async fn close(&self);
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::PayloadTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame; `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::PayloadTooLarge(len));
    }
    // Capacity grows with the bytes received, never with the header alone.
    let mut payload = Vec::with_capacity(len.min(INITIAL_FRAME_CAPACITY));
    let read = (&mut *reader).take(len as u64).read_to_end(&mut payload).await?;
    if read < len {
        return Err(Error::ConnectionLost(format!("frame truncated after {} of {} bytes", read, len)));
    }
    Ok(Some(payload))
}
