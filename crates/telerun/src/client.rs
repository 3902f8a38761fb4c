//! # RPC Client
//!
//! Discovery (`sync_up`), the version gate, and one request/reply channel per
//! identity. Remote exceptions come back as `RemoteError`, keeping the
//! server's kind, message and traceback with a client frame appended.

use std::sync::Arc;
use std::time::Duration;

use telepack::Codec;
use telepack::PackCodec;
use telepack::Value;
use telerpc::CompatibilityError;
use telerpc::EncodedException;
use telerpc::ExceptionKind;
use telerpc::HandshakeReply;
use telerpc::Reply;
use telerpc::Request;
use telerpc::TraceFrame;
use tokio::net::ToSocketAddrs;

use crate::connection::Connection;
use crate::identity::Identity;
use crate::transport;
use crate::transport::Transport;

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// A failure raised on the server and rebuilt on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: ExceptionKind,
    pub message: String,
    pub frames: Vec<TraceFrame>,
}

impl RemoteError {
    pub fn is_invalid_session(&self) -> bool {
        self.kind == ExceptionKind::InvalidSession
    }

    /// The exception class name, e.g. `"AttributeError"`.
    pub fn kind_name(&self) -> &str {
        self.kind.as_str()
    }

    pub fn traceback(&self) -> String {
        self.frames.iter().map(|f| format!("  at {}: {}\n", f.scope, f.detail)).collect()
    }
}

impl From<EncodedException> for RemoteError {
    fn from(e: EncodedException) -> Self {
        Self { kind: e.kind, message: e.message, frames: e.frames }
    }
}

impl std::fmt::Display for RemoteError {
    /// `{:#}` appends the traceback.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if f.alternate() {
            write!(f, "\nTraceback (oldest first):\n{}", self.traceback())?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Clone)]
pub enum Error {
    /// The channel failed underneath the call.
    Transport(transport::Error),
    /// A reply could not be decoded.
    Rpc(telerpc::Error),
    /// The server raised an exception.
    Remote(RemoteError),
    /// The server is newer than this client.
    Compatibility(CompatibilityError),
    /// No handshake reply arrived in time.
    HandshakeTimeout(Duration),
    /// The channel was closed while waiting or before the call.
    ChannelClosed,
    /// The attribute is not usable this way on the client.
    Attribute(String),
    /// The server address could not be understood.
    InvalidAddress(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Remote(e) => write!(f, "Remote error: {}", e),
            Self::Compatibility(e) => write!(f, "{}", e),
            Self::HandshakeTimeout(t) => write!(f, "no handshake reply within {:?}", t),
            Self::ChannelClosed => write!(f, "Channel closed"),
            Self::Attribute(msg) => write!(f, "AttributeError: {}", msg),
            Self::InvalidAddress(addr) => write!(f, "invalid server address '{}'", addr),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        match e {
            transport::Error::ChannelClosed => Self::ChannelClosed,
            other => Self::Transport(other),
        }
    }
}

impl From<telerpc::Error> for Error {
    fn from(e: telerpc::Error) -> Self {
        Self::Rpc(e)
    }
}

impl From<CompatibilityError> for Error {
    fn from(e: CompatibilityError) -> Self {
        Self::Compatibility(e)
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Asks the handshake service at `addr` where the RPC channel lives.
///
/// Keeps retrying until `timeout` elapses, so a server that is still starting
/// is found, and "nobody listening" ends as `Error::HandshakeTimeout`.
pub async fn sync_up<A>(addr: A, timeout: Duration) -> Result<HandshakeReply>
where
    A: ToSocketAddrs + Clone + Send,
{
    let attempt = async {
        loop {
            match Connection::connect(addr.clone(), Identity::generate()).await {
                Ok(conn) => {
                    let answer = conn.call(&[]).await;
                    conn.close().await;
                    match answer {
                        Ok(bytes) => return HandshakeReply::decode(&bytes).map_err(Error::from),
                        Err(e) => tracing::debug!(error = %e, "handshake attempt failed, retrying"),
                    }
                }
                Err(e) => tracing::trace!(error = %e, "handshake service not reachable yet"),
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    };
    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| Error::HandshakeTimeout(timeout))?
}

/// Parses `"host:port"`, as given in a library path.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let invalid = || Error::InvalidAddress(address.to_owned());
    let (host, port) = address.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_owned(), port))
}

/// One identity's request/reply channel to the RPC service.
pub struct RpcClient {
    identity: Identity,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
}

impl RpcClient {
    /// Opens a fresh channel under a newly generated identity.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let identity = Identity::generate();
        let conn = Connection::connect(addr, identity.clone()).await?;
        Ok(Self::with_transport(identity, Arc::new(conn)))
    }

    pub fn with_transport(identity: Identity, transport: Arc<dyn Transport>) -> Self {
        Self { identity, transport, codec: Arc::new(PackCodec) }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Sends one request and waits for its reply.
    pub async fn request(&self, request: &Request) -> Result<Value> {
        let payload = request.encode_with(self.codec.as_ref())?;
        let bytes = self.transport.call(&payload).await?;
        match Reply::decode_with(self.codec.as_ref(), &bytes)? {
            Reply::Value(value) => Ok(value),
            Reply::Exception(exc) => {
                let detail = match &request.name {
                    Some(name) => format!("{} '{}'", request.action, name),
                    None => request.action.to_string(),
                };
                Err(RemoteError::from(exc.with_frame("client", detail)).into())
            }
        }
    }

    /// Closes the channel; a request still waiting fails with `ChannelClosed`.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}
