//! # Identity-Multiplexed Router
//!
//! The server side of a channel. Accepts TCP connections, learns each one's
//! identity from its first frame, and funnels every later frame into one inbox
//! tagged with that identity. Replies are routed back by identity.
//!
//! ## Invariants
//! - One route per identity. A second connection announcing a live identity
//!   replaces the first route; the collision is logged.
//! - A connection only removes its own route when it ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;

use crate::identity::Identity;
use crate::transport;
use crate::transport::Error;
use crate::transport::read_frame;
use crate::transport::write_frame;

const INBOX_CAPACITY: usize = 1024;

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after the `failures`-th consecutive accept error: doubles from
/// `ACCEPT_BACKOFF_BASE`, capped at `ACCEPT_BACKOFF_MAX`.
pub(crate) fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE.saturating_mul(1 << exponent).min(ACCEPT_BACKOFF_MAX)
}

/// A frame received from a client.
#[derive(Debug)]
pub struct Inbound {
    pub identity: Identity,
    pub payload: Vec<u8>,
}

struct Route {
    conn_id: u64,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct Shared {
    routes: DashMap<Identity, Route>,
    connections: DashMap<u64, AbortHandle>,
    next_conn: AtomicU64,
}

pub struct Router {
    name: &'static str,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Inbound>>,
    accept: JoinHandle<()>,
}

impl Router {
    /// Binds a listener; port 0 picks a free port.
    pub async fn bind(name: &'static str, addr: impl ToSocketAddrs) -> transport::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(Shared::default());
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);

        let accept = tokio::spawn(Self::accept_loop(name, listener, shared.clone(), inbox_tx));
        tracing::info!(channel = name, %local_addr, "listening");

        Ok(Self {
            name,
            local_addr,
            shared,
            inbox: tokio::sync::Mutex::new(inbox_rx),
            accept,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the next inbound frame; `None` once the router is closed.
    pub async fn recv(&self) -> Option<Inbound> {
        self.inbox.lock().await.recv().await
    }

    /// Takes an inbound frame if one is ready.
    pub fn try_recv(&self) -> Option<Inbound> {
        self.inbox.try_lock().ok()?.try_recv().ok()
    }

    /// Queues a reply for the connection currently holding `identity`.
    pub fn send(&self, identity: &Identity, payload: Vec<u8>) -> transport::Result<()> {
        let route = self
            .shared
            .routes
            .get(identity)
            .ok_or_else(|| Error::UnknownPeer(identity.clone()))?;
        route
            .outbox
            .send(payload)
            .map_err(|_| Error::ConnectionLost(format!("connection for {} is gone", identity)))
    }

    /// Stops accepting and drops every connection. Idempotent.
    pub fn close(&self) {
        self.accept.abort();
        let conn_ids: Vec<u64> = self.shared.connections.iter().map(|e| *e.key()).collect();
        for id in conn_ids {
            if let Some((_, handle)) = self.shared.connections.remove(&id) {
                handle.abort();
            }
        }
        self.shared.routes.clear();
        tracing::debug!(channel = self.name, "router closed");
    }

    async fn accept_loop(
        name: &'static str,
        listener: TcpListener,
        shared: Arc<Shared>,
        inbox: mpsc::Sender<Inbound>,
    ) {
        let mut failures: u32 = 0;
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => {
                    failures = 0;
                    accepted
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = accept_backoff(failures);
                    tracing::warn!(channel = name, error = %e, failures, ?delay, "accept failed, backing off");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            let conn_id = shared.next_conn.fetch_add(1, Ordering::Relaxed);
            let task = tokio::spawn(Self::serve(name, conn_id, stream, shared.clone(), inbox.clone()));
            shared.connections.insert(conn_id, task.abort_handle());
            tracing::trace!(channel = name, %peer, conn_id, "accepted");
        }
    }

    async fn serve(
        name: &'static str,
        conn_id: u64,
        stream: TcpStream,
        shared: Arc<Shared>,
        inbox: mpsc::Sender<Inbound>,
    ) {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let identity = match read_frame(&mut reader).await {
            Ok(Some(hello)) => Identity::new(hello),
            Ok(None) => {
                shared.connections.remove(&conn_id);
                return;
            }
            Err(e) => {
                tracing::debug!(channel = name, conn_id, error = %e, "bad hello frame");
                shared.connections.remove(&conn_id);
                return;
            }
        };

        let (outbox, mut outgoing) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = shared.routes.insert(identity.clone(), Route { conn_id, outbox }) {
            tracing::warn!(channel = name, %identity, previous = previous.conn_id, conn_id, "identity collision, routing to newest connection");
        }

        loop {
            match read_frame(&mut reader).await {
                Ok(Some(payload)) => {
                    let inbound = Inbound { identity: identity.clone(), payload };
                    if inbox.send(inbound).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(channel = name, %identity, error = %e, "connection read failed");
                    break;
                }
            }
        }

        shared.routes.remove_if(&identity, |_, route| route.conn_id == conn_id);
        shared.connections.remove(&conn_id);
        writer_task.abort();
        tracing::debug!(channel = name, %identity, "connection ended");
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.close();
    }
}
