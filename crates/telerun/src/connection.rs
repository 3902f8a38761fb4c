//! # Client Connection with Async Pump
//!
//! A TCP `Transport` for one client identity. A background pump reads reply
//! frames and hands each to the single pending call; a call lock keeps the
//! request/reply exchange strictly alternating.
//!
//! ## Invariants
//! - At most one call is pending at any time.
//! - Once the connection closes (locally or by the peer) the pending call and
//!   every later call fail; they never hang.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::identity::Identity;
use crate::transport;
use crate::transport::Error;
use crate::transport::Transport;
use crate::transport::read_frame;
use crate::transport::write_frame;

type ReplySender = oneshot::Sender<transport::Result<Vec<u8>>>;

/// Where the pump delivers the next reply.
#[derive(Default)]
struct Slot {
    waiting: Option<ReplySender>,
    /// Set once the connection is gone; later calls fail with it.
    failed: Option<Error>,
}

impl Slot {
    fn fail(&mut self, error: Error) {
        if self.failed.is_none() {
            self.failed = Some(error.clone());
        }
        if let Some(tx) = self.waiting.take() {
            let _ = tx.send(Err(error));
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> std::sync::MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Connection {
    identity: Identity,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    turn: tokio::sync::Mutex<()>,
    slot: Arc<Mutex<Slot>>,
    closed: AtomicBool,
    pump: JoinHandle<()>,
}

impl Connection {
    /// Connects and announces `identity` as the first frame.
    pub async fn connect(addr: impl ToSocketAddrs, identity: Identity) -> transport::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        write_frame(&mut writer, identity.as_bytes()).await?;

        let slot = Arc::new(Mutex::new(Slot::default()));
        let pump = tokio::spawn(Self::pump(reader, slot.clone(), identity.clone()));

        Ok(Self {
            identity,
            writer: tokio::sync::Mutex::new(writer),
            turn: tokio::sync::Mutex::new(()),
            slot,
            closed: AtomicBool::new(false),
            pump,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn pump(mut reader: OwnedReadHalf, slot: Arc<Mutex<Slot>>, identity: Identity) {
        let error = loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    let waiting = lock(&slot).waiting.take();
                    match waiting {
                        Some(tx) => { let _ = tx.send(Ok(frame)); }
                        None => tracing::warn!(%identity, "dropping unsolicited reply frame"),
                    }
                }
                Ok(None) => break Error::ConnectionLost("peer closed the connection".into()),
                Err(e) => break e,
            }
        };
        tracing::debug!(%identity, %error, "connection pump stopped");
        lock(&slot).fail(error);
    }
}

#[async_trait::async_trait]
impl Transport for Connection {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let _turn = self.turn.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ChannelClosed);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut slot = lock(&self.slot);
            if let Some(error) = slot.failed.clone() {
                return Err(error);
            }
            slot.waiting = Some(tx);
        }

        let written = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, payload).await
        };
        if let Err(e) = written {
            lock(&self.slot).waiting = None;
            return Err(e);
        }

        rx.await.unwrap_or(Err(Error::ChannelClosed))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pump.abort();
        lock(&self.slot).fail(Error::ChannelClosed);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
