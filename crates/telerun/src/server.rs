//! # Proxy Server and Event Loop
//!
//! One cooperative loop owns both channels. Each iteration waits at most one
//! poll interval for activity, takes at most one message per channel, and
//! re-checks the stop flag.
//!
//! ## Invariants
//! - The loop never waits on a target. Handshakes are answered inline; RPC
//!   requests run as spawned jobs whose replies the loop sends when they finish.
//! - Requests from one identity run one at a time, in arrival order. Different
//!   identities run concurrently.
//! - At most `max_pending` requests wait behind one identity's running request.
//!   A refused request is answered at once, ahead of the queued replies.
//! - `close` releases every handle and both channels exactly once; dropping the
//!   server does the same.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use telepack::Codec;
use telepack::PackCodec;
use telerpc::EncodedException;
use telerpc::HandshakeReply;
use telerpc::Reply;
use telerpc::VERSION;
use tokio::task::JoinSet;

use crate::config::ConfigError;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::handshake::HandshakeService;
use crate::identity::Identity;
use crate::registry::SessionRegistry;
use crate::router::Inbound;
use crate::router::Router;
use crate::target::Backend;
use crate::transport;
use crate::worker::WorkerPool;

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Transport(transport::Error),
    Protocol(telerpc::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Config error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<telerpc::Error> for Error {
    fn from(e: telerpc::Error) -> Self {
        Self::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Cooperative stop flag shared with whoever runs the loop.
#[derive(Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Loop-owned bookkeeping of running and waiting RPC jobs.
struct Jobs {
    running: JoinSet<(Identity, Vec<u8>)>,
    owners: HashMap<tokio::task::Id, Identity>,
    /// Identities with a running job, and their requests waiting behind it.
    waiting: HashMap<Identity, VecDeque<Vec<u8>>>,
}

impl Jobs {
    fn new() -> Self {
        Self { running: JoinSet::new(), owners: HashMap::new(), waiting: HashMap::new() }
    }
}

pub struct ProxyServer {
    config: ServerConfig,
    handshake: HandshakeService,
    rpc: Router,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SessionRegistry>,
    pool: WorkerPool,
    stop: StopHandle,
    closed: AtomicBool,
}

impl ProxyServer {
    /// Binds both channels with the default codec.
    pub async fn bind(config: ServerConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        Self::bind_with_codec(config, backend, Arc::new(PackCodec)).await
    }

    pub async fn bind_with_codec(config: ServerConfig, backend: Arc<dyn Backend>, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;

        let rpc = Router::bind("rpc", (config.host.as_str(), config.rpc_port.unwrap_or(0))).await?;
        let reply = HandshakeReply {
            rpc_port: rpc.local_addr().port(),
            backend: config.advertise_backend.then(|| backend.name().to_owned()),
            version: VERSION.to_owned(),
        };
        let handshake = HandshakeService::bind(&config.host, config.handshake_port, reply, codec.as_ref()).await?;

        let registry = Arc::new(SessionRegistry::new(backend));
        let pool = WorkerPool::new(config.workers);
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), pool.clone()).with_codec(codec));

        tracing::info!(
            handshake = %handshake.local_addr(),
            rpc = %rpc.local_addr(),
            backend = registry.backend().name(),
            version = VERSION,
            "proxy server bound"
        );

        Ok(Self {
            config,
            handshake,
            rpc,
            dispatcher,
            registry,
            pool,
            stop: StopHandle::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handshake_addr(&self) -> SocketAddr {
        self.handshake.local_addr()
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    pub fn handshake_reply(&self) -> &HandshakeReply {
        self.handshake.reply()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Asks the loop to exit at its next iteration.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Runs the event loop until stopped, then releases every session.
    pub async fn run(&self) {
        let mut jobs = Jobs::new();
        tracing::info!(poll_interval = ?self.config.poll_interval, "event loop started");

        while !self.stop.is_stopped() {
            tokio::select! {
                Some(inbound) = self.handshake.recv() => {
                    self.handshake.respond(inbound);
                    if let Some(inbound) = self.rpc.try_recv() {
                        self.submit(&mut jobs, inbound);
                    }
                }
                Some(inbound) = self.rpc.recv() => {
                    self.submit(&mut jobs, inbound);
                    if let Some(inbound) = self.handshake.try_recv() {
                        self.handshake.respond(inbound);
                    }
                }
                Some(joined) = jobs.running.join_next_with_id(), if !jobs.running.is_empty() => {
                    self.complete(&mut jobs, joined);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!(in_flight = jobs.running.len(), "event loop stopping");
        jobs.running.shutdown().await;
        self.registry.close_all();
    }

    fn submit(&self, jobs: &mut Jobs, inbound: Inbound) {
        let Inbound { identity, payload } = inbound;
        if let Some(queue) = jobs.waiting.get_mut(&identity) {
            if queue.len() >= self.config.max_pending {
                tracing::warn!(%identity, queued = queue.len(), "request refused, too many pending");
                let exc = EncodedException::protocol(format!(
                    "more than {} requests pending for this session",
                    self.config.max_pending
                ))
                .with_frame("server", "event loop");
                self.send_reply(&identity, self.encode_exception(exc));
                return;
            }
            queue.push_back(payload);
            return;
        }
        jobs.waiting.insert(identity.clone(), VecDeque::new());
        self.spawn_job(jobs, identity, payload);
    }

    fn spawn_job(&self, jobs: &mut Jobs, identity: Identity, payload: Vec<u8>) {
        let dispatcher = self.dispatcher.clone();
        let owner = identity.clone();
        let handle = jobs.running.spawn(async move {
            let reply = dispatcher.handle(&identity, &payload).await;
            (identity, reply)
        });
        jobs.owners.insert(handle.id(), owner);
    }

    fn complete(&self, jobs: &mut Jobs, joined: std::result::Result<(tokio::task::Id, (Identity, Vec<u8>)), tokio::task::JoinError>) {
        let (identity, reply) = match joined {
            Ok((id, done)) => {
                jobs.owners.remove(&id);
                done
            }
            Err(e) => {
                let Some(identity) = jobs.owners.remove(&e.id()) else { return };
                tracing::error!(%identity, error = %e, "rpc job failed");
                let exc = EncodedException::internal(format!("request aborted: {}", e)).with_frame("server", "event loop");
                (identity, self.encode_exception(exc))
            }
        };

        self.send_reply(&identity, reply);

        let next = jobs.waiting.get_mut(&identity).and_then(VecDeque::pop_front);
        match next {
            Some(payload) => self.spawn_job(jobs, identity, payload),
            None => {
                jobs.waiting.remove(&identity);
            }
        }
    }

    fn encode_exception(&self, exc: EncodedException) -> Vec<u8> {
        Reply::Exception(exc).encode_with(self.dispatcher.codec().as_ref()).unwrap_or_default()
    }

    fn send_reply(&self, identity: &Identity, reply: Vec<u8>) {
        if let Err(e) = self.rpc.send(identity, reply) {
            tracing::warn!(%identity, error = %e, "reply dropped, client went away");
        }
    }

    /// Stops the loop and releases both channels and every session. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.stop();
        self.handshake.close();
        self.rpc.close();
        self.pool.close();
        self.registry.close_all();
        tracing::info!("proxy server closed");
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.close();
    }
}
