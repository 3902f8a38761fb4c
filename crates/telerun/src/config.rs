//! # Server Configuration
//!
//! Plain settings with defaults and chained setters, checked once by
//! `ServerConfig::validate` before anything binds.

use std::time::Duration;

use crate::worker::DEFAULT_WORKERS;

pub const DEFAULT_HANDSHAKE_PORT: u16 = 5000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_PENDING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The handshake port and the pinned RPC port are the same.
    PortsIdentical(u16),
    /// The event loop cannot poll with a zero interval.
    ZeroPollInterval,
    /// The host is empty.
    EmptyHost,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PortsIdentical(port) => write!(f, "handshake port and rpc port must differ, both are {}", port),
            Self::ZeroPollInterval => write!(f, "poll interval must be greater than zero"),
            Self::EmptyHost => write!(f, "host must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings of a `ProxyServer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface both channels bind to.
    pub host: String,
    /// Well-known port of the handshake service.
    pub handshake_port: u16,
    /// Pinned RPC port; `None` lets the OS choose.
    pub rpc_port: Option<u16>,
    /// Longest the event loop waits before re-checking the stop flag.
    pub poll_interval: Duration,
    /// Blocking target calls allowed at once.
    pub workers: usize,
    /// Whether the handshake reply names the backend.
    pub advertise_backend: bool,
    /// Requests one identity may queue behind its running request. Extra
    /// requests are refused with a `ProtocolError` reply.
    pub max_pending: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            handshake_port: DEFAULT_HANDSHAKE_PORT,
            rpc_port: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            workers: DEFAULT_WORKERS,
            advertise_backend: true,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl ServerConfig {
    /// Loopback host with OS-chosen ports for both channels.
    pub fn ephemeral() -> Self {
        Self::default().host("127.0.0.1").handshake_port(0)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn handshake_port(mut self, port: u16) -> Self {
        self.handshake_port = port;
        self
    }

    pub fn rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = Some(port);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn advertise_backend(mut self, advertise: bool) -> Self {
        self.advertise_backend = advertise;
        self
    }

    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        match self.rpc_port {
            Some(rpc) if rpc != 0 && rpc == self.handshake_port => Err(ConfigError::PortsIdentical(rpc)),
            _ => Ok(()),
        }
    }
}
