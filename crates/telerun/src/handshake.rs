//! # Handshake Service
//!
//! Discovery for clients that only know the well-known port. Every inbound
//! frame, whatever it carries, is answered with the same `HandshakeReply`:
//! where the RPC channel listens, which backend serves it, and the server's
//! version. The reply is encoded once at bind time and never changes.

use std::net::SocketAddr;

use telepack::Codec;
use telerpc::HandshakeReply;

use crate::config::ConfigError;
use crate::router::Inbound;
use crate::router::Router;
use crate::server;

pub struct HandshakeService {
    router: Router,
    reply: HandshakeReply,
    encoded: Vec<u8>,
}

impl HandshakeService {
    /// Binds the well-known port.
    ///
    /// # Errors
    /// `ConfigError::PortsIdentical` when `port` is the advertised RPC port.
    pub async fn bind(host: &str, port: u16, reply: HandshakeReply, codec: &dyn Codec) -> server::Result<Self> {
        if port != 0 && port == reply.rpc_port {
            return Err(ConfigError::PortsIdentical(port).into());
        }
        let encoded = reply.encode_with(codec)?;
        let router = Router::bind("handshake", (host, port)).await?;
        Ok(Self { router, reply, encoded })
    }

    pub fn reply(&self) -> &HandshakeReply {
        &self.reply
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.router.local_addr()
    }

    pub async fn recv(&self) -> Option<Inbound> {
        self.router.recv().await
    }

    pub fn try_recv(&self) -> Option<Inbound> {
        self.router.try_recv()
    }

    /// Answers one discovery request. The payload is ignored.
    pub fn respond(&self, inbound: Inbound) {
        if let Err(e) = self.router.send(&inbound.identity, self.encoded.clone()) {
            tracing::debug!(identity = %inbound.identity, error = %e, "handshake reply not delivered");
        }
    }

    pub fn close(&self) {
        self.router.close();
    }
}
