//! # Remote Resource Manager
//!
//! The entry point a client application holds: one per server, addressed by a
//! `"host:port"` library path. It owns a session-less channel for enumeration
//! and opens every resource on a channel of its own, so each resource gets its
//! own identity and therefore its own server-side session.

use std::sync::Arc;
use std::time::Duration;

use telepack::Value;
use telerpc::HandshakeReply;
use telerpc::Request;
use telerpc::VERSION;
use telerpc::check_for_version_compatibility;

use crate::capability::Shape;
use crate::client::Error;
use crate::client::Result;
use crate::client::RpcClient;
use crate::client::parse_address;
use crate::client::sync_up;
use crate::proxy::ProxyResource;
use crate::target::DEFAULT_QUERY;
use crate::target::OpenOptions;

/// What a manager knows about its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub client_version: String,
    pub server_version: String,
    pub backend: Option<String>,
    pub address: String,
    pub rpc_port: u16,
}

impl std::fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version: {}", self.client_version)?;
        writeln!(f, "Server version: {}", self.server_version)?;
        writeln!(f, "Backend: {}", self.backend.as_deref().unwrap_or("<not advertised>"))?;
        write!(f, "Address: {} (rpc port {})", self.address, self.rpc_port)
    }
}

pub struct RemoteManager {
    host: String,
    port: u16,
    handshake: HandshakeReply,
    control: RpcClient,
}

impl RemoteManager {
    /// Connects to the server named by `library_path` (`"host:port"`).
    pub async fn connect(library_path: &str, timeout: Duration) -> Result<Self> {
        let (host, port) = parse_address(library_path)?;
        let handshake = sync_up((host.as_str(), port), timeout).await?;
        check_for_version_compatibility(&handshake.version)?;
        let control = RpcClient::connect((host.as_str(), handshake.rpc_port)).await?;
        tracing::debug!(%host, port, rpc_port = handshake.rpc_port, "manager connected");
        Ok(Self { host, port, handshake, control })
    }

    pub fn handshake(&self) -> &HandshakeReply {
        &self.handshake
    }

    /// Resource names matching `query`; `None` uses the default pattern.
    pub async fn list_resources(&self, query: Option<&str>) -> Result<Vec<String>> {
        let request = Request::list_resources(query.unwrap_or(DEFAULT_QUERY));
        let value = self.control.request(&request).await?;
        let items = match value {
            Value::Tuple(items) | Value::List(items) => items,
            other => {
                return Err(Error::Rpc(telerpc::Error::ProtocolViolation(format!(
                    "list_resources returned {}",
                    other.type_name()
                ))));
            }
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::Str(name) => Ok(name),
                other => Err(Error::Rpc(telerpc::Error::ProtocolViolation(format!(
                    "resource name is {}",
                    other.type_name()
                )))),
            })
            .collect()
    }

    /// Opens `resource_name` on a fresh channel.
    pub async fn open_resource(&self, resource_name: &str, options: OpenOptions, shape: Arc<Shape>) -> Result<ProxyResource> {
        let client = RpcClient::connect((self.host.as_str(), self.handshake.rpc_port)).await?;
        ProxyResource::attach(client, resource_name, options, shape).await
    }

    pub fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            client_version: VERSION.to_owned(),
            server_version: self.handshake.version.clone(),
            backend: self.handshake.backend.clone(),
            address: format!("{}:{}", self.host, self.port),
            rpc_port: self.handshake.rpc_port,
        }
    }

    pub async fn close(&self) {
        self.control.close().await;
    }
}
