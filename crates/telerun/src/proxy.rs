//! # Transparent Proxy
//!
//! A client-side stand-in for one remote resource. Reads, writes and calls on
//! the proxy become `getattr`/`setattr` requests on its own channel.
//!
//! ## Attribute Resolution
//!
//! The `Shape` decides what a read means:
//! - **Property**: the value is fetched immediately.
//! - **Method**: a `RemoteMethod` is returned; nothing is sent until it is called.
//! - **Unknown**: fails locally, nothing is sent.
//!
//! `resource_name` and `resource_class` are answered locally and never cross
//! the wire.

use std::sync::Arc;
use std::time::Duration;

use telepack::Value;
use telerpc::Kwargs;
use telerpc::Request;
use telerpc::check_for_version_compatibility;

use crate::capability::MemberKind;
use crate::capability::Shape;
use crate::client::Error;
use crate::client::Result;
use crate::client::RpcClient;
use crate::client::sync_up;
use crate::target::OpenOptions;

const LOCAL_ATTRIBUTES: [&str; 2] = ["resource_name", "resource_class"];

/// The result of reading an attribute through the proxy.
pub enum Attribute<'a> {
    Value(Value),
    Method(RemoteMethod<'a>),
}

impl std::fmt::Debug for Attribute<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Method(m) => f.debug_tuple("Method").field(&m.name).finish(),
        }
    }
}

/// A bound remote method. Calling it sends one `getattr` with the arguments.
pub struct RemoteMethod<'a> {
    proxy: &'a ProxyResource,
    name: String,
}

impl RemoteMethod<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        let mut request = Request::getattr(self.name.as_str());
        request.args = args;
        request.kwargs = kwargs;
        self.proxy.client.request(&request).await
    }
}

pub struct ProxyResource {
    resource_name: String,
    resource_class: Option<String>,
    shape: Arc<Shape>,
    client: RpcClient,
}

impl ProxyResource {
    /// Discovers the server at `host:port`, checks its version, opens a channel
    /// and opens `resource_name` on it.
    pub async fn open(
        host: &str,
        port: u16,
        resource_name: &str,
        options: OpenOptions,
        shape: Arc<Shape>,
        timeout: Duration,
    ) -> Result<Self> {
        let handshake = sync_up((host, port), timeout).await?;
        check_for_version_compatibility(&handshake.version)?;
        let client = RpcClient::connect((host, handshake.rpc_port)).await?;
        Self::attach(client, resource_name, options, shape).await
    }

    /// Opens `resource_name` on an existing channel and wraps it.
    pub async fn attach(client: RpcClient, resource_name: &str, options: OpenOptions, shape: Arc<Shape>) -> Result<Self> {
        let mut request = Request::open_resource(resource_name);
        request.kwargs = options.to_kwargs();
        if let Err(e) = client.request(&request).await {
            client.close().await;
            return Err(e);
        }
        Ok(Self {
            resource_name: resource_name.to_owned(),
            resource_class: options.resource_class,
            shape,
            client,
        })
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    fn local(&self, name: &str) -> Option<Value> {
        match name {
            "resource_name" => Some(Value::Str(self.resource_name.clone())),
            "resource_class" => Some(self.resource_class.clone().into()),
            _ => None,
        }
    }

    fn member(&self, name: &str) -> Result<MemberKind> {
        self.shape.kind(name).ok_or_else(|| {
            Error::Attribute(format!("'{}' object has no attribute '{}'", self.shape.class_name(), name))
        })
    }

    /// Reads an attribute: properties are fetched now, methods come back bound.
    pub async fn getattr(&self, name: &str) -> Result<Attribute<'_>> {
        if let Some(value) = self.local(name) {
            return Ok(Attribute::Value(value));
        }
        match self.member(name)? {
            MemberKind::Method => Ok(Attribute::Method(RemoteMethod { proxy: self, name: name.to_owned() })),
            MemberKind::Property => {
                let value = self.client.request(&Request::getattr(name)).await?;
                Ok(Attribute::Value(value))
            }
        }
    }

    /// Reads a property.
    pub async fn get(&self, name: &str) -> Result<Value> {
        match self.getattr(name).await? {
            Attribute::Value(value) => Ok(value),
            Attribute::Method(_) => Err(Error::Attribute(format!("'{}' is a method, call it instead", name))),
        }
    }

    /// Calls a method.
    pub async fn call(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        match self.getattr(name).await? {
            Attribute::Method(method) => method.call(args, kwargs).await,
            Attribute::Value(v) => Err(Error::Attribute(format!("'{}' object is not callable", v.type_name()))),
        }
    }

    /// Assigns a property on the remote resource.
    pub async fn setattr(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if LOCAL_ATTRIBUTES.contains(&name) {
            return Err(Error::Attribute(format!("'{}' is read-only", name)));
        }
        match self.member(name)? {
            MemberKind::Method => Err(Error::Attribute(format!("cannot assign to method '{}'", name))),
            MemberKind::Property => {
                self.client.request(&Request::setattr(name, value)).await?;
                Ok(())
            }
        }
    }

    /// Closes the remote resource, then the channel. The channel is closed even
    /// when the remote close fails.
    pub async fn close(&self) -> Result<()> {
        let closed = self.client.request(&Request::close_resource()).await;
        self.client.close().await;
        closed.map(|_| ())
    }
}
