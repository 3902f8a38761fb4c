//! # RPC Dispatcher
//!
//! Turns one request payload from one identity into one reply payload.
//!
//! ## Flow
//!
//! 1. Decode and validate the envelope. Failures become `ProtocolError`
//!    replies (or `NotImplementedError` for unknown actions) and are logged.
//! 2. Route on the action. Anything that touches the backend or a handle runs
//!    on the worker pool, never on the loop.
//! 3. Encode the outcome. Target failures travel back as data with a
//!    traceback frame naming the action.
//!
//! `handle` never fails: every outcome, including an internal one, is a reply.

use std::sync::Arc;

use telepack::Codec;
use telepack::PackCodec;
use telepack::Value;
use telerpc::Action;
use telerpc::EncodedException;
use telerpc::ExceptionKind;
use telerpc::Reply;
use telerpc::Request;
use telerpc::pop_kwarg;

use crate::identity::Identity;
use crate::registry::SessionRegistry;
use crate::registry::lock_handle;
use crate::target::DEFAULT_QUERY;
use crate::target::Member;
use crate::target::OpenOptions;
use crate::target::TargetError;
use crate::worker;
use crate::worker::WorkerPool;

type Outcome = Result<Value, EncodedException>;

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    pool: WorkerPool,
    codec: Arc<dyn Codec>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, pool: WorkerPool) -> Self {
        Self { registry, pool, codec: Arc::new(PackCodec) }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Handles one request and returns the encoded reply.
    pub async fn handle(&self, identity: &Identity, payload: &[u8]) -> Vec<u8> {
        let reply = match self.execute(identity, payload).await {
            Ok(value) => Reply::Value(value),
            Err(exc) => Reply::Exception(exc.with_frame("server", format!("session {}", identity))),
        };
        self.encode_reply(identity, &reply)
    }

    fn encode_reply(&self, identity: &Identity, reply: &Reply) -> Vec<u8> {
        match reply.encode_with(self.codec.as_ref()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(%identity, error = %e, "reply could not be encoded");
                let fallback = Reply::Exception(EncodedException::internal(format!("reply could not be encoded: {}", e)));
                fallback.encode_with(self.codec.as_ref()).unwrap_or_default()
            }
        }
    }

    async fn execute(&self, identity: &Identity, payload: &[u8]) -> Outcome {
        let request = self.decode(identity, payload)?;
        let action = request.action;
        tracing::debug!(%identity, %action, name = ?request.name, "dispatch");

        let outcome = match action {
            Action::ListResources => self.list_resources(request).await,
            Action::OpenResource => self.open_resource(identity, request).await,
            Action::CloseResource => self.close_resource(identity).await,
            Action::GetAttr => self.getattr(identity, request).await,
            Action::SetAttr => self.setattr(identity, request).await,
        };

        outcome.map_err(|exc| {
            match exc.kind {
                ExceptionKind::InvalidSession => tracing::debug!(%identity, %action, "no session"),
                ExceptionKind::Internal => tracing::error!(%identity, %action, error = %exc, "internal failure"),
                _ => tracing::debug!(%identity, %action, error = %exc, "target raised"),
            }
            exc
        })
    }

    fn decode(&self, identity: &Identity, payload: &[u8]) -> Result<Request, EncodedException> {
        let decoded = Request::decode_with(self.codec.as_ref(), payload).and_then(|r| r.validate().map(|_| r));
        decoded.map_err(|e| {
            tracing::error!(%identity, error = %e, "rejected malformed request");
            let exc = match e {
                telerpc::Error::UnsupportedAction(action) => {
                    EncodedException::not_implemented(format!("action '{}' is not supported", action))
                }
                other => EncodedException::protocol(other.to_string()),
            };
            exc.with_frame("dispatch", "decode")
        })
    }

    /// Runs blocking target work on the pool, mapping its failures to exceptions.
    async fn offload<F>(&self, scope: String, job: F) -> Outcome
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        match self.pool.run(job).await {
            Ok(outcome) => outcome.map_err(|exc| exc.with_frame("dispatch", scope)),
            Err(worker::Error::Panicked(msg)) => {
                Err(EncodedException::internal(format!("target panicked: {}", msg)).with_frame("dispatch", scope))
            }
            Err(e) => Err(EncodedException::internal(e.to_string()).with_frame("dispatch", scope)),
        }
    }

    async fn list_resources(&self, mut request: Request) -> Outcome {
        let query = match request.args.first().cloned().or_else(|| pop_kwarg(&mut request.kwargs, "query")) {
            None | Some(Value::Null) => DEFAULT_QUERY.to_owned(),
            Some(Value::Str(q)) => q,
            Some(other) => {
                return Err(EncodedException::from(TargetError::type_error(format!(
                    "query must be a str, not {}",
                    other.type_name()
                ))));
            }
        };
        let backend = self.registry.backend().clone();
        self.offload("list_resources".into(), move || {
            let found = backend.list_resources(&query)?;
            Ok(Value::Tuple(found.into_iter().map(Value::Str).collect()))
        })
        .await
    }

    async fn open_resource(&self, identity: &Identity, mut request: Request) -> Outcome {
        let resource_name = match request.args.first().cloned().or_else(|| pop_kwarg(&mut request.kwargs, "resource_name")) {
            Some(Value::Str(name)) => name,
            Some(other) => {
                return Err(TargetError::type_error(format!("resource_name must be a str, not {}", other.type_name())).into());
            }
            None => return Err(TargetError::type_error("open_resource() missing required argument: 'resource_name'").into()),
        };
        let options = OpenOptions::from_kwargs(request.kwargs)?;
        let registry = self.registry.clone();
        let identity = identity.clone();
        let scope = format!("open_resource '{}'", resource_name);

        self.offload(scope, move || {
            let attributes = options.attributes.clone();
            let handle = registry.create(&identity, &resource_name, &options)?;
            let mut resource = lock_handle(&handle);
            for (name, value) in attributes {
                resource.set(&name, value)?;
            }
            Ok(Value::Str(String::new()))
        })
        .await
    }

    async fn close_resource(&self, identity: &Identity) -> Outcome {
        let registry = self.registry.clone();
        let identity = identity.clone();
        self.offload("close_resource".into(), move || {
            registry.destroy(&identity)?;
            Ok(Value::Str(String::new()))
        })
        .await
    }

    async fn getattr(&self, identity: &Identity, request: Request) -> Outcome {
        let Request { name, args, kwargs, .. } = request;
        let name = name.unwrap_or_default();
        let handle = self.registry.get_or_fail(identity)?;
        self.offload(format!("getattr '{}'", name), move || {
            let mut resource = lock_handle(&handle);
            match resource.get(&name)? {
                Member::Value(value) => Ok(value),
                Member::Method => Ok(resource.invoke(&name, &args, &kwargs)?),
            }
        })
        .await
    }

    async fn setattr(&self, identity: &Identity, request: Request) -> Outcome {
        let Request { name, value, .. } = request;
        let name = name.unwrap_or_default();
        let handle = self.registry.get_or_fail(identity)?;
        self.offload(format!("setattr '{}'", name), move || {
            lock_handle(&handle).set(&name, value)?;
            Ok(Value::Null)
        })
        .await
    }
}
