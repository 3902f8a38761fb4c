//! # TeleRPC
//!
//! The wire vocabulary of the telepath remote-object protocol.
//!
//! ## Architecture
//!
//! Every message is one self-contained envelope: a `telepack::Value` map,
//! encoded by a pluggable `telepack::Codec` and shipped as an opaque payload.
//!
//! - `Request`: `{name, action, value, args, kwargs}` sent by a client.
//! - `Reply`: exactly one of `{value}` or `{exception}`.
//! - `HandshakeReply`: `{rpc_port, backend, version}` from the discovery service.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Tuple Fidelity**: `args` always travels as a tuple; values keep their sequence kind.

mod error;
mod exception;
mod handshake;
mod message;
pub mod version;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use error::Result;
pub use exception::EncodedException;
pub use exception::ExceptionKind;
pub use exception::TraceFrame;
pub use handshake::HandshakeReply;
pub use message::Action;
pub use message::Kwargs;
pub use message::Reply;
pub use message::Request;
pub use message::pop_kwarg;
pub use version::CompatibilityError;
pub use version::VERSION;
pub use version::check_compatibility;
pub use version::check_for_version_compatibility;

pub use telepack::Value;
