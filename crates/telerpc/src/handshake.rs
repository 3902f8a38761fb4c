//! The discovery reply: where the RPC channel lives and what speaks on it.

use telepack::Codec;
use telepack::PackCodec;
use telepack::Value;

use crate::error::Error;
use crate::error::Result;
use crate::message::Fields;
use crate::message::mismatch;

/// Answer of the handshake service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub rpc_port: u16,
    /// Absent when the server does not advertise its backend.
    pub backend: Option<String>,
    pub version: String,
}

impl HandshakeReply {
    pub fn to_value(&self) -> Value {
        let mut entries = vec![("rpc_port".into(), Value::from(self.rpc_port))];
        if let Some(backend) = &self.backend {
            entries.push(("backend".into(), Value::Str(backend.clone())));
        }
        entries.push(("version".into(), Value::Str(self.version.clone())));
        Value::Map(entries)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value)?;
        let port = fields.required("rpc_port")?;
        let raw = port.as_int().ok_or_else(|| mismatch("rpc_port", "int", port))?;
        let rpc_port = u16::try_from(raw)
            .map_err(|_| Error::ProtocolViolation(format!("rpc_port {} out of range", raw)))?;
        let backend = fields.opt_str("backend")?.map(str::to_owned);
        let version = fields.str("version")?.to_owned();
        Ok(Self { rpc_port, backend, version })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_with(&PackCodec)
    }

    pub fn encode_with(&self, codec: &dyn Codec) -> Result<Vec<u8>> {
        Ok(codec.encode(&self.to_value())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_with(&PackCodec, bytes)
    }

    pub fn decode_with(codec: &dyn Codec, bytes: &[u8]) -> Result<Self> {
        Self::from_value(&codec.decode(bytes)?)
    }
}
