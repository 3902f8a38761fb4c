//! # Exception Marshalling
//!
//! A failure is captured where it happens as `(kind, message, frames)`, shipped
//! as data, and rebuilt by the receiver. Each side that handles the exception
//! appends a `TraceFrame`, so the final traceback spans both processes.

use telepack::Value;

use crate::error::Error;
use crate::error::Result;
use crate::message::Fields;
use crate::message::mismatch;

/// The category of a remote failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// The request envelope was malformed or violated the schema.
    Protocol,
    /// No session exists for the calling identity.
    InvalidSession,
    /// The action is not supported.
    NotImplemented,
    /// The server failed while running the action (e.g. a worker panicked).
    Internal,
    /// A failure raised by the remote object itself, named by the object.
    Application(String),
}

impl ExceptionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Protocol => "ProtocolError",
            Self::InvalidSession => "InvalidSessionError",
            Self::NotImplemented => "NotImplementedError",
            Self::Internal => "InternalError",
            Self::Application(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "ProtocolError" => Self::Protocol,
            "InvalidSessionError" => Self::InvalidSession,
            "NotImplementedError" => Self::NotImplemented,
            "InternalError" => Self::Internal,
            other => Self::Application(other.to_owned()),
        }
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a cross-process traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Where the frame was recorded, e.g. `"server"` or `"dispatch:getattr"`.
    pub scope: String,
    pub detail: String,
}

/// A serializable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedException {
    pub kind: ExceptionKind,
    pub message: String,
    pub frames: Vec<TraceFrame>,
}

impl EncodedException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), frames: Vec::new() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Protocol, message)
    }

    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidSession, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::NotImplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Internal, message)
    }

    pub fn application(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Application(kind.into()), message)
    }

    /// Appends a traceback frame.
    pub fn with_frame(mut self, scope: impl Into<String>, detail: impl Into<String>) -> Self {
        self.push_frame(scope, detail);
        self
    }

    pub fn push_frame(&mut self, scope: impl Into<String>, detail: impl Into<String>) {
        self.frames.push(TraceFrame { scope: scope.into(), detail: detail.into() });
    }

    pub fn to_value(&self) -> Value {
        let traceback = self
            .frames
            .iter()
            .map(|f| Value::Tuple(vec![Value::Str(f.scope.clone()), Value::Str(f.detail.clone())]))
            .collect();
        Value::Map(vec![
            ("kind".into(), Value::Str(self.kind.as_str().into())),
            ("message".into(), Value::Str(self.message.clone())),
            ("traceback".into(), Value::List(traceback)),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value)?;
        let kind = ExceptionKind::from_name(fields.str("kind")?);
        let message = fields.str("message")?.to_owned();
        let mut frames = Vec::new();
        match fields.get("traceback") {
            None | Some(Value::Null) => {}
            Some(tb) => {
                let entries = tb.as_seq().ok_or_else(|| mismatch("traceback", "list", tb))?;
                for entry in entries {
                    frames.push(decode_frame(entry)?);
                }
            }
        }
        Ok(Self { kind, message, frames })
    }

    /// The traceback rendered oldest frame first, one per line.
    pub fn render_traceback(&self) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            out.push_str(&format!("  at {}: {}\n", frame.scope, frame.detail));
        }
        out
    }
}

fn decode_frame(entry: &Value) -> Result<TraceFrame> {
    match entry.as_seq() {
        Some([Value::Str(scope), Value::Str(detail)]) => {
            Ok(TraceFrame { scope: scope.clone(), detail: detail.clone() })
        }
        _ => Err(Error::ProtocolViolation(format!("malformed traceback frame: {}", entry))),
    }
}

impl std::fmt::Display for EncodedException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EncodedException {}
