//! # Remote Targets
//!
//! The seam between the protocol and whatever actually owns the objects.
//! A `Backend` enumerates and opens resources; each opened `Resource` is an
//! opaque, capability-addressed object reached by attribute name.
//!
//! Both traits are synchronous: implementations may block, and the dispatcher
//! runs them on the worker pool.

use std::time::Duration;

use telepack::Value;
use telerpc::EncodedException;
use telerpc::Kwargs;
use telerpc::pop_kwarg;

/// A failure raised by a backend or a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetError {
    /// Exception class name reported to the client, e.g. `"AttributeError"`.
    pub kind: String,
    pub message: String,
}

impl TargetError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new("AttributeError", message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new("VisaIOError", message)
    }
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TargetError {}

impl From<TargetError> for EncodedException {
    fn from(e: TargetError) -> Self {
        EncodedException::application(e.kind, e.message)
    }
}

pub type Result<T> = std::result::Result<T, TargetError>;

/// Pattern used when `list_resources` is called without a query.
pub const DEFAULT_QUERY: &str = "?*::INSTR";

/// What an attribute name resolves to on a live resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Value(Value),
    /// A callable; invoke it through `Resource::invoke`.
    Method,
}

/// A live remote object.
pub trait Resource: Send + 'static {
    fn resource_name(&self) -> &str;

    /// Resolves an attribute on the live object.
    fn get(&mut self, name: &str) -> Result<Member>;

    /// Calls the method `name`.
    fn invoke(&mut self, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value>;

    fn set(&mut self, name: &str, value: Value) -> Result<()>;

    /// Releases the object. Every later operation fails.
    fn close(&mut self) -> Result<()>;
}

/// Enumerates and opens resources. Shared by all sessions.
pub trait Backend: Send + Sync + 'static {
    /// Name advertised by the handshake, e.g. `"@sim"`.
    fn name(&self) -> &str;

    fn list_resources(&self, query: &str) -> Result<Vec<String>>;

    fn open_resource(&self, resource_name: &str, options: &OpenOptions) -> Result<Box<dyn Resource>>;
}

// ============================================================================
//  OPEN OPTIONS
// ============================================================================

/// Locking requested when opening a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    NoLock,
    ExclusiveLock,
    SharedLock,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLock => "no_lock",
            Self::ExclusiveLock => "exclusive_lock",
            Self::SharedLock => "shared_lock",
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::NoLock => 0,
            Self::ExclusiveLock => 1,
            Self::SharedLock => 2,
        }
    }

    /// Accepts the mode name or its numeric code.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mode = match value {
            Value::Null => Some(Self::NoLock),
            Value::Int(0) => Some(Self::NoLock),
            Value::Int(1) => Some(Self::ExclusiveLock),
            Value::Int(2) => Some(Self::SharedLock),
            Value::Str(s) => match s.as_str() {
                "no_lock" => Some(Self::NoLock),
                "exclusive_lock" => Some(Self::ExclusiveLock),
                "shared_lock" => Some(Self::SharedLock),
                _ => None,
            },
            _ => None,
        };
        mode.ok_or_else(|| TargetError::value(format!("invalid access_mode {}", value)))
    }
}

/// Options of an `open_resource` call.
///
/// `attributes` are assigned on the new resource, in order, right after it opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOptions {
    pub access_mode: AccessMode,
    /// Zero means fail immediately if the resource is busy.
    pub open_timeout: Duration,
    pub resource_class: Option<String>,
    pub attributes: Kwargs,
}

impl OpenOptions {
    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn resource_class(mut self, class: impl Into<String>) -> Self {
        self.resource_class = Some(class.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Splits request kwargs into options; whatever is left becomes `attributes`.
    pub fn from_kwargs(mut kwargs: Kwargs) -> Result<Self> {
        let access_mode = match pop_kwarg(&mut kwargs, "access_mode") {
            Some(v) => AccessMode::from_value(&v)?,
            None => AccessMode::NoLock,
        };
        let open_timeout = match pop_kwarg(&mut kwargs, "open_timeout") {
            None | Some(Value::Null) => Duration::ZERO,
            Some(Value::Int(ms)) if ms >= 0 => Duration::from_millis(ms as u64),
            Some(other) => return Err(TargetError::value(format!("invalid open_timeout {}", other))),
        };
        let class = pop_kwarg(&mut kwargs, "resource_class").or_else(|| pop_kwarg(&mut kwargs, "resource_pyclass"));
        let resource_class = match class {
            None | Some(Value::Null) => None,
            Some(Value::Str(s)) => Some(s),
            Some(other) => return Err(TargetError::type_error(format!("resource_class must be a str, got {}", other.type_name()))),
        };
        Ok(Self { access_mode, open_timeout, resource_class, attributes: kwargs })
    }

    /// The kwargs of an `open_resource` request carrying these options.
    pub fn to_kwargs(&self) -> Kwargs {
        let mut kwargs: Kwargs = vec![
            ("access_mode".into(), Value::Int(self.access_mode.code())),
            ("open_timeout".into(), Value::Int(self.open_timeout.as_millis().min(i64::MAX as u128) as i64)),
            ("resource_class".into(), self.resource_class.clone().into()),
        ];
        kwargs.extend(self.attributes.iter().cloned());
        kwargs
    }
}
