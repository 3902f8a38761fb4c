//! # Request and Reply Envelopes
//!
//! ## Invariants
//! - `name` is absent for session-less actions and present for attribute actions.
//!   `Request::validate` enforces this; decoding alone does not.
//! - A `Reply` carries exactly one of `value` or `exception`. The enum makes the
//!   other shapes unrepresentable and the decoder rejects them.

use telepack::Codec;
use telepack::PackCodec;
use telepack::Value;

use crate::error::Error;
use crate::error::Result;
use crate::exception::EncodedException;

/// Keyword arguments, in the order the caller supplied them.
pub type Kwargs = Vec<(String, Value)>;

/// The five operations a client can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ListResources,
    OpenResource,
    CloseResource,
    GetAttr,
    SetAttr,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::ListResources,
        Action::OpenResource,
        Action::CloseResource,
        Action::GetAttr,
        Action::SetAttr,
    ];

    /// The wire name of the action.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Action::ListResources => "list_resources",
            Action::OpenResource => "open_resource",
            Action::CloseResource => "close_resource",
            Action::GetAttr => "getattr",
            Action::SetAttr => "setattr",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_tag() == tag)
            .ok_or_else(|| Error::UnsupportedAction(tag.to_owned()))
    }

    /// Whether the action addresses an attribute of the session's handle.
    pub fn requires_name(&self) -> bool {
        matches!(self, Action::GetAttr | Action::SetAttr)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One client call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub name: Option<String>,
    pub action: Action,
    /// Only meaningful for `setattr`.
    pub value: Value,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Request {
    /// A request with no attribute name, no value and no arguments.
    pub fn new(action: Action) -> Self {
        Self { name: None, action, value: Value::Null, args: Vec::new(), kwargs: Vec::new() }
    }

    pub fn list_resources(query: &str) -> Self {
        Self::new(Action::ListResources).kwarg("query", query)
    }

    pub fn open_resource(resource_name: &str) -> Self {
        Self::new(Action::OpenResource).arg(resource_name)
    }

    pub fn close_resource() -> Self {
        Self::new(Action::CloseResource)
    }

    pub fn getattr(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::new(Action::GetAttr) }
    }

    pub fn setattr(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: Some(name.into()), value: value.into(), ..Self::new(Action::SetAttr) }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.push((key.into(), value.into()));
        self
    }

    /// Checks the name-presence rule for the action.
    pub fn validate(&self) -> Result<()> {
        match (self.action.requires_name(), &self.name) {
            (true, None) => Err(Error::ProtocolViolation(format!("'{}' requires an attribute name", self.action))),
            (true, Some(name)) if name.is_empty() => {
                Err(Error::ProtocolViolation(format!("'{}' requires a non-empty attribute name", self.action)))
            }
            (false, Some(name)) => Err(Error::ProtocolViolation(format!(
                "'{}' takes no attribute name, got '{}'",
                self.action, name
            ))),
            _ => Ok(()),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            ("name".into(), self.name.clone().into()),
            ("action".into(), Value::Str(self.action.as_tag().into())),
            ("value".into(), self.value.clone()),
            ("args".into(), Value::Tuple(self.args.clone())),
            ("kwargs".into(), Value::Map(self.kwargs.clone())),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value)?;
        let action = Action::from_tag(fields.str("action")?)?;
        let name = fields.opt_str("name")?.map(str::to_owned);
        let value = fields.get("value").cloned().unwrap_or(Value::Null);
        let args = match fields.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::List(items) | Value::Tuple(items)) => items.clone(),
            Some(other) => return Err(mismatch("args", "tuple", other)),
        };
        let kwargs = match fields.get("kwargs") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Map(entries)) => entries.clone(),
            Some(other) => return Err(mismatch("kwargs", "map", other)),
        };
        Ok(Self { name, action, value, args, kwargs })
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

/// Removes the first keyword argument named `key` and returns its value.
pub fn pop_kwarg(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(pos).1)
}

/// The answer to one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Value),
    Exception(EncodedException),
}

impl Reply {
    pub fn into_result(self) -> std::result::Result<Value, EncodedException> {
        match self {
            Reply::Value(v) => Ok(v),
            Reply::Exception(e) => Err(e),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Reply::Value(v) => Value::Map(vec![("value".into(), v.clone())]),
            Reply::Exception(e) => Value::Map(vec![("exception".into(), e.to_value())]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(value)?;
        match (fields.get("value"), fields.get("exception")) {
            (Some(v), None) => Ok(Reply::Value(v.clone())),
            (None, Some(e)) => Ok(Reply::Exception(EncodedException::from_value(e)?)),
            (Some(_), Some(_)) => Err(Error::ProtocolViolation("reply carries both value and exception".into())),
            (None, None) => Err(Error::ProtocolViolation("reply carries neither value nor exception".into())),
        }
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

impl From<std::result::Result<Value, EncodedException>> for Reply {
    fn from(r: std::result::Result<Value, EncodedException>) -> Self {
        match r {
            Ok(v) => Reply::Value(v),
            Err(e) => Reply::Exception(e),
        }
    }
}

// ============================================================================
//  ENVELOPE FIELD ACCESS
// ============================================================================

/// Read-only view over the entries of an envelope map.
pub(crate) struct Fields<'a> {
    entries: &'a [(String, Value)],
}

impl<'a> Fields<'a> {
    pub(crate) fn new(value: &'a Value) -> Result<Self> {
        match value {
            Value::Map(entries) => Ok(Self { entries }),
            other => Err(mismatch("envelope", "map", other)),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub(crate) fn required(&self, key: &'static str) -> Result<&'a Value> {
        self.get(key).ok_or(Error::MissingField(key))
    }

    pub(crate) fn str(&self, key: &'static str) -> Result<&'a str> {
        let v = self.required(key)?;
        v.as_str().ok_or_else(|| mismatch(key, "str", v))
    }

    /// A string field that may be absent or null.
    pub(crate) fn opt_str(&self, key: &'static str) -> Result<Option<&'a str>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(key, "str", other)),
        }
    }
}

pub(crate) fn mismatch(field: &'static str, expected: &'static str, found: &Value) -> Error {
    Error::TypeMismatch { field, expected, found: found.type_name() }
}
