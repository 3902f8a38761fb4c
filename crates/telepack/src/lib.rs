//! # Telepack
//!
//! A small, self-describing binary codec for dynamic values.
//!
//! ## Philosophy
//!
//! - **Self-Describing**: Every value carries its own tag, so a payload decodes without a schema.
//! - **TLV Architecture**: `[Tag][Length?][Value]` structure enables safe skipping of unknown fields.
//! - **Bounded**: Encoders track scopes explicitly. Decoders are zero-copy, bounds-checked views
//!   with a hard nesting limit.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! Maps are containers whose body alternates `String` keys and values.
//! Lists and tuples share a layout but keep distinct tags, so the
//! ordered-sequence versus fixed-array distinction survives a round trip.
//!
//! All integers are Little-Endian.

mod value;

#[cfg(test)]
mod tests;

pub use value::Value;

/// Maximum container nesting accepted by the decoder and the value encoder.
pub const MAX_DEPTH: usize = 64;

/// Telepack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid Telepack `Tag`.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Closing a scope that does not match the active scope stack.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the Root remains.
    ScopeUnderflow,
    /// Attempted to finalize the buffer with open scopes.
    ScopeStillOpen,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Structural Violation: a map key must be a string.
    InvalidMapKey,
    /// Structural Violation: a map was closed with a key but no value.
    DanglingKey,
    /// Nesting exceeded `MAX_DEPTH`.
    DepthLimitExceeded,
    /// Bytes remained after the top-level value.
    TrailingBytes(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "Invalid Tag byte: {:#04x}", b),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "Scope Mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::DepthLimitExceeded => write!(f, "Nesting deeper than {} levels", MAX_DEPTH),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Telepack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    Int = 0x0A,
    Float = 0x0C,
    Null = 0x0E,

    // Blobs (Tag + u32 Len + Bytes)
    String = 0x10,
    Bytes = 0x11,

    // Containers (Tag + u32 Len + Body)
    List = 0x20,
    Map = 0x21,
    Tuple = 0x22,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::BoolTrue),
            0x02 => Some(Tag::BoolFalse),
            0x0A => Some(Tag::Int),
            0x0C => Some(Tag::Float),
            0x0E => Some(Tag::Null),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x22 => Some(Tag::Tuple),
            _ => None,
        }
    }
}

/// Internal state tracking for the `Encoder` stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The virtual root; allows any item.
    Root,
    /// Ordered sequence; allows any number of items.
    List,
    /// Fixed array; allows any number of items.
    Tuple,
    /// Alternating string keys and values.
    Map,
}

/// An active container scope on the `Encoder` stack.
struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// A bounded, state-machine driven encoder.
///
/// The Encoder maintains a stack of open scopes and back-patches the length
/// header of each container when it is closed.
///
/// # Structural Invariants
///
/// 1.  **Map Scopes**: Items at even positions are keys and must be strings.
///     A map cannot be closed while a key is waiting for its value.
/// 2.  **Root Scope**: The encoder must end in the Root scope to finalize bytes.
pub struct Encoder {
    buf: Vec<u8>,
    /// Never empty; bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Consumes the encoder and returns the final byte vector.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if the stack depth > 1.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn current_frame(&mut self) -> Option<&mut Frame> {
        self.stack.last_mut()
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let Some(frame) = self.current_frame() else { return Ok(()) };
        let expects_key = frame.scope == Scope::Map && frame.count % 2 == 0;
        if expects_key && tag != Tag::String {
            return Err(Error::InvalidMapKey);
        }
        Ok(())
    }

    fn on_item_written(&mut self) {
        if let Some(frame) = self.current_frame() {
            frame.count += 1;
        }
    }

    fn write_tag(&mut self, tag: Tag) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        Ok(())
    }

    fn write_blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.write_tag(tag)?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.on_item_written();
        Ok(())
    }

    fn begin_scope(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        if self.stack.len() > MAX_DEPTH {
            return Err(Error::DepthLimitExceeded);
        }
        self.write_tag(tag)?;
        self.buf.extend_from_slice(&[0, 0, 0, 0]); // Length placeholder
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end_scope(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }
        let Some(frame) = self.stack.pop() else { return Err(Error::ScopeUnderflow) };
        if frame.scope != expected {
            let actual = frame.scope;
            self.stack.push(frame);
            return Err(Error::ScopeMismatch { expected, actual });
        }
        if frame.scope == Scope::Map && frame.count % 2 == 1 {
            self.stack.push(frame);
            return Err(Error::DanglingKey);
        }

        let body_len = self.buf.len() - frame.start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[frame.start - 4..frame.start].copy_from_slice(&len.to_le_bytes());

        self.on_item_written();
        Ok(())
    }

    /// Encodes the null value.
    pub fn null(&mut self) -> Result<()> { self.write_tag(Tag::Null)?; self.on_item_written(); Ok(()) }

    /// Encodes a boolean value.
    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.write_tag(if v { Tag::BoolTrue } else { Tag::BoolFalse })?;
        self.on_item_written();
        Ok(())
    }

    /// Encodes a signed 64-bit integer (LE).
    pub fn int(&mut self, v: i64) -> Result<()> { self.write_tag(Tag::Int)?; self.buf.extend_from_slice(&v.to_le_bytes()); self.on_item_written(); Ok(()) }
    /// Encodes a 64-bit float (LE).
    pub fn float(&mut self, v: f64) -> Result<()> { self.write_tag(Tag::Float)?; self.buf.extend_from_slice(&v.to_le_bytes()); self.on_item_written(); Ok(()) }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> { self.write_blob(Tag::String, v.as_bytes()) }
    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.write_blob(Tag::Bytes, v) }

    /// Begins a List container. Must be closed via `list_end()`.
    pub fn list_begin(&mut self) -> Result<()> { self.begin_scope(Tag::List, Scope::List) }
    /// Ends a List container.
    pub fn list_end(&mut self) -> Result<()> { self.end_scope(Scope::List) }

    /// Begins a Tuple container. Must be closed via `tuple_end()`.
    pub fn tuple_begin(&mut self) -> Result<()> { self.begin_scope(Tag::Tuple, Scope::Tuple) }
    /// Ends a Tuple container.
    pub fn tuple_end(&mut self) -> Result<()> { self.end_scope(Scope::Tuple) }

    /// Begins a Map container.
    ///
    /// # Invariants
    /// - Must be closed via `map_end()`.
    /// - **Strict:** Direct children alternate `str()` keys and arbitrary values.
    pub fn map_begin(&mut self) -> Result<()> { self.begin_scope(Tag::Map, Scope::Map) }
    /// Ends a Map container.
    pub fn map_end(&mut self) -> Result<()> { self.end_scope(Scope::Map) }

    /// Encodes a whole `Value` tree.
    pub fn value(&mut self, v: &Value) -> Result<()> {
        match v {
            Value::Null => self.null(),
            Value::Bool(b) => self.bool(*b),
            Value::Int(i) => self.int(*i),
            Value::Float(x) => self.float(*x),
            Value::Str(s) => self.str(s),
            Value::Bytes(b) => self.bytes(b),
            Value::List(items) => {
                self.list_begin()?;
                for item in items { self.value(item)?; }
                self.list_end()
            }
            Value::Tuple(items) => {
                self.tuple_begin()?;
                for item in items { self.value(item)?; }
                self.tuple_end()
            }
            Value::Map(entries) => {
                self.map_begin()?;
                for (key, item) in entries {
                    self.str(key)?;
                    self.value(item)?;
                }
                self.map_end()
            }
        }
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Container reads return new `Decoder` instances restricted to the container's body.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    depth: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, depth: 0 }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Returns true once every byte of the view has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let Some(&b) = self.buf.first() else { return Err(Error::UnexpectedEnd) };
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() { return Err(Error::UnexpectedEnd); }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_tag(&mut self) -> Result<Tag> {
        let tag = self.peek_tag()?;
        self.read_bytes(1)?;
        Ok(tag)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?) as usize)
    }

    fn read_body(&mut self) -> Result<Decoder<'a>> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::DepthLimitExceeded);
        }
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        Ok(Decoder { buf: bytes, depth: self.depth + 1 })
    }

    fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Reads the next item as a `Value`, descending into containers.
    pub fn value(&mut self) -> Result<Value> {
        match self.read_tag()? {
            Tag::Null => Ok(Value::Null),
            Tag::BoolTrue => Ok(Value::Bool(true)),
            Tag::BoolFalse => Ok(Value::Bool(false)),
            Tag::Int => Ok(Value::Int(i64::from_le_bytes(self.read_array()?))),
            Tag::Float => Ok(Value::Float(f64::from_le_bytes(self.read_array()?))),
            Tag::String => Ok(Value::Str(self.read_str()?.to_owned())),
            Tag::Bytes => {
                let len = self.read_len()?;
                Ok(Value::Bytes(self.read_bytes(len)?.to_vec()))
            }
            Tag::List => Ok(Value::List(self.read_body()?.items()?)),
            Tag::Tuple => Ok(Value::Tuple(self.read_body()?.items()?)),
            Tag::Map => {
                let mut body = self.read_body()?;
                let mut entries = Vec::new();
                while !body.is_empty() {
                    if body.read_tag()? != Tag::String {
                        return Err(Error::InvalidMapKey);
                    }
                    let key = body.read_str()?.to_owned();
                    if body.is_empty() {
                        return Err(Error::DanglingKey);
                    }
                    entries.push((key, body.value()?));
                }
                Ok(Value::Map(entries))
            }
        }
    }

    fn items(mut self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        while !self.is_empty() {
            items.push(self.value()?);
        }
        Ok(items)
    }
}

/// Encodes a value into a fresh buffer.
pub fn to_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.value(value)?;
    enc.into_bytes()
}

/// Decodes exactly one value; trailing bytes are rejected.
pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
    let mut dec = Decoder::new(bytes);
    let value = dec.value()?;
    if !dec.is_empty() {
        return Err(Error::TrailingBytes(dec.remaining()));
    }
    Ok(value)
}

/// A pluggable byte format for `Value`s.
///
/// Implementations must round-trip every `Value`, keeping `List` and `Tuple` apart.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// The default codec: the Telepack TLV format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackCodec;

impl Codec for PackCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        to_bytes(value)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        from_bytes(bytes)
    }
}
