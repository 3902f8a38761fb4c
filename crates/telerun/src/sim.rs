//! # Simulated Backend
//!
//! An in-memory instrument bus used by the server's `@sim` backend and by the
//! test suites. It mimics message-based instruments: commands are written,
//! responses queue up and are read back.
//!
//! ## Resource Patterns
//!
//! `list_resources` filters names with resource patterns: `?` matches any one
//! character, `*` repeats the preceding atom zero or more times (so `?*` matches
//! any run), everything else is literal. Matching ignores case.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use telepack::Value;
use telerpc::Kwargs;

use crate::capability::Shape;
use crate::target::AccessMode;
use crate::target::Backend;
use crate::target::Member;
use crate::target::OpenOptions;
use crate::target::Resource;
use crate::target::Result;
use crate::target::TargetError;

/// Name the simulated backend advertises.
pub const SIM_BACKEND: &str = "@sim";

const DEFAULT_RESOURCES: [&str; 5] = [
    "ASRL1::INSTR",
    "GPIB0::8::INSTR",
    "TCPIP0::localhost::inst0::INSTR",
    "USB0::0x1111::0x2222::0x4444::INSTR",
    "TCPIP0::localhost::5025::SOCKET",
];

const DEFAULT_TIMEOUT_MS: i64 = 2000;

/// Longest resource pattern `list_resources` accepts, in bytes.
pub const MAX_QUERY_LEN: usize = 1024;

const METHODS: [&str; 6] = ["write", "read", "query", "write_raw", "read_raw", "clear"];

const ERR_TMO: &str = "VI_ERROR_TMO (-1073807339): Timeout expired before operation completed.";
const ERR_RSRC_NFOUND: &str =
    "VI_ERROR_RSRC_NFOUND (-1073807343): Insufficient location information or the requested device or resource is not present in the system.";
const ERR_RSRC_LOCKED: &str =
    "VI_ERROR_RSRC_LOCKED (-1073807345): Specified type of lock cannot be obtained, or specified operation cannot be performed, because the resource is locked.";
const ERR_INV_OBJECT: &str =
    "VI_ERROR_INV_OBJECT (-1073807346): Invalid session handle. The resource might be closed.";

/// The capability descriptor matching `SimResource`.
pub fn message_resource_shape() -> Shape {
    Shape::new("MessageBasedResource")
        .property("timeout")
        .property("read_termination")
        .property("write_termination")
        .property("query_delay")
        .method("write")
        .method("read")
        .method("query")
        .method("write_raw")
        .method("read_raw")
        .method("clear")
}

/// Looks up a built-in backend by name.
pub fn backend_by_name(name: &str) -> Option<Arc<dyn Backend>> {
    match name {
        SIM_BACKEND => Some(Arc::new(SimBackend::new())),
        _ => None,
    }
}

type LockTable = Arc<Mutex<HashSet<String>>>;

fn locked(table: &LockTable) -> std::sync::MutexGuard<'_, HashSet<String>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An exclusive lock on one resource name, released on drop.
struct ExclusiveLock {
    table: LockTable,
    name: String,
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        locked(&self.table).remove(&self.name);
    }
}

pub struct SimBackend {
    resources: Vec<String>,
    locks: LockTable,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self::with_resources(DEFAULT_RESOURCES)
    }

    pub fn with_resources<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
            locks: Arc::default(),
        }
    }
}

impl Backend for SimBackend {
    fn name(&self) -> &str {
        SIM_BACKEND
    }

    fn list_resources(&self, query: &str) -> Result<Vec<String>> {
        if query.len() > MAX_QUERY_LEN {
            return Err(TargetError::value(format!(
                "resource pattern of {} bytes exceeds the {} byte limit",
                query.len(),
                MAX_QUERY_LEN
            )));
        }
        let pattern = Pattern::compile(query);
        Ok(self.resources.iter().filter(|r| pattern.matches(r)).cloned().collect())
    }

    fn open_resource(&self, resource_name: &str, options: &OpenOptions) -> Result<Box<dyn Resource>> {
        let Some(canonical) = self.resources.iter().find(|r| r.eq_ignore_ascii_case(resource_name)) else {
            return Err(TargetError::io(ERR_RSRC_NFOUND));
        };
        match options.resource_class.as_deref() {
            None | Some("Resource") | Some("MessageBasedResource") => {}
            Some(other) => {
                return Err(TargetError::value(format!("{} is not a valid resource class for {}", other, canonical)));
            }
        }

        let mut table = locked(&self.locks);
        if table.contains(canonical) {
            return Err(TargetError::io(ERR_RSRC_LOCKED));
        }
        let lock = match options.access_mode {
            AccessMode::ExclusiveLock => {
                table.insert(canonical.clone());
                Some(ExclusiveLock { table: self.locks.clone(), name: canonical.clone() })
            }
            AccessMode::NoLock | AccessMode::SharedLock => None,
        };
        drop(table);

        Ok(Box::new(SimResource::new(canonical, lock)))
    }
}

/// A simulated message-based instrument.
pub struct SimResource {
    name: String,
    timeout: Option<i64>,
    read_termination: String,
    write_termination: String,
    query_delay: f64,
    output: VecDeque<String>,
    extra: Vec<(String, Value)>,
    open: bool,
    lock: Option<ExclusiveLock>,
}

impl SimResource {
    fn new(name: &str, lock: Option<ExclusiveLock>) -> Self {
        Self {
            name: name.to_owned(),
            timeout: Some(DEFAULT_TIMEOUT_MS),
            read_termination: "\n".into(),
            write_termination: "\r\n".into(),
            query_delay: 0.0,
            output: VecDeque::new(),
            extra: Vec::new(),
            open: true,
            lock,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open { Ok(()) } else { Err(TargetError::io(ERR_INV_OBJECT)) }
    }

    fn no_attribute(name: &str) -> TargetError {
        TargetError::attribute(format!("'MessageBasedResource' object has no attribute '{}'", name))
    }

    /// Feeds one command to the instrument, queueing any response.
    fn execute(&mut self, raw: &str) {
        let command = raw.trim_end_matches(['\r', '\n']).trim();
        match command.to_ascii_uppercase().as_str() {
            "*IDN?" => self.output.push_back(format!("TELEPATH,SIM-1000,{},1.0", self.name)),
            "*OPC?" => self.output.push_back("1".into()),
            "*TST?" => self.output.push_back("0".into()),
            "*RST" | "*CLS" => self.output.clear(),
            other if other.ends_with('?') => self.output.push_back("ERROR".into()),
            _ => {}
        }
    }

    fn write(&mut self, message: &str) -> i64 {
        self.execute(message);
        (message.len() + self.write_termination.len()) as i64
    }

    fn read(&mut self) -> Result<String> {
        self.output.pop_front().ok_or_else(|| TargetError::io(ERR_TMO))
    }

    fn delay(seconds: f64) -> Result<Duration> {
        Duration::try_from_secs_f64(seconds).map_err(|_| TargetError::value(format!("invalid delay {}", seconds)))
    }
}

fn arg<'a>(args: &'a [Value], kwargs: &'a Kwargs, index: usize, name: &str) -> Option<&'a Value> {
    args.get(index).or_else(|| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v))
}

fn str_arg<'a>(args: &'a [Value], kwargs: &'a Kwargs, index: usize, name: &str, method: &str) -> Result<&'a str> {
    match arg(args, kwargs, index, name) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(TargetError::type_error(format!("{}() argument '{}' must be str, not {}", method, name, other.type_name()))),
        None => Err(TargetError::type_error(format!("{}() missing required argument: '{}'", method, name))),
    }
}

impl Resource for SimResource {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn get(&mut self, name: &str) -> Result<Member> {
        self.ensure_open()?;
        let value = match name {
            "timeout" => self.timeout.into(),
            "read_termination" => Value::Str(self.read_termination.clone()),
            "write_termination" => Value::Str(self.write_termination.clone()),
            "query_delay" => Value::Float(self.query_delay),
            "resource_name" => Value::Str(self.name.clone()),
            m if METHODS.contains(&m) => return Ok(Member::Method),
            other => self
                .extra
                .iter()
                .find(|(k, _)| k == other)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Self::no_attribute(other))?,
        };
        Ok(Member::Value(value))
    }

    fn invoke(&mut self, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        self.ensure_open()?;
        match name {
            "write" => {
                let message = str_arg(args, kwargs, 0, "message", name)?;
                Ok(Value::Int(self.write(message)))
            }
            "read" => Ok(Value::Str(self.read()?)),
            "query" => {
                let message = str_arg(args, kwargs, 0, "message", name)?.to_owned();
                let delay = match arg(args, kwargs, 1, "delay") {
                    None | Some(Value::Null) => self.query_delay,
                    Some(v) => v.as_float().ok_or_else(|| TargetError::type_error("query() delay must be a number"))?,
                };
                let delay = Self::delay(delay)?;
                self.write(&message);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                Ok(Value::Str(self.read()?))
            }
            "write_raw" => match arg(args, kwargs, 0, "message") {
                Some(Value::Bytes(bytes)) => {
                    self.execute(&String::from_utf8_lossy(bytes));
                    Ok(Value::Int(bytes.len() as i64))
                }
                _ => Err(TargetError::type_error("write_raw() argument 'message' must be bytes")),
            },
            "read_raw" => {
                let mut line = self.read()?;
                line.push_str(&self.read_termination);
                Ok(Value::Bytes(line.into_bytes()))
            }
            "clear" => {
                self.output.clear();
                Ok(Value::Null)
            }
            other => match self.get(other)? {
                Member::Value(v) => Err(TargetError::type_error(format!("'{}' object is not callable", v.type_name()))),
                Member::Method => Err(Self::no_attribute(other)),
            },
        }
    }

    fn set(&mut self, name: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        match name {
            "timeout" => {
                self.timeout = match value {
                    Value::Null => None,
                    Value::Int(ms) if ms >= 0 => Some(ms),
                    Value::Float(ms) if ms >= 0.0 && ms.is_finite() => Some(ms.round() as i64),
                    other => return Err(TargetError::value(format!("invalid timeout {}", other))),
                };
            }
            "read_termination" | "write_termination" => {
                let Value::Str(term) = value else {
                    return Err(TargetError::type_error(format!("{} must be a str", name)));
                };
                if name == "read_termination" {
                    self.read_termination = term;
                } else {
                    self.write_termination = term;
                }
            }
            "query_delay" => {
                let seconds = value.as_float().ok_or_else(|| TargetError::type_error("query_delay must be a number"))?;
                Self::delay(seconds)?;
                self.query_delay = seconds;
            }
            "resource_name" => return Err(TargetError::attribute("can't set attribute 'resource_name'")),
            m if METHODS.contains(&m) => {
                return Err(TargetError::attribute(format!("'{}' is a method and cannot be assigned", m)));
            }
            other => match self.extra.iter_mut().find(|(k, _)| k == other) {
                Some((_, slot)) => *slot = value,
                None => self.extra.push((other.to_owned(), value)),
            },
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.open = false;
        self.output.clear();
        drop(self.lock.take());
        Ok(())
    }
}

// ============================================================================
//  RESOURCE PATTERNS
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Atom {
    Any,
    Lit(char),
}

impl Atom {
    fn accepts(self, c: char) -> bool {
        match self {
            Atom::Any => true,
            Atom::Lit(l) => l == c,
        }
    }
}

/// A compiled resource pattern. Each atom carries whether it may repeat.
pub struct Pattern {
    atoms: Vec<(Atom, bool)>,
}

impl Pattern {
    pub fn compile(pattern: &str) -> Self {
        let mut atoms: Vec<(Atom, bool)> = Vec::new();
        for c in pattern.chars() {
            match c {
                '*' => match atoms.last_mut() {
                    Some((_, repeat)) => *repeat = true,
                    None => atoms.push((Atom::Any, true)),
                },
                '?' => atoms.push((Atom::Any, false)),
                other => atoms.push((Atom::Lit(other.to_ascii_lowercase()), false)),
            }
        }
        Self { atoms }
    }

    /// Runs the pattern as a state set over the text, one character at a time.
    ///
    /// State `i` means the first `i` atoms are satisfied. Work is bounded by
    /// atoms times characters and uses no recursion.
    pub fn matches(&self, text: &str) -> bool {
        let n = self.atoms.len();
        let mut current = vec![false; n + 1];
        current[0] = true;
        self.skip_repeats(&mut current);

        for c in text.chars().map(|c| c.to_ascii_lowercase()) {
            let mut next = vec![false; n + 1];
            for (i, &(atom, repeat)) in self.atoms.iter().enumerate() {
                if current[i] && atom.accepts(c) {
                    next[if repeat { i } else { i + 1 }] = true;
                }
            }
            self.skip_repeats(&mut next);
            if !next.contains(&true) {
                return false;
            }
            current = next;
        }
        current[n]
    }

    /// A repeating atom may match nothing, so reaching it also reaches the next one.
    fn skip_repeats(&self, states: &mut [bool]) {
        for (i, &(_, repeat)) in self.atoms.iter().enumerate() {
            if repeat && states[i] {
                states[i + 1] = true;
            }
        }
    }
}
