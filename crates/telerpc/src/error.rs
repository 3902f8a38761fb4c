//! # Error Definitions
//!
//! Failures of the protocol layer itself: envelopes that cannot be built or read.

use telepack::Error as PackError;

/// Operational failures within the RPC envelope handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying codec failed.
    Serialization(PackError),
    /// An envelope field had the wrong type.
    TypeMismatch { field: &'static str, expected: &'static str, found: &'static str },
    /// An envelope was missing a required field.
    MissingField(&'static str),
    /// The action tag is not one of the five supported actions.
    UnsupportedAction(String),
    /// The envelope decoded but violates the message schema.
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "codec error: {}", e),
            Self::TypeMismatch { field, expected, found } => {
                write!(f, "field '{}' expected {}, found {}", field, expected, found)
            }
            Self::MissingField(field) => write!(f, "missing field '{}'", field),
            Self::UnsupportedAction(action) => write!(f, "unsupported action '{}'", action),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Serialization(e) }
}

/// A specialized Result type for envelope operations.
pub type Result<T> = std::result::Result<T, Error>;
