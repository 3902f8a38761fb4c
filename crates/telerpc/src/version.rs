//! # Version Gate
//!
//! A client refuses to talk to a server whose release is newer than its own.
//!
//! Only the numeric release prefix of a version string takes part
//! (`"0.2.0rc1"` -> `[0, 2, 0]`). Releases compare component-wise like tuples,
//! so a shorter release that is a prefix of a longer one sorts first
//! (`0.1 < 0.1.0`).

use std::cmp::Ordering;

/// Version of this protocol implementation.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The peer versions are incompatible, or one of them is unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityError {
    pub client: String,
    pub server: String,
    pub reason: String,
}

impl std::fmt::Display for CompatibilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client version {} is incompatible with server version {}: {}", self.client, self.server, self.reason)
    }
}

impl std::error::Error for CompatibilityError {}

/// Extracts the numeric release components of a version string.
///
/// Returns `None` when the string does not start with a release number.
pub fn parse_release(version: &str) -> Option<Vec<u64>> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let release = trimmed[..end].trim_end_matches('.');
    if release.is_empty() {
        return None;
    }
    release.split('.').map(|part| part.parse().ok()).collect()
}

/// Fails when `server` is a newer release than `client`.
pub fn check_compatibility(client: &str, server: &str) -> Result<(), CompatibilityError> {
    let fail = |reason: &str| CompatibilityError {
        client: client.to_owned(),
        server: server.to_owned(),
        reason: reason.to_owned(),
    };
    let client_release = parse_release(client).ok_or_else(|| fail("unreadable client version"))?;
    let server_release = parse_release(server).ok_or_else(|| fail("unreadable server version"))?;

    match client_release.cmp(&server_release) {
        Ordering::Less => Err(fail("server is newer than client, upgrade the client")),
        Ordering::Equal | Ordering::Greater => Ok(()),
    }
}

/// Checks a server's advertised version against this build's `VERSION`.
pub fn check_for_version_compatibility(server: &str) -> Result<(), CompatibilityError> {
    check_compatibility(VERSION, server)
}
