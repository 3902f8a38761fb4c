//! Client identities: the sole key of a session.

use std::sync::OnceLock;

/// Opaque bytes a client announces when it opens a channel.
///
/// Generated identities have the form `<host>.<128-bit hex token>`, which makes
/// collisions between live clients practically impossible. The host part is
/// only a log label; see `host_label`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Identity(Vec<u8>);

impl Identity {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// A fresh identity for this host.
    pub fn generate() -> Self {
        let token: u128 = rand::random();
        Self(format!("{}.{:032x}", host_label(), token).into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// The node name used in generated identities.
///
/// Taken from `$HOSTNAME`, then `/etc/hostname`, falling back to `localhost`
/// when neither names the host. Read once per process.
pub fn host_label() -> &'static str {
    static LABEL: OnceLock<String> = OnceLock::new();
    LABEL.get_or_init(|| {
        let from_env = std::env::var("HOSTNAME").ok();
        let from_file = std::fs::read_to_string("/etc/hostname").ok();
        pick_host_label(from_env, from_file)
    })
}

pub(crate) fn pick_host_label(from_env: Option<String>, from_file: Option<String>) -> String {
    [from_env, from_file]
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_owned())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}
