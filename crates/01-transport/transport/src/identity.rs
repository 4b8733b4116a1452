//! Process identities used to key channel readers and registration samples.

use std::fmt;
use std::fs;

/// Names an originating process by host and process id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessIdentity {
    pub host_name: String,
    pub process_id: i32,
}

impl ProcessIdentity {
    pub fn new(host_name: impl Into<String>, process_id: i32) -> Self {
        Self {
            host_name: host_name.into(),
            process_id,
        }
    }

    /// Identity of the calling process.
    pub fn current() -> Self {
        Self {
            host_name: current_host_name(),
            process_id: std::process::id() as i32,
        }
    }

    /// Returns true when both identities live on the same host.
    ///
    /// An empty host name never matches, not even another empty host name.
    pub fn same_host(&self, other: &ProcessIdentity) -> bool {
        !self.host_name.is_empty() && self.host_name == other.host_name
    }

    /// Key used when deriving per-reader event names.
    pub fn event_key(&self) -> String {
        format!(
            "{}_{}",
            crate::naming::sanitize(&self.host_name),
            self.process_id
        )
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_name, self.process_id)
    }
}

/// Resolves the host name of this machine.
pub fn current_host_name() -> String {
    const CANDIDATES: [&str; 2] = ["/proc/sys/kernel/hostname", "/etc/hostname"];
    for path in CANDIDATES {
        if let Ok(raw) = fs::read_to_string(path) {
            let name = raw.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
