//! Names of mapped regions and sync events.
//!
//! Every channel instance gets a random suffix so a recreated channel never
//! collides with a stale region that a crashed process may still map.

use rand::Rng;

use crate::identity::ProcessIdentity;

/// Replaces every character that is not safe in a file name with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builds a fresh instance name for `base_name`.
pub fn random_instance_name(base_name: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("{}_{suffix:016x}", sanitize(base_name))
}

/// Name of the writer-to-reader "new data" event.
pub fn signal_event_name(instance_name: &str, reader: &ProcessIdentity) -> String {
    format!("{instance_name}_{}", reader.event_key())
}

/// Name of the reader-to-writer acknowledge event.
pub fn ack_event_name(instance_name: &str, reader: &ProcessIdentity) -> String {
    format!("{instance_name}_{}_ack", reader.event_key())
}
