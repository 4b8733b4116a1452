//! Error handling helpers for the transport crate.
//!
//! Channel operations report failures through [`TransportError`]; none of them
//! are fatal to the process and callers decide whether to retry, recreate, or
//! surface the error.

use std::io;

use thiserror::Error;

use crate::identity::ProcessIdentity;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

/// Errors surfaced by the shared-memory transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel has not been created or was already destroyed.
    #[error("channel `{0}` is not created")]
    NotCreated(String),

    /// `create` was called on a channel that already owns a region.
    #[error("channel `{0}` is already created")]
    AlreadyCreated(String),

    /// The reader is not connected to the channel.
    #[error("reader {0} is not connected")]
    UnknownReader(ProcessIdentity),

    /// The region lock could not be acquired within the open timeout.
    #[error("timed out acquiring the lock of `{0}`")]
    LockTimeout(String),

    /// The payload does not fit into the mapped region.
    #[error("payload of {requested} bytes exceeds capacity of {capacity} bytes")]
    PayloadTooLarge { requested: usize, capacity: usize },

    /// A mapped region or header did not match the expected layout.
    #[error("invalid layout: {0}")]
    InvalidLayout(&'static str),

    /// An OS level operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        TransportError::Io {
            context: context.into(),
            source,
        }
    }
}
