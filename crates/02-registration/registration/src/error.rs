use std::io;

use thiserror::Error;
use transport::TransportError;

/// Convenience result alias for the registration layer.
pub type RegistrationResult<T, E = RegistrationError> = Result<T, E>;

/// Errors raised while receiving and applying registration samples.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The receiver was never created or has been destroyed.
    #[error("registration receiver is not created")]
    NotCreated,

    #[error("failed to encode registration sample: {0}")]
    Encode(String),

    #[error("failed to decode registration sample: {0}")]
    Decode(String),

    /// Some elements of a polled batch could not be decoded; the others were applied.
    #[error("malformed registration batch: {applied} applied, {rejected} rejected")]
    MalformedBatch { applied: usize, rejected: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl RegistrationError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        RegistrationError::Io {
            context: context.into(),
            source,
        }
    }
}
