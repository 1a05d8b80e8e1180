//! Error types for view synchronisation

use std::time::Duration;

use proven_group_transport::{GroupTransportError, GroupTransportErrorKind};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding wire messages
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer ended before a fixed-width field
    #[error("buffer too small: needed {needed} bytes, {available} available")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Declared header length runs past the end of the buffer
    #[error("declared header length {declared} exceeds the {available} bytes available")]
    HeaderTooLong {
        /// Length found in the prefix
        declared: usize,
        /// Bytes left after the prefix
        available: usize,
    },

    /// Header does not fit the length prefix
    #[error("header of {0} bytes does not fit a u32 length prefix")]
    HeaderOverflow(usize),

    /// Member state payload is shorter than the two view id fields
    #[error("member state too short: {0} bytes")]
    StateTooShort(usize),
}

/// View synchronisation errors
#[derive(Debug, Error)]
pub enum Error {
    /// Terminal error from the group transport
    #[error("Transport error ({kind}): {message}")]
    Transport {
        /// Kind reported by the transport
        kind: GroupTransportErrorKind,
        /// Rendered transport error
        message: String,
    },

    /// A transient transport error persisted through every attempt
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Operation being retried
        operation: &'static str,
        /// Attempts made
        attempts: usize,
        /// Last error seen
        last: String,
    },

    /// Wire format error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport never reported a usable local node id
    #[error("local member unknown after {attempts} attempts")]
    LocalIdUnavailable {
        /// Attempts made
        attempts: usize,
    },

    /// No group with this name is registered
    #[error("Unknown group '{0}'")]
    UnknownGroup(String),

    /// The binding is already running
    #[error("Binding already started")]
    AlreadyStarted,

    /// The dispatch loop has stopped
    #[error("Dispatch loop stopped")]
    DispatchStopped,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Shutdown did not finish in time
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

impl Error {
    /// Wrap a terminal transport error
    pub fn transport<E>(err: &E) -> Self
    where
        E: GroupTransportError,
    {
        Self::Transport {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
