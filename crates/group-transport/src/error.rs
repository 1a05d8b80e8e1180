//! Error seam for group transports

use std::error::Error;
use std::fmt::{self, Debug};

/// Marker trait for `GroupTransport` errors
pub trait GroupTransportError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> GroupTransportErrorKind;

    /// Whether retrying the same call may succeed
    fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// The kind of group transport error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum GroupTransportErrorKind {
    /// The daemon asked the caller to try again later
    TryAgain,

    /// The connection to the daemon is gone
    NotConnected,

    /// The group name was rejected
    IllegalGroup,

    /// The message was rejected (too large, malformed service type, ...)
    IllegalMessage,

    /// Any other unrecoverable failure
    Fatal,
}

impl GroupTransportErrorKind {
    /// Only `TryAgain` is worth retrying.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::TryAgain)
    }
}

impl fmt::Display for GroupTransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
