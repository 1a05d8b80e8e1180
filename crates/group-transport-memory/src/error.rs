use proven_group_transport::{GroupTransportError, GroupTransportErrorKind};
use thiserror::Error;

/// Errors produced by the in-memory group transport.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The transport was disconnected from its network.
    #[error("transport is not connected")]
    NotConnected,

    /// Group names must be non-empty and must not contain '#'.
    #[error("illegal group name '{0}'")]
    IllegalGroup(String),

    /// Leaving a group this transport never joined.
    #[error("not a member of group '{0}'")]
    NotMember(String),

    /// A failure queued through one of the fault injection hooks.
    #[error("injected {0} failure")]
    Injected(GroupTransportErrorKind),
}

impl GroupTransportError for Error {
    fn kind(&self) -> GroupTransportErrorKind {
        match self {
            Self::NotConnected => GroupTransportErrorKind::NotConnected,
            Self::IllegalGroup(_) | Self::NotMember(_) => GroupTransportErrorKind::IllegalGroup,
            Self::Injected(kind) => *kind,
        }
    }
}
