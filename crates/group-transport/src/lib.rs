//! Abstract interface for multicast group communication transports.
//!
//! A group transport lets a process join and leave named groups, multicast
//! bytes to every member of a group with a requested delivery guarantee, and
//! observe two kinds of events: raw membership changes and delivered messages.
//! Agreement on views is not the transport's job; see `proven-view-sync`.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{GroupTransportError, GroupTransportErrorKind};

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// Stream of events produced by a transport.
pub type TransportEventStream<E> = Pin<Box<dyn Stream<Item = Result<TransportEvent, E>> + Send>>;

/// Ordering/durability contract of a multicast.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ServiceType {
    /// No ordering between senders
    #[default]
    Unordered,

    /// Every member delivers messages in the same total order
    Agreed,

    /// Agreed order, delivered only once every member has the message
    Safe,
}

/// A process attached to the transport, as reported in membership lists and deliveries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TransportMember {
    /// Transport-assigned node id (never zero for a live member)
    pub node_id: u64,

    /// Operating system process id of the member
    pub pid: u32,
}

impl TransportMember {
    /// Creates a new member descriptor.
    #[must_use]
    pub const fn new(node_id: u64, pid: u32) -> Self {
        Self { node_id, pid }
    }
}

impl fmt::Display for TransportMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}#{}", self.node_id, self.pid)
    }
}

/// Events emitted by a group transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportEvent {
    /// The transport's view of a group changed.
    MembershipChange {
        /// Group the change applies to
        group: String,
        /// Members after the change
        total: Vec<TransportMember>,
        /// Members that left (or failed)
        left: Vec<TransportMember>,
        /// Members that joined
        joined: Vec<TransportMember>,
    },

    /// A multicast was delivered.
    Deliver {
        /// Group the message was sent to
        group: String,
        /// Sender of the message
        sender: TransportMember,
        /// Guarantee the sender requested
        service: ServiceType,
        /// Raw bytes as multicast
        payload: Bytes,
    },
}

impl TransportEvent {
    /// Name of the group the event belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        match self {
            Self::MembershipChange { group, .. } | Self::Deliver { group, .. } => group,
        }
    }
}

/// Connection to a group communication daemon.
#[async_trait]
pub trait GroupTransport: Send + Sync + 'static {
    /// The error type for transport operations.
    type Error: GroupTransportError;

    /// Join a named group. Membership is reported later through `events`.
    async fn join(&self, group: &str) -> Result<(), Self::Error>;

    /// Leave a named group.
    async fn leave(&self, group: &str) -> Result<(), Self::Error>;

    /// The node id assigned to this connection.
    ///
    /// Some daemons report zero until the connection is fully established;
    /// callers are expected to retry on zero.
    async fn local_node_id(&self) -> Result<u64, Self::Error>;

    /// Process id reported to peers alongside the node id.
    fn process_id(&self) -> u32;

    /// Multicast bytes to every member of a group (including the sender).
    async fn multicast(
        &self,
        group: &str,
        service: ServiceType,
        payload: Bytes,
    ) -> Result<(), Self::Error>;

    /// Stream of membership changes and deliveries for every joined group.
    ///
    /// An `Err` item of a non-transient kind is terminal for the connection.
    fn events(&self) -> TransportEventStream<Self::Error>;
}
