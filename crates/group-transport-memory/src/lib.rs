//! In-memory group transport for testing
//!
//! Every `MemoryGroupTransport` attached to the same `MemoryGroupNetwork` can
//! join groups and multicast to them. The network fans each membership change
//! and each multicast out to all member queues while holding a single lock, so
//! every member observes the same total order of events.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use proven_group_transport::{
    GroupTransport, GroupTransportErrorKind, ServiceType, TransportEvent, TransportEventStream,
    TransportMember,
};
use tracing::{debug, info};

type EventSender = flume::Sender<Result<TransportEvent, Error>>;
type EventReceiver = flume::Receiver<Result<TransportEvent, Error>>;

#[derive(Default)]
struct Hub {
    next_node_id: u64,
    endpoints: HashMap<TransportMember, EventSender>,
    groups: HashMap<String, BTreeSet<TransportMember>>,
}

impl Hub {
    fn broadcast(&self, group: &str, event: &TransportEvent) {
        let Some(members) = self.groups.get(group) else {
            return;
        };

        for member in members {
            if let Some(sender) = self.endpoints.get(member) {
                let _ = sender.send(Ok(event.clone()));
            }
        }
    }

    fn send_to(&self, member: &TransportMember, event: Result<TransportEvent, Error>) {
        if let Some(sender) = self.endpoints.get(member) {
            let _ = sender.send(event);
        }
    }

    /// Removes `member` from `group` and returns the membership change to report.
    fn remove_member(&mut self, group: &str, member: TransportMember) -> Option<TransportEvent> {
        let members = self.groups.get_mut(group)?;
        if !members.remove(&member) {
            return None;
        }

        let total = members.iter().copied().collect();
        if members.is_empty() {
            self.groups.remove(group);
        }

        Some(TransportEvent::MembershipChange {
            group: group.to_string(),
            total,
            left: vec![member],
            joined: Vec::new(),
        })
    }
}

/// A shared in-process "daemon" that transports attach to.
#[derive(Clone, Default)]
pub struct MemoryGroupNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryGroupNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new transport using the current process id.
    #[must_use]
    pub fn connect(&self) -> MemoryGroupTransport {
        self.connect_with_pid(std::process::id())
    }

    /// Attaches a new transport reporting the given process id to peers.
    #[must_use]
    pub fn connect_with_pid(&self, pid: u32) -> MemoryGroupTransport {
        let (tx, rx) = flume::unbounded();

        let member = {
            let mut hub = self.hub.lock();
            hub.next_node_id += 1;
            let member = TransportMember::new(hub.next_node_id, pid);
            hub.endpoints.insert(member, tx);
            member
        };

        info!("Memory group transport {} connected", member);

        MemoryGroupTransport {
            network: self.clone(),
            member,
            events: rx,
            connected: Arc::new(AtomicBool::new(true)),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Current members of a group, in node id order.
    #[must_use]
    pub fn members(&self, group: &str) -> Vec<TransportMember> {
        self.hub
            .lock()
            .groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Debug for MemoryGroupNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hub = self.hub.lock();
        f.debug_struct("MemoryGroupNetwork")
            .field("endpoints", &hub.endpoints.len())
            .field("groups", &hub.groups.len())
            .finish()
    }
}

#[derive(Default)]
struct Faults {
    join: Mutex<VecDeque<GroupTransportErrorKind>>,
    multicast: Mutex<VecDeque<GroupTransportErrorKind>>,
    zero_node_ids: AtomicU32,
}

/// A single connection to a `MemoryGroupNetwork`.
#[derive(Clone)]
pub struct MemoryGroupTransport {
    network: MemoryGroupNetwork,
    member: TransportMember,
    events: EventReceiver,
    connected: Arc<AtomicBool>,
    faults: Arc<Faults>,
}

impl MemoryGroupTransport {
    /// The descriptor peers see for this transport.
    #[must_use]
    pub const fn member(&self) -> TransportMember {
        self.member
    }

    /// Makes the next `count` joins fail with `kind`.
    pub fn fail_next_joins(&self, count: usize, kind: GroupTransportErrorKind) {
        self.faults.join.lock().extend(std::iter::repeat_n(kind, count));
    }

    /// Makes the next `count` multicasts fail with `kind`.
    pub fn fail_next_multicasts(&self, count: usize, kind: GroupTransportErrorKind) {
        self.faults
            .multicast
            .lock()
            .extend(std::iter::repeat_n(kind, count));
    }

    /// Makes the next `count` local node id lookups return zero.
    pub fn report_zero_node_id(&self, count: u32) {
        self.faults.zero_node_ids.store(count, Ordering::SeqCst);
    }

    /// Drops the connection without leaving groups cleanly.
    ///
    /// Peers observe the member as failed; this transport's event stream
    /// yields `Error::NotConnected` and ends.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut hub = self.network.hub.lock();
        let groups: Vec<String> = hub
            .groups
            .iter()
            .filter(|(_, members)| members.contains(&self.member))
            .map(|(group, _)| group.clone())
            .collect();

        for group in groups {
            if let Some(event) = hub.remove_member(&group, self.member) {
                hub.broadcast(&group, &event);
            }
        }

        hub.send_to(&self.member, Err(Error::NotConnected));
        hub.endpoints.remove(&self.member);

        info!("Memory group transport {} disconnected", self.member);
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn validate_group(group: &str) -> Result<(), Error> {
        if group.is_empty() || group.contains('#') {
            return Err(Error::IllegalGroup(group.to_string()));
        }
        Ok(())
    }
}

impl Debug for MemoryGroupTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGroupTransport")
            .field("member", &self.member)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GroupTransport for MemoryGroupTransport {
    type Error = Error;

    async fn join(&self, group: &str) -> Result<(), Error> {
        self.ensure_connected()?;
        Self::validate_group(group)?;

        if let Some(kind) = self.faults.join.lock().pop_front() {
            return Err(Error::Injected(kind));
        }

        let mut hub = self.network.hub.lock();
        let members = hub.groups.entry(group.to_string()).or_default();
        if !members.insert(self.member) {
            debug!("{} already in group {}", self.member, group);
            return Ok(());
        }

        let event = TransportEvent::MembershipChange {
            group: group.to_string(),
            total: members.iter().copied().collect(),
            left: Vec::new(),
            joined: vec![self.member],
        };
        hub.broadcast(group, &event);

        debug!("{} joined group {}", self.member, group);
        Ok(())
    }

    async fn leave(&self, group: &str) -> Result<(), Error> {
        self.ensure_connected()?;
        Self::validate_group(group)?;

        let mut hub = self.network.hub.lock();
        let event = hub
            .remove_member(group, self.member)
            .ok_or_else(|| Error::NotMember(group.to_string()))?;

        hub.broadcast(group, &event);
        // The leaver is told about its own departure as well.
        hub.send_to(&self.member, Ok(event));

        debug!("{} left group {}", self.member, group);
        Ok(())
    }

    async fn local_node_id(&self) -> Result<u64, Error> {
        self.ensure_connected()?;

        let remaining = self.faults.zero_node_ids.load(Ordering::SeqCst);
        if remaining > 0 {
            self.faults.zero_node_ids.store(remaining - 1, Ordering::SeqCst);
            return Ok(0);
        }

        Ok(self.member.node_id)
    }

    fn process_id(&self) -> u32 {
        self.member.pid
    }

    async fn multicast(
        &self,
        group: &str,
        service: ServiceType,
        payload: Bytes,
    ) -> Result<(), Error> {
        self.ensure_connected()?;
        Self::validate_group(group)?;

        if let Some(kind) = self.faults.multicast.lock().pop_front() {
            return Err(Error::Injected(kind));
        }

        let hub = self.network.hub.lock();
        hub.broadcast(
            group,
            &TransportEvent::Deliver {
                group: group.to_string(),
                sender: self.member,
                service,
                payload,
            },
        );

        Ok(())
    }

    fn events(&self) -> TransportEventStream<Error> {
        Box::pin(self.events.clone().into_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_node_ids_are_unique_and_non_zero() {
        let network = MemoryGroupNetwork::new();
        let a = network.connect();
        let b = network.connect();

        let a_id = a.local_node_id().await.unwrap();
        let b_id = b.local_node_id().await.unwrap();

        assert_ne!(a_id, 0);
        assert_ne!(b_id, 0);
        assert_ne!(a_id, b_id);
    }

    #[tokio::test]
    async fn test_zero_node_id_injection() {
        let network = MemoryGroupNetwork::new();
        let transport = network.connect();
        transport.report_zero_node_id(2);

        assert_eq!(transport.local_node_id().await.unwrap(), 0);
        assert_eq!(transport.local_node_id().await.unwrap(), 0);
        assert_eq!(
            transport.local_node_id().await.unwrap(),
            transport.member().node_id
        );
    }

    #[tokio::test]
    async fn test_illegal_group_names() {
        let network = MemoryGroupNetwork::new();
        let transport = network.connect();

        assert_matches!(transport.join("").await, Err(Error::IllegalGroup(_)));
        assert_matches!(transport.join("a#b").await, Err(Error::IllegalGroup(_)));
    }

    #[tokio::test]
    async fn test_leave_without_join() {
        let network = MemoryGroupNetwork::new();
        let transport = network.connect();

        assert_matches!(transport.leave("g").await, Err(Error::NotMember(_)));
    }

    #[tokio::test]
    async fn test_injected_multicast_failures_are_consumed_in_order() {
        let network = MemoryGroupNetwork::new();
        let transport = network.connect();
        transport.fail_next_multicasts(1, GroupTransportErrorKind::TryAgain);
        transport.fail_next_multicasts(1, GroupTransportErrorKind::Fatal);

        assert_eq!(
            transport
                .multicast("g", ServiceType::Agreed, Bytes::from_static(b"x"))
                .await,
            Err(Error::Injected(GroupTransportErrorKind::TryAgain))
        );
        assert_eq!(
            transport
                .multicast("g", ServiceType::Agreed, Bytes::from_static(b"x"))
                .await,
            Err(Error::Injected(GroupTransportErrorKind::Fatal))
        );
        assert!(
            transport
                .multicast("g", ServiceType::Agreed, Bytes::from_static(b"x"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_disconnected_transport_rejects_calls() {
        let network = MemoryGroupNetwork::new();
        let transport = network.connect();
        transport.disconnect();

        assert_matches!(transport.join("g").await, Err(Error::NotConnected));
        assert_matches!(transport.local_node_id().await, Err(Error::NotConnected));
    }
}
