//! Communication channel for one group
//!
//! Outbound application messages wait for the view safety gate before they
//! are multicast, so they are always sent under an installed view. Delivered
//! messages are offered to the protocol first and reach application
//! listeners only if the protocol does not consume them.

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use proven_group_transport::{GroupTransport, ServiceType, TransportMember};
use tracing::{debug, warn};

use crate::config::ViewSyncConfig;
use crate::error::Result;
use crate::exchange::StateBroadcaster;
use crate::gate::ViewSafetyGate;
use crate::ids::{GroupId, MemberId};
use crate::listener::{ListenerId, ListenerRegistry, MessageReceivedListener};
use crate::message::{MemberState, Message};
use crate::retry::with_retry;
use crate::statistics::Statistics;

/// Gets the first look at every delivered message.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Returns `true` if the message was protocol traffic and has been handled
    async fn on_protocol_message(&self, message: &Message) -> bool;
}

/// Sends and receives messages for one group.
pub struct CommunicationChannel<T>
where
    T: GroupTransport,
{
    group: GroupId,
    transport: Arc<T>,
    gate: Arc<ViewSafetyGate>,
    statistics: Arc<Statistics>,
    listeners: ListenerRegistry<dyn MessageReceivedListener>,
    config: ViewSyncConfig,
}

impl<T> CommunicationChannel<T>
where
    T: GroupTransport,
{
    /// Create a channel for `group`
    pub fn new(
        group: GroupId,
        transport: Arc<T>,
        gate: Arc<ViewSafetyGate>,
        statistics: Arc<Statistics>,
        config: ViewSyncConfig,
    ) -> Self {
        Self {
            group,
            transport,
            gate,
            statistics,
            listeners: ListenerRegistry::default(),
            config,
        }
    }

    /// Group this channel serves
    pub const fn group(&self) -> &GroupId {
        &self.group
    }

    /// Counters for this channel
    pub const fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    /// Send an application message once no view change is in flight.
    ///
    /// # Errors
    /// Returns an error if encoding fails, the transport reports a terminal
    /// error, or every retry of a transient error fails.
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        self.gate.wait_for_view_change_end().await;

        let sent = self.send_internal(message).await?;
        self.statistics.record_sent(sent);

        Ok(())
    }

    /// Multicast without waiting on the view safety gate.
    ///
    /// Returns the number of bytes handed to the transport.
    ///
    /// # Errors
    /// Same as `send_message`.
    pub async fn send_internal(&self, message: &Message) -> Result<usize> {
        let service = ServiceType::from(message.delivery_guarantee());
        let payload = message.encode()?;
        let len = payload.len();
        let destination = message.destination().as_str();

        with_retry(
            "multicast",
            self.config.retry_attempts,
            self.config.retry_delay,
            || self.transport.multicast(destination, service, payload.clone()),
        )
        .await?;

        debug!("Sent {} bytes to {} ({:?})", len, destination, service);
        Ok(len)
    }

    /// Handle a delivery from the transport.
    ///
    /// Undecodable messages are dropped.
    pub async fn deliver_message<P>(
        &self,
        sender: TransportMember,
        service: ServiceType,
        payload: Bytes,
        protocol: &P,
    ) where
        P: ProtocolHandler + ?Sized,
    {
        let origin = MemberId::from(sender);
        self.statistics.record_received(payload.len());

        let message = match Message::decode(payload, origin, self.group.clone(), service.into()) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping undecodable message from {} in {}: {}",
                    sender, self.group, e
                );
                return;
            }
        };

        if protocol.on_protocol_message(&message).await {
            return;
        }

        for listener in self.listeners.snapshot() {
            listener.on_message_received(message.clone()).await;
        }
    }

    /// Register an application message listener
    pub fn add_event_listener(&self, listener: Arc<dyn MessageReceivedListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Remove an application message listener
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

#[async_trait]
impl<T> StateBroadcaster for CommunicationChannel<T>
where
    T: GroupTransport,
{
    async fn broadcast_state(&self, group: &GroupId, state: MemberState) -> Result<()> {
        self.send_internal(&state.into_message(group.clone()))
            .await
            .map(|_| ())
    }
}

impl<T> Debug for CommunicationChannel<T>
where
    T: GroupTransport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicationChannel")
            .field("group", &self.group)
            .field("statistics", &self.statistics.snapshot())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
