//! View controller
//!
//! Turns raw membership changes from the transport into agreed views. Every
//! change closes the view safety gate and starts a state exchange round;
//! once every remaining member has reported, the next view is installed with
//! the highest reported view id plus one and the gate reopens.
//!
//! All mutating entry points (`on_raw_membership_change` and the protocol
//! handler) are driven by the group's dispatch task, which serializes
//! installs.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use proven_group_transport::{GroupTransport, TransportMember};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::channel::{CommunicationChannel, ProtocolHandler};
use crate::config::ViewSyncConfig;
use crate::error::{Error, Result};
use crate::exchange::StateExchangeCoordinator;
use crate::gate::ViewSafetyGate;
use crate::ids::{GroupId, MemberId, ViewId};
use crate::listener::{DataExchangeListener, ListenerId, ListenerRegistry, ViewChangedListener};
use crate::message::{Envelope, Message};
use crate::retry::with_retry;
use crate::statistics::Statistics;
use crate::view::View;

/// Membership state of the local member in one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControllerState {
    /// No view installed, or the transport connection was lost
    #[default]
    NotJoined,
    /// The latest view contains the local member
    Joined,
    /// The latest view does not contain the local member
    Left,
}

/// Drives view agreement for one group.
pub struct ViewController<T>
where
    T: GroupTransport,
{
    group: GroupId,
    transport: Arc<T>,
    channel: Arc<CommunicationChannel<T>>,
    gate: Arc<ViewSafetyGate>,
    coordinator: Mutex<StateExchangeCoordinator>,
    current_view: ArcSwapOption<View>,
    belongs: AtomicBool,
    state: RwLock<ControllerState>,
    local_member: RwLock<Option<MemberId>>,
    exchange_data: RwLock<Option<Bytes>>,
    view_listeners: ListenerRegistry<dyn ViewChangedListener>,
    data_listeners: ListenerRegistry<dyn DataExchangeListener>,
    config: ViewSyncConfig,
}

impl<T> ViewController<T>
where
    T: GroupTransport,
{
    /// Create a controller, with its channel and gate, for `group`
    pub fn new(group: GroupId, transport: Arc<T>, config: ViewSyncConfig) -> Self {
        let gate = Arc::new(ViewSafetyGate::new());
        let channel = Arc::new(CommunicationChannel::new(
            group.clone(),
            transport.clone(),
            gate.clone(),
            Arc::new(Statistics::new()),
            config.clone(),
        ));

        Self {
            group,
            transport,
            channel,
            gate,
            coordinator: Mutex::new(StateExchangeCoordinator::new()),
            current_view: ArcSwapOption::empty(),
            belongs: AtomicBool::new(false),
            state: RwLock::new(ControllerState::NotJoined),
            local_member: RwLock::new(None),
            exchange_data: RwLock::new(None),
            view_listeners: ListenerRegistry::default(),
            data_listeners: ListenerRegistry::default(),
            config,
        }
    }

    /// Group this controller serves
    pub const fn group(&self) -> &GroupId {
        &self.group
    }

    /// Channel for application messages in this group
    pub const fn channel(&self) -> &Arc<CommunicationChannel<T>> {
        &self.channel
    }

    /// Join the group.
    ///
    /// The first view arrives asynchronously once the transport reports the
    /// membership change.
    ///
    /// # Errors
    /// Fails if the local member cannot be resolved or the transport refuses
    /// the join.
    pub async fn join(&self) -> Result<()> {
        let local = self.local_information().await?;

        with_retry(
            "join",
            self.config.retry_attempts,
            self.config.retry_delay,
            || self.transport.join(self.group.as_str()),
        )
        .await?;

        info!("{} joining group {}", local, self.group);
        Ok(())
    }

    /// Leave the group with a single transport call.
    ///
    /// # Errors
    /// Returns the transport's error unchanged in kind.
    pub async fn leave(&self) -> Result<()> {
        self.transport
            .leave(self.group.as_str())
            .await
            .map_err(|e| Error::transport(&e))?;

        info!("Leaving group {}", self.group);
        Ok(())
    }

    /// Resolve and cache the local member id.
    ///
    /// The transport may report node id zero before it is ready; the lookup
    /// is repeated a bounded number of times.
    ///
    /// # Errors
    /// Returns `Error::LocalIdUnavailable` once the attempts run out.
    pub async fn local_information(&self) -> Result<MemberId> {
        if let Some(member) = self.local_member.read().clone() {
            return Ok(member);
        }

        let attempts = self.config.local_id_attempts;
        for attempt in 1..=attempts {
            match self.transport.local_node_id().await {
                Ok(0) => debug!("Local node id not ready ({}/{})", attempt, attempts),
                Ok(node_id) => {
                    let member = MemberId::new(node_id, self.transport.process_id());
                    *self.local_member.write() = Some(member.clone());
                    return Ok(member);
                }
                Err(e) => warn!("Local node id lookup failed ({}/{}): {}", attempt, attempts, e),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.local_id_retry_delay).await;
            }
        }

        Err(Error::LocalIdUnavailable { attempts })
    }

    /// Cached local member id, if resolved
    pub fn local_member(&self) -> Option<MemberId> {
        self.local_member.read().clone()
    }

    /// Data attached to this member's future state reports
    pub fn set_exchange_data(&self, data: Option<Bytes>) {
        *self.exchange_data.write() = data;
    }

    /// Current view, once no view change is in flight
    pub async fn current_view(&self) -> Option<Arc<View>> {
        self.gate.wait_for_view_change_end().await;
        self.current_view.load_full()
    }

    /// Whether the latest view contains the local member
    pub fn belongs_to_group(&self) -> bool {
        self.belongs.load(Ordering::SeqCst)
    }

    /// Membership state of the local member
    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    /// Whether a view change is in flight
    pub fn is_view_changing(&self) -> bool {
        self.gate.is_changing()
    }

    /// Register a view listener
    pub fn add_view_listener(&self, listener: Arc<dyn ViewChangedListener>) -> ListenerId {
        self.view_listeners.add(listener)
    }

    /// Remove a view listener
    pub fn remove_view_listener(&self, id: ListenerId) -> bool {
        self.view_listeners.remove(id)
    }

    /// Register a data exchange listener
    pub fn add_data_listener(&self, listener: Arc<dyn DataExchangeListener>) -> ListenerId {
        self.data_listeners.add(listener)
    }

    /// Remove a data exchange listener
    pub fn remove_data_listener(&self, id: ListenerId) -> bool {
        self.data_listeners.remove(id)
    }

    /// Start a view change for a raw membership change.
    ///
    /// A change arriving while a round is still open supersedes that round.
    pub async fn on_raw_membership_change(
        &self,
        total: &[TransportMember],
        left: &[TransportMember],
        joined: &[TransportMember],
    ) {
        let local = match self.local_information().await {
            Ok(local) => local,
            Err(e) => {
                warn!("Ignoring membership change in {}: {}", self.group, e);
                return;
            }
        };

        let total: Vec<MemberId> = total.iter().map(MemberId::from).collect();
        let left: Vec<MemberId> = left.iter().map(MemberId::from).collect();
        let joined: Vec<MemberId> = joined.iter().map(MemberId::from).collect();

        debug!(
            "Membership change in {}: total={:?} left={:?} joined={:?}",
            self.group, total, left, joined
        );

        if self.gate.is_changing() {
            warn!("Membership change in {} superseded an open view change", self.group);
        } else {
            self.gate.start_view_exchange();
        }

        let mut coordinator = self.coordinator.lock().await;
        let current = self.current_view.load_full();
        let local_data = self.exchange_data.read().clone();

        let leaving = coordinator
            .start_exchange(
                &total,
                &left,
                &joined,
                &self.group,
                local_data,
                current.as_deref(),
                &local,
                self.channel.as_ref(),
            )
            .await;

        match leaving {
            Ok(true) => {
                let view_id = coordinator
                    .last_view_id()
                    .unwrap_or_else(ViewId::founding)
                    .increment();
                self.install_view(&mut coordinator, view_id).await;
            }
            Ok(false) => {}
            Err(e) => {
                // Our own report will never arrive, so the round cannot complete.
                error!(
                    "Failed to broadcast state for {}, abandoning view change: {}",
                    self.group, e
                );
                coordinator.reset();
                self.gate.end_view_exchange();
            }
        }
    }

    async fn install_view(&self, coordinator: &mut StateExchangeCoordinator, view_id: ViewId) {
        let view = Arc::new(View::new(
            self.group.clone(),
            view_id,
            coordinator.total(),
            coordinator.left(),
            coordinator.joined(),
        ));

        self.current_view.store(Some(view.clone()));

        let belongs = self
            .local_member
            .read()
            .as_ref()
            .is_some_and(|local| view.contains(local));
        self.belongs.store(belongs, Ordering::SeqCst);
        *self.state.write() = if belongs {
            ControllerState::Joined
        } else {
            ControllerState::Left
        };

        for listener in self.view_listeners.snapshot() {
            listener.on_view_changed(view.clone()).await;
        }

        self.gate.end_view_exchange();
        coordinator.reset();

        info!("Installed view {}", view);
    }

    /// Drop all view state and reopen the gate.
    ///
    /// Used when the transport connection is lost or the binding shuts down.
    pub(crate) async fn reset_membership(&self) {
        self.coordinator.lock().await.reset();
        self.current_view.store(None);
        self.belongs.store(false, Ordering::SeqCst);
        *self.state.write() = ControllerState::NotJoined;

        if self.gate.is_changing() {
            self.gate.end_view_exchange();
        }

        debug!("Reset membership of {}", self.group);
    }
}

#[async_trait]
impl<T> ProtocolHandler for ViewController<T>
where
    T: GroupTransport,
{
    async fn on_protocol_message(&self, message: &Message) -> bool {
        if !StateExchangeCoordinator::is_state_exchange_message(message) {
            return false;
        }

        let (origin, state) = match Envelope::classify(message.clone()) {
            Ok(Envelope::StateExchange {
                origin: Some(origin),
                state,
            }) => (origin, state),
            Ok(_) => {
                warn!("Dropping state report without origin in {}", self.group);
                return true;
            }
            Err(e) => {
                warn!("Dropping malformed state report in {}: {}", self.group, e);
                return true;
            }
        };

        let data = state.data.clone();
        let mut coordinator = self.coordinator.lock().await;
        let can_install = coordinator.process_member_state(state, &origin);

        if let Some(data) = data {
            for listener in self.data_listeners.snapshot() {
                if let Err(e) = listener.on_data(&origin, data.clone()).await {
                    warn!("Data listener failed for {}: {}", origin, e);
                }
            }
        }

        if can_install {
            let view_id = coordinator
                .max_view_id()
                .unwrap_or_else(ViewId::founding)
                .increment();
            self.install_view(&mut coordinator, view_id).await;
        }

        true
    }
}

impl<T> Debug for ViewController<T>
where
    T: GroupTransport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewController")
            .field("group", &self.group)
            .field("state", &self.state())
            .field("current_view", &self.current_view.load_full())
            .field("view_changing", &self.gate.is_changing())
            .finish_non_exhaustive()
    }
}
