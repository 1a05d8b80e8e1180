//! Listener traits and registries
//!
//! Listeners run on the group's dispatch task. A view listener is invoked
//! before the view safety gate reopens, so it must not await
//! `ViewController::current_view` or `CommunicationChannel::send_message`
//! itself; spawn a task for that instead.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use crate::ids::MemberId;
use crate::message::Message;
use crate::view::View;

/// Boxed error returned by data exchange listeners
pub type ListenerError = Box<dyn StdError + Send + Sync>;

/// Receives every newly installed view.
#[async_trait]
pub trait ViewChangedListener: Send + Sync + 'static {
    /// Called once per installed view
    async fn on_view_changed(&self, view: Arc<View>);
}

/// Receives application data peers attach to their state reports.
#[async_trait]
pub trait DataExchangeListener: Send + Sync + 'static {
    /// Called for every report carrying data, as soon as it arrives
    async fn on_data(&self, origin: &MemberId, data: Bytes) -> Result<(), ListenerError>;
}

/// Receives application messages.
#[async_trait]
pub trait MessageReceivedListener: Send + Sync + 'static {
    /// Called for every delivered application message
    async fn on_message_received(&self, message: Message);
}

#[async_trait]
impl<F> ViewChangedListener for F
where
    F: Fn(Arc<View>) + Send + Sync + 'static,
{
    async fn on_view_changed(&self, view: Arc<View>) {
        self(view);
    }
}

#[async_trait]
impl<F> DataExchangeListener for F
where
    F: Fn(&MemberId, Bytes) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    async fn on_data(&self, origin: &MemberId, data: Bytes) -> Result<(), ListenerError> {
        self(origin, data)
    }
}

#[async_trait]
impl<F> MessageReceivedListener for F
where
    F: Fn(Message) + Send + Sync + 'static,
{
    async fn on_message_received(&self, message: Message) {
        self(message);
    }
}

/// Handle returned when a listener is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of listeners keyed by handle; fan-out order is unspecified.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: DashMap<ListenerId, Arc<L>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }
}

impl<L: ?Sized> fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.listeners.len())
            .finish()
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    /// Register a listener
    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.insert(id, listener);
        id
    }

    /// Remove a listener; returns false if the handle is unknown
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Current listeners, cloned out so no map guard is held while they run
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
