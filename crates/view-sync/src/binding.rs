//! Binding between one transport connection and its groups
//!
//! The binding owns the transport and a single dispatch loop reading its
//! event stream. Each event is routed to the inbox of the group it names;
//! every group drains its inbox on its own task, so view installs within a
//! group are strictly serialized while groups progress independently.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::StreamExt;
use proven_group_transport::{
    GroupTransport, GroupTransportError, TransportEvent, TransportEventStream,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::channel::CommunicationChannel;
use crate::config::ViewSyncConfig;
use crate::controller::ViewController;
use crate::error::{Error, Result};
use crate::ids::GroupId;
use crate::statistics::Statistics;

/// Controller, channel and statistics of one group
pub struct GroupHandle<T>
where
    T: GroupTransport,
{
    controller: Arc<ViewController<T>>,
    channel: Arc<CommunicationChannel<T>>,
    statistics: Arc<Statistics>,
}

impl<T> GroupHandle<T>
where
    T: GroupTransport,
{
    fn new(controller: Arc<ViewController<T>>) -> Self {
        let channel = controller.channel().clone();
        let statistics = channel.statistics().clone();

        Self {
            controller,
            channel,
            statistics,
        }
    }

    /// Group name
    pub fn group(&self) -> &GroupId {
        self.controller.group()
    }

    /// View controller
    pub const fn controller(&self) -> &Arc<ViewController<T>> {
        &self.controller
    }

    /// Communication channel
    pub const fn channel(&self) -> &Arc<CommunicationChannel<T>> {
        &self.channel
    }

    /// Message counters
    pub const fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }
}

impl<T> Clone for GroupHandle<T>
where
    T: GroupTransport,
{
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            channel: self.channel.clone(),
            statistics: self.statistics.clone(),
        }
    }
}

impl<T> Debug for GroupHandle<T>
where
    T: GroupTransport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

struct GroupEntry<T>
where
    T: GroupTransport,
{
    handle: GroupHandle<T>,
    inbox: flume::Sender<TransportEvent>,
}

type Groups<T> = DashMap<GroupId, GroupEntry<T>>;

/// Owns a transport connection and the groups joined through it.
pub struct ViewSyncBinding<T>
where
    T: GroupTransport,
{
    transport: Arc<T>,
    config: ViewSyncConfig,
    groups: Arc<Groups<T>>,
    task_tracker: TaskTracker,
    group_tracker: TaskTracker,
    cancellation_token: CancellationToken,
    group_token: CancellationToken,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
}

impl<T> ViewSyncBinding<T>
where
    T: GroupTransport,
{
    /// Create a binding over `transport`.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn new(transport: T, config: ViewSyncConfig) -> Result<Self> {
        config.validate()?;

        let cancellation_token = CancellationToken::new();
        let group_token = cancellation_token.child_token();

        Ok(Self {
            transport: Arc::new(transport),
            config,
            groups: Arc::new(DashMap::new()),
            task_tracker: TaskTracker::new(),
            group_tracker: TaskTracker::new(),
            cancellation_token,
            group_token,
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The underlying transport
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Start the dispatch loop.
    ///
    /// Events the transport produced before this call are buffered in its
    /// stream and dispatched once the loop runs.
    ///
    /// # Errors
    /// Returns `Error::AlreadyStarted` on a second call and
    /// `Error::DispatchStopped` after shutdown.
    pub fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::DispatchStopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let events = self.transport.events();
        let groups = self.groups.clone();
        let stopped = self.stopped.clone();
        let group_tracker = self.group_tracker.clone();
        let group_token = self.group_token.clone();
        let cancellation = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            tokio::select! {
                () = Self::dispatch_loop(events, groups, stopped, group_tracker, group_token) => {
                    debug!("Dispatch loop exited");
                }
                () = cancellation.cancelled() => {
                    debug!("Dispatch loop cancelled");
                }
            }
        });

        info!("View sync binding started");
        Ok(())
    }

    /// Handle for `group`, creating its controller on first access.
    ///
    /// # Errors
    /// Returns `Error::DispatchStopped` once the binding has shut down or
    /// the transport connection has failed.
    pub fn group(&self, group: impl Into<GroupId>) -> Result<GroupHandle<T>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::DispatchStopped);
        }

        let group = group.into();
        let entry = self
            .groups
            .entry(group.clone())
            .or_insert_with(|| self.spawn_group(group));

        Ok(entry.handle.clone())
    }

    /// Handle for a group that has already been accessed.
    ///
    /// # Errors
    /// Returns `Error::UnknownGroup` if the group was never created.
    pub fn existing_group(&self, group: &GroupId) -> Result<GroupHandle<T>> {
        self.groups
            .get(group)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| Error::UnknownGroup(group.to_string()))
    }

    /// Names of every group created so far
    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.groups.iter().map(|e| e.key().clone()).collect();
        groups.sort();
        groups
    }

    /// Whether the dispatch loop has stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the dispatch loop and every group task, then reset all groups.
    ///
    /// Senders and view readers blocked on an open view change are released.
    ///
    /// # Errors
    /// Returns `Error::ShutdownTimeout` if background tasks do not finish in
    /// time.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down view sync binding");

        self.stopped.store(true, Ordering::SeqCst);
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.group_tracker.close();

        let timeout = self.config.shutdown_timeout;
        let finished = async {
            self.task_tracker.wait().await;
            self.group_tracker.wait().await;
        };
        if tokio::time::timeout(timeout, finished).await.is_err() {
            warn!("View sync tasks did not stop within {:?}", timeout);
            return Err(Error::ShutdownTimeout(timeout));
        }

        for controller in Self::controllers(&self.groups) {
            controller.reset_membership().await;
        }

        debug!("View sync binding shut down cleanly");
        Ok(())
    }

    fn spawn_group(&self, group: GroupId) -> GroupEntry<T> {
        let (inbox, events) = flume::unbounded();
        let controller = Arc::new(ViewController::new(
            group.clone(),
            self.transport.clone(),
            self.config.clone(),
        ));

        let task_controller = controller.clone();
        let cancellation = self.group_token.clone();
        self.group_tracker.spawn(async move {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    debug!("Group loop for {} cancelled", group);
                }
                () = Self::group_loop(task_controller, events) => {
                    debug!("Group loop for {} exited", group);
                }
            }
        });

        GroupEntry {
            handle: GroupHandle::new(controller),
            inbox,
        }
    }

    async fn dispatch_loop(
        mut events: TransportEventStream<T::Error>,
        groups: Arc<Groups<T>>,
        stopped: Arc<AtomicBool>,
        group_tracker: TaskTracker,
        group_token: CancellationToken,
    ) {
        loop {
            match events.next().await {
                Some(Ok(event)) => Self::route(&groups, event),
                Some(Err(e)) if e.is_transient() => {
                    warn!("Transient transport error in dispatch: {}", e);
                }
                Some(Err(e)) => {
                    error!("Fatal transport error, stopping dispatch: {}", e);
                    break;
                }
                None => {
                    error!("Transport event stream ended, stopping dispatch");
                    break;
                }
            }
        }

        // Group loops must be gone before the reset, or events still queued
        // in their inboxes would start new view changes afterwards.
        stopped.store(true, Ordering::SeqCst);
        group_token.cancel();
        group_tracker.close();
        group_tracker.wait().await;

        for controller in Self::controllers(&groups) {
            controller.reset_membership().await;
        }
    }

    fn route(groups: &Groups<T>, event: TransportEvent) {
        let group = GroupId::from(event.group());

        match groups.get(&group) {
            Some(entry) => {
                if entry.inbox.send(event).is_err() {
                    warn!("Group loop for {} is gone, dropping event", group);
                }
            }
            None => debug!("Dropping event for unknown group {}", group),
        }
    }

    async fn group_loop(controller: Arc<ViewController<T>>, events: flume::Receiver<TransportEvent>) {
        while let Ok(event) = events.recv_async().await {
            match event {
                TransportEvent::MembershipChange {
                    total,
                    left,
                    joined,
                    ..
                } => {
                    controller
                        .on_raw_membership_change(&total, &left, &joined)
                        .await;
                }
                TransportEvent::Deliver {
                    sender,
                    service,
                    payload,
                    ..
                } => {
                    controller
                        .channel()
                        .deliver_message(sender, service, payload, controller.as_ref())
                        .await;
                }
            }
        }
    }

    fn controllers(groups: &Groups<T>) -> Vec<Arc<ViewController<T>>> {
        groups
            .iter()
            .map(|entry| entry.handle.controller.clone())
            .collect()
    }
}

impl<T> Debug for ViewSyncBinding<T>
where
    T: GroupTransport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSyncBinding")
            .field("groups", &self.groups())
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
