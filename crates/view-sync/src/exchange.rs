//! State exchange coordination
//!
//! After every raw membership change, each remaining member multicasts its
//! last known view id (plus optional application data). The coordinator
//! counts the reports for one round and tells the controller when every
//! member has reported, along with the highest view id seen.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::ids::{GroupId, MemberId, ViewId};
use crate::message::{Message, MemberState};
use crate::view::View;

/// Sends this member's state report for a round.
///
/// Implemented by the communication channel on its protocol-internal path,
/// which does not wait on the view safety gate.
#[async_trait]
pub trait StateBroadcaster: Send + Sync {
    /// Multicast `state` to `group`
    async fn broadcast_state(&self, group: &GroupId, state: MemberState) -> Result<()>;
}

/// Per-round bookkeeping for the state exchange sub-protocol.
#[derive(Debug, Default)]
pub struct StateExchangeCoordinator {
    last_view_id: Option<ViewId>,
    total: BTreeSet<MemberId>,
    left: BTreeSet<MemberId>,
    joined: BTreeSet<MemberId>,
    awaited: HashMap<MemberId, u32>,
    max_view_id: Option<ViewId>,
    member_states: HashMap<MemberId, MemberState>,
    in_progress: bool,
}

impl StateExchangeCoordinator {
    /// Create an idle coordinator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a round for a raw membership change.
    ///
    /// Returns `true` when the local member is among those leaving; in that
    /// case nothing is broadcast and no reports are awaited.
    ///
    /// # Errors
    /// Fails only if broadcasting the local report fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_exchange<B>(
        &mut self,
        total: &[MemberId],
        left: &[MemberId],
        joined: &[MemberId],
        group: &GroupId,
        local_data: Option<Bytes>,
        current_view: Option<&View>,
        local_id: &MemberId,
        broadcaster: &B,
    ) -> Result<bool>
    where
        B: StateBroadcaster + ?Sized,
    {
        if self.in_progress {
            debug!("Superseding unfinished state exchange for {}", group);
        }
        self.reset();

        let last_view_id = current_view.map_or_else(ViewId::founding, View::view_id);
        self.last_view_id = Some(last_view_id);

        self.total = total.iter().cloned().collect();
        self.left = left.iter().cloned().collect();
        self.joined = joined.iter().cloned().collect();

        if self.left.contains(local_id) {
            debug!("{} is leaving {}, skipping state exchange", local_id, group);
            return Ok(true);
        }

        for member in &self.total {
            self.awaited.insert(member.clone(), 1);
        }
        for member in &self.left {
            self.awaited.remove(member);
        }
        self.in_progress = true;

        debug!(
            "Starting state exchange for {} from view {}, awaiting {} reports",
            group,
            last_view_id,
            self.awaited.len()
        );

        broadcaster
            .broadcast_state(group, MemberState::new(last_view_id, local_data))
            .await?;

        Ok(false)
    }

    /// Record one member's report; returns `true` on the report that
    /// completes the round.
    pub fn process_member_state(&mut self, state: MemberState, sender: &MemberId) -> bool {
        if !self.in_progress {
            debug!("Ignoring state from {}: no exchange in progress", sender);
            return false;
        }

        // Ties keep the first report seen.
        let replaces_max = self
            .max_view_id
            .is_none_or(|max| state.view_id.monotonic_part() > max.monotonic_part());
        if replaces_max {
            self.max_view_id = Some(state.view_id);
        }

        debug!("State from {} reports view {}", sender, state.view_id);
        self.member_states.insert(sender.clone(), state);

        match self.awaited.get_mut(sender) {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.awaited.remove(sender);
                }
            }
            None => debug!("State from {} was not awaited", sender),
        }

        if self.awaited.is_empty() {
            self.in_progress = false;
            true
        } else {
            false
        }
    }

    /// Whether `message` is protocol-internal state exchange traffic
    #[must_use]
    pub fn is_state_exchange_message(message: &Message) -> bool {
        message.is_state_exchange()
    }

    /// Clear all per-round state
    pub fn reset(&mut self) {
        self.last_view_id = None;
        self.total.clear();
        self.left.clear();
        self.joined.clear();
        self.awaited.clear();
        self.max_view_id = None;
        self.member_states.clear();
        self.in_progress = false;
    }

    /// Whether a round is waiting for reports
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// View id this member started the round from
    #[must_use]
    pub const fn last_view_id(&self) -> Option<ViewId> {
        self.last_view_id
    }

    /// Highest view id reported so far
    #[must_use]
    pub const fn max_view_id(&self) -> Option<ViewId> {
        self.max_view_id
    }

    /// Members of the group after this change
    #[must_use]
    pub const fn total(&self) -> &BTreeSet<MemberId> {
        &self.total
    }

    /// Members that left in this change
    #[must_use]
    pub const fn left(&self) -> &BTreeSet<MemberId> {
        &self.left
    }

    /// Members that joined in this change
    #[must_use]
    pub const fn joined(&self) -> &BTreeSet<MemberId> {
        &self.joined
    }

    /// Members whose report is still outstanding
    #[must_use]
    pub fn awaited(&self) -> BTreeSet<MemberId> {
        self.awaited.keys().cloned().collect()
    }

    /// Reports received this round
    #[must_use]
    pub const fn member_states(&self) -> &HashMap<MemberId, MemberState> {
        &self.member_states
    }
}
