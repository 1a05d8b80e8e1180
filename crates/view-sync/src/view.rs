//! Agreed group views

use std::collections::BTreeSet;
use std::fmt;

use crate::ids::{GroupId, MemberId, ViewId};

/// An agreed, immutable snapshot of a group's membership.
///
/// Views are never mutated; each membership change installs a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    group: GroupId,
    view_id: ViewId,
    members: Vec<MemberId>,
    left: Vec<MemberId>,
    joined: Vec<MemberId>,
}

impl View {
    /// Build a view from membership sets; member lists come out sorted.
    #[must_use]
    pub fn new(
        group: GroupId,
        view_id: ViewId,
        members: &BTreeSet<MemberId>,
        left: &BTreeSet<MemberId>,
        joined: &BTreeSet<MemberId>,
    ) -> Self {
        Self {
            group,
            view_id,
            members: members.iter().cloned().collect(),
            left: left.iter().cloned().collect(),
            joined: joined.iter().cloned().collect(),
        }
    }

    /// Group this view belongs to
    #[must_use]
    pub const fn group(&self) -> &GroupId {
        &self.group
    }

    /// Version tag
    #[must_use]
    pub const fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Members in this view
    #[must_use]
    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    /// Members that left since the previous view
    #[must_use]
    pub fn left(&self) -> &[MemberId] {
        &self.left
    }

    /// Members that joined since the previous view
    #[must_use]
    pub fn joined(&self) -> &[MemberId] {
        &self.joined
    }

    /// Whether `member` is part of this view
    #[must_use]
    pub fn contains(&self, member: &MemberId) -> bool {
        self.members.binary_search(member).is_ok()
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if nobody is in the view
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [", self.group, self.view_id)?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{member}")?;
        }
        f.write_str("]")
    }
}
