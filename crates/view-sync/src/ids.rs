//! Identifier types

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use proven_group_transport::TransportMember;

/// Version tag of a view.
///
/// The fixed part is chosen once, when a view lineage begins, and never
/// changes afterwards. The monotonic part grows by one on every install.
/// Ordering compares the monotonic part first and only falls back to the
/// fixed part to keep `Ord` total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId {
    fixed: u64,
    monotonic: i64,
}

impl ViewId {
    /// Create a view id from its two parts
    #[must_use]
    pub const fn new(fixed: u64, monotonic: i64) -> Self {
        Self { fixed, monotonic }
    }

    /// Start a new lineage stamped with the current wall-clock seconds
    #[must_use]
    pub fn founding() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self::new(seconds, 0)
    }

    /// Lineage tag
    #[must_use]
    pub const fn fixed_part(&self) -> u64 {
        self.fixed
    }

    /// Install counter
    #[must_use]
    pub const fn monotonic_part(&self) -> i64 {
        self.monotonic
    }

    /// The id of the next view in the same lineage
    #[must_use]
    pub const fn increment(&self) -> Self {
        Self {
            fixed: self.fixed,
            monotonic: self.monotonic + 1,
        }
    }
}

impl Ord for ViewId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.monotonic
            .cmp(&other.monotonic)
            .then(self.fixed.cmp(&other.fixed))
    }
}

impl PartialOrd for ViewId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fixed, self.monotonic)
    }
}

/// Identifier of one process attached to a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(String);

impl MemberId {
    /// Build a member id from the transport node id and the process id
    #[must_use]
    pub fn new(node_id: u64, pid: u32) -> Self {
        Self(TransportMember::new(node_id, pid).to_string())
    }

    /// String form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<TransportMember> for MemberId {
    fn from(member: TransportMember) -> Self {
        Self::new(member.node_id, member.pid)
    }
}

impl From<&TransportMember> for MemberId {
    fn from(member: &TransportMember) -> Self {
        Self::from(*member)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical name of a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(String);

impl GroupId {
    /// Create a group id
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Group name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for GroupId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_keeps_fixed_part() {
        let id = ViewId::new(1_700_000_000, 4);
        let next = id.increment();

        assert_eq!(next.fixed_part(), 1_700_000_000);
        assert_eq!(next.monotonic_part(), 5);
        // The original is untouched
        assert_eq!(id.monotonic_part(), 4);
    }

    #[test]
    fn test_ordering_is_monotonic_first() {
        let older_lineage_ahead = ViewId::new(100, 7);
        let newer_lineage_behind = ViewId::new(200, 3);

        assert!(older_lineage_ahead > newer_lineage_behind);
        assert!(ViewId::new(1, 3) < ViewId::new(2, 3));
        assert_eq!(ViewId::new(5, 5).cmp(&ViewId::new(5, 5)), Ordering::Equal);
    }

    #[test]
    fn test_view_id_string_form() {
        assert_eq!(ViewId::new(42, 7).to_string(), "42:7");
    }

    #[test]
    fn test_founding_starts_at_zero() {
        let id = ViewId::founding();
        assert_eq!(id.monotonic_part(), 0);
        assert!(id.fixed_part() > 0);
    }

    #[test]
    fn test_member_id_matches_transport_member() {
        let member = TransportMember::new(0x2a, 1234);

        assert_eq!(MemberId::from(member), MemberId::new(0x2a, 1234));
        assert_eq!(MemberId::new(0x2a, 1234).as_str(), "2a#1234");
    }
}
