//! Status Lattice (C1).
//!
//! Task statuses are totally ordered by the fixed index table below —
//! this table is the contract, not alphabetic or derived ordering. Every
//! comparison in the rest of the crate goes through `Status::index` (or
//! the `Ord` impl it backs) so the ordering lives in exactly one place.

use serde::{Deserialize, Serialize};

/// A task's position in the lifecycle.
///
/// Order matters: `derive(PartialOrd, Ord)` on the enum would reflect
/// declaration order, which happens to equal the spec's table here, but
/// the explicit `index`/`Ord` impl below is kept so a future reordering
/// of the variants (e.g. for a different `Debug` layout) can't silently
/// change the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Runahead,
    Waiting,
    Held,
    Queued,
    Ready,
    Expired,
    SubmitFailed,
    SubmitRetrying,
    Submitted,
    Retrying,
    Running,
    Failed,
    Succeeded,
}

const ORDER: [Status; 13] = [
    Status::Runahead,
    Status::Waiting,
    Status::Held,
    Status::Queued,
    Status::Ready,
    Status::Expired,
    Status::SubmitFailed,
    Status::SubmitRetrying,
    Status::Submitted,
    Status::Retrying,
    Status::Running,
    Status::Failed,
    Status::Succeeded,
];

impl Status {
    /// All statuses in lattice order.
    pub const fn all() -> &'static [Status; 13] {
        &ORDER
    }

    /// The fixed lattice index. Smaller is "earlier" in the lifecycle.
    pub const fn index(self) -> usize {
        match self {
            Status::Runahead => 0,
            Status::Waiting => 1,
            Status::Held => 2,
            Status::Queued => 3,
            Status::Ready => 4,
            Status::Expired => 5,
            Status::SubmitFailed => 6,
            Status::SubmitRetrying => 7,
            Status::Submitted => 8,
            Status::Retrying => 9,
            Status::Running => 10,
            Status::Failed => 11,
            Status::Succeeded => 12,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Runahead => "runahead",
            Status::Waiting => "waiting",
            Status::Held => "held",
            Status::Queued => "queued",
            Status::Ready => "ready",
            Status::Expired => "expired",
            Status::SubmitFailed => "submit-failed",
            Status::SubmitRetrying => "submit-retrying",
            Status::Submitted => "submitted",
            Status::Retrying => "retrying",
            Status::Running => "running",
            Status::Failed => "failed",
            Status::Succeeded => "succeeded",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        ORDER.iter().copied().find(|st| st.as_str() == s)
    }

    /// `self <= other` in lattice order.
    pub fn status_leq(self, other: Status) -> bool {
        self.index() <= other.index()
    }

    /// `self >= other` in lattice order.
    pub fn status_geq(self, other: Status) -> bool {
        self.index() >= other.index()
    }

    /// `self > other` in lattice order.
    pub fn is_gt(self, other: Status) -> bool {
        self.index() > other.index()
    }

    pub const fn is_active(self) -> bool {
        matches!(self, Status::Submitted | Status::Running)
    }

    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Status::Expired | Status::Succeeded | Status::Failed | Status::SubmitFailed
        )
    }

    pub const fn is_never_active(self) -> bool {
        matches!(
            self,
            Status::Runahead | Status::Waiting | Status::Queued | Status::Ready
        )
    }

    pub const fn is_to_be_active(self) -> bool {
        matches!(
            self,
            Status::Queued | Status::Ready | Status::SubmitRetrying | Status::Retrying
        )
    }

    pub const fn can_reset_to(self) -> bool {
        matches!(
            self,
            Status::Submitted
                | Status::SubmitFailed
                | Status::Running
                | Status::Waiting
                | Status::Expired
                | Status::Succeeded
                | Status::Failed
        )
    }

    pub const fn is_triggerable(self) -> bool {
        matches!(
            self,
            Status::Waiting
                | Status::Held
                | Status::Queued
                | Status::Expired
                | Status::SubmitFailed
                | Status::SubmitRetrying
                | Status::Succeeded
                | Status::Failed
                | Status::Retrying
        )
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Status {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index().cmp(&other.index())
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_order_matches_spec_table() {
        let expected = [
            "runahead",
            "waiting",
            "held",
            "queued",
            "ready",
            "expired",
            "submit-failed",
            "submit-retrying",
            "submitted",
            "retrying",
            "running",
            "failed",
            "succeeded",
        ];
        for (i, name) in expected.iter().enumerate() {
            assert_eq!(ORDER[i].as_str(), *name);
            assert_eq!(ORDER[i].index(), i);
        }
    }

    #[test]
    fn comparisons_use_index_not_alphabetic_order() {
        // "running" < "waiting" alphabetically, but running is far later
        // in the lattice. Assert the lattice wins.
        assert!(Status::Waiting.status_leq(Status::Running));
        assert!(Status::Running.is_gt(Status::Waiting));
    }

    #[test]
    fn classification_sets_are_disjoint_where_spec_implies() {
        assert!(Status::Submitted.is_active());
        assert!(!Status::Submitted.is_never_active());
        assert!(Status::Succeeded.is_final());
        assert!(!Status::Succeeded.is_active());
    }

    #[test]
    fn from_str_round_trips_as_str() {
        for s in Status::all() {
            assert_eq!(Status::from_str(s.as_str()), Some(*s));
        }
        assert_eq!(Status::from_str("bogus"), None);
    }

    proptest::proptest! {
        #[test]
        fn ord_is_consistent_with_index(a in 0usize..13, b in 0usize..13) {
            let sa = ORDER[a];
            let sb = ORDER[b];
            proptest::prop_assert_eq!(sa.index().cmp(&sb.index()), sa.cmp(&sb));
        }
    }
}
