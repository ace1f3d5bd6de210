//! Permission conflict resolution
//!
//! Decides a single `(resource, action)` pair from the direct grants and
//! permission groups of an expanded role set, then combines the outcomes of
//! every qualifying role assignment.

mod decision;
mod merge;
mod resolver;

pub use decision::{Constraint, ContributingRule, Decision, Outcome, Rank, Tier};
pub use merge::merge_outcomes;
pub use resolver::{ConflictResolver, DirectGrant, GroupContribution};
