//! Per-pair conflict resolution between direct grants and permission groups
//!
//! Rules, applied in order until one decides:
//! 1. Direct grants outrank every group; a direct DENY beats everything.
//! 2. Override groups beat plain groups; within a tier the higher priority
//!    wins, then the more recently assigned group (larger ordinal). Groups
//!    of an inherited role count as assigned before those of the role
//!    inheriting it.
//! 3. If nothing mentions the pair, the caller-supplied fallback applies.

use super::decision::{ContributingRule, Decision, Outcome, Rank};
use crate::error::ResolutionWarning;
use crate::types::{Permission, PermissionGroup, ResolutionStrategy};
use tracing::warn;

/// A permission held directly by a role in the expanded set
#[derive(Debug, Clone, Copy)]
pub struct DirectGrant<'a> {
    /// Role carrying the grant
    pub role: &'a str,
    pub permission: &'a Permission,
    /// Recency of the role in the expansion; the assigned role is largest
    pub ordinal: usize,
}

/// A permission group reached through the expanded role set
#[derive(Debug, Clone)]
pub struct GroupContribution<'a> {
    /// Role carrying the group
    pub role: &'a str,
    pub group: &'a PermissionGroup,
    /// Resolved member permissions (dangling ids already dropped)
    pub permissions: Vec<&'a Permission>,
    /// Recency; larger means more recently assigned
    pub ordinal: usize,
}

impl GroupContribution<'_> {
    /// Whether the group's resolver makes its entry for this pair an override
    fn effective_override(&self, entry: &Permission) -> bool {
        let resolver = &self.group.resolver;
        resolver.overriding
            || match resolver.strategy {
                ResolutionStrategy::PriorityBased => false,
                ResolutionStrategy::DenyOverrides => entry.is_deny(),
                ResolutionStrategy::AllowOverrides => !entry.is_deny(),
            }
    }

    /// Entry the group puts forward for the pair, if it mentions it
    fn representative(&self, resource: &str, action: &str) -> Option<&'_ Permission> {
        let matching: Vec<&Permission> = self
            .permissions
            .iter()
            .copied()
            .filter(|p| p.matches(resource, action))
            .collect();

        let deny = matching.iter().copied().find(|p| p.is_deny());
        let allow = best_allow(matching.iter().copied());

        match self.group.resolver.strategy {
            ResolutionStrategy::AllowOverrides => allow.or(deny),
            ResolutionStrategy::PriorityBased | ResolutionStrategy::DenyOverrides => deny.or(allow),
        }
    }
}

/// Unconstrained allows first, then the first listed
fn best_allow<'p, I>(permissions: I) -> Option<&'p Permission>
where
    I: Iterator<Item = &'p Permission>,
{
    let allows: Vec<&Permission> = permissions.filter(|p| !p.is_deny()).collect();
    allows
        .iter()
        .copied()
        .find(|p| !p.is_constrained())
        .or_else(|| allows.first().copied())
}

struct Candidate<'c, 'a> {
    contribution: &'c GroupContribution<'a>,
    entry: &'c Permission,
    overriding: bool,
}

impl Candidate<'_, '_> {
    fn rank(&self) -> Rank {
        Rank::group(self.overriding, self.contribution.group.resolver.priority, self.contribution.ordinal)
    }
}

/// Applies the tie-break rules for one `(resource, action)` pair
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    owner_attribute: String,
}

impl ConflictResolver {
    /// `owner_attribute` names the request attribute checked by `own` permissions
    pub fn new(owner_attribute: impl Into<String>) -> Self {
        Self {
            owner_attribute: owner_attribute.into(),
        }
    }

    /// Resolves the pair; `fallback` is returned when no grant or group
    /// mentions it
    ///
    /// The warning reports groups tied on override and priority whose entries
    /// disagree; the tie is still decided by recency.
    pub fn resolve(
        &self,
        resource: &str,
        action: &str,
        groups: &[GroupContribution<'_>],
        direct: &[DirectGrant<'_>],
        fallback: &Outcome,
    ) -> (Outcome, Option<ResolutionWarning>) {
        // Rule 1: direct grants
        let matching: Vec<&DirectGrant> = direct
            .iter()
            .filter(|d| d.permission.matches(resource, action))
            .collect();

        if let Some(deny) = matching.iter().find(|d| d.permission.is_deny()) {
            return (self.direct_outcome(deny), None);
        }
        let allow = matching
            .iter()
            .find(|d| !d.permission.is_constrained())
            .or_else(|| matching.first());
        if let Some(grant) = allow {
            return (self.direct_outcome(grant), None);
        }

        // Rules 2 and 3: competing groups
        let candidates: Vec<Candidate> = groups
            .iter()
            .filter_map(|contribution| {
                contribution.representative(resource, action).map(|entry| Candidate {
                    contribution,
                    entry,
                    overriding: contribution.effective_override(entry),
                })
            })
            .collect();

        let Some(winner) = candidates.iter().max_by_key(|c| c.rank()) else {
            // Rule 4
            return (fallback.clone(), None);
        };

        let winning_rank = winner.rank();
        let warning = self.ambiguity(resource, action, &candidates, winner, winning_rank);

        let outcome = Outcome::new(
            Decision::from_permission(winner.entry, &self.owner_attribute),
            ContributingRule::Group {
                role: winner.contribution.role.to_string(),
                group: winner.contribution.group.id.clone(),
                permission: winner.entry.id.clone(),
                priority: winning_rank.priority,
                overriding: winner.overriding,
            },
            winning_rank,
        );

        (outcome, warning)
    }

    fn direct_outcome(&self, grant: &DirectGrant<'_>) -> Outcome {
        Outcome::new(
            Decision::from_permission(grant.permission, &self.owner_attribute),
            ContributingRule::DirectGrant {
                role: grant.role.to_string(),
                permission: grant.permission.id.clone(),
            },
            Rank::direct(grant.ordinal),
        )
    }

    fn ambiguity(
        &self,
        resource: &str,
        action: &str,
        candidates: &[Candidate<'_, '_>],
        winner: &Candidate<'_, '_>,
        winning_rank: Rank,
    ) -> Option<ResolutionWarning> {
        let tied: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| {
                let rank = c.rank();
                rank.tier == winning_rank.tier && rank.priority == winning_rank.priority
            })
            .collect();

        let disagree = tied
            .iter()
            .any(|c| c.entry.effect != winner.entry.effect || c.entry.is_constrained() != winner.entry.is_constrained());
        if !disagree {
            return None;
        }

        let mut ordered = tied;
        ordered.sort_by_key(|c| c.contribution.ordinal);
        let groups: Vec<String> = ordered.iter().map(|c| c.contribution.group.id.clone()).collect();

        warn!(
            "Groups [{}] tie on {}:{} at priority {}; most recently assigned '{}' wins",
            groups.join(", "),
            resource,
            action,
            winning_rank.priority,
            winner.contribution.group.id
        );

        Some(ResolutionWarning::AmbiguousResolution {
            resource: resource.to_string(),
            action: action.to_string(),
            groups,
            priority: winning_rank.priority,
        })
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new("ownerId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConstraintOperator, Effect};

    fn deny_fallback() -> Outcome {
        Outcome::new(
            Decision::Deny,
            ContributingRule::SystemDefault { effect: Effect::Deny },
            Rank::fallback(0, 0),
        )
    }

    fn contribution<'a>(group: &'a PermissionGroup, perms: &'a [Permission], ordinal: usize) -> GroupContribution<'a> {
        GroupContribution {
            role: "r",
            group,
            permissions: perms.iter().collect(),
            ordinal,
        }
    }

    fn winning_group(outcome: &Outcome) -> &str {
        match &outcome.rule {
            ContributingRule::Group { group, .. } => group.as_str(),
            other => panic!("expected group rule, got {:?}", other),
        }
    }

    #[test]
    fn test_single_group_allows() {
        let g1 = PermissionGroup::new("g1", "Sales").with_priority(1);
        let perms = [Permission::allow("p1", "order", "create")];

        let (outcome, warning) = ConflictResolver::default().resolve(
            "order",
            "create",
            &[contribution(&g1, &perms, 0)],
            &[],
            &deny_fallback(),
        );
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(warning.is_none());
    }

    #[test]
    fn test_higher_priority_wins() {
        let g1 = PermissionGroup::new("g1", "Sales").with_priority(1);
        let g2 = PermissionGroup::new("g2", "Restrict").with_priority(2);
        let allow = [Permission::allow("p1", "order", "delete")];
        let deny = [Permission::deny("p2", "order", "delete")];

        let (outcome, _) = ConflictResolver::default().resolve(
            "order",
            "delete",
            &[contribution(&g1, &allow, 1), contribution(&g2, &deny, 0)],
            &[],
            &deny_fallback(),
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert_eq!(winning_group(&outcome), "g2");
    }

    #[test]
    fn test_override_beats_priority() {
        let g1 = PermissionGroup::new("g1", "Broad").with_priority(5);
        let g2 = PermissionGroup::new("g2", "Lockdown").with_priority(1).overriding();
        let allow = [Permission::allow("p1", "x", "y")];
        let deny = [Permission::deny("p2", "x", "y")];

        let (outcome, _) = ConflictResolver::default().resolve(
            "x",
            "y",
            &[contribution(&g1, &allow, 0), contribution(&g2, &deny, 1)],
            &[],
            &deny_fallback(),
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert!(outcome.rank.is_override());
    }

    #[test]
    fn test_tie_goes_to_most_recent_and_warns() {
        let g1 = PermissionGroup::new("g1", "Old").with_priority(3);
        let g2 = PermissionGroup::new("g2", "New").with_priority(3);
        let allow = [Permission::allow("p1", "x", "y")];
        let deny = [Permission::deny("p2", "x", "y")];

        let (outcome, warning) = ConflictResolver::default().resolve(
            "x",
            "y",
            &[contribution(&g1, &deny, 0), contribution(&g2, &allow, 1)],
            &[],
            &deny_fallback(),
        );
        assert_eq!(outcome.decision, Decision::Allow);
        assert_eq!(winning_group(&outcome), "g2");
        assert_eq!(
            warning,
            Some(ResolutionWarning::AmbiguousResolution {
                resource: "x".to_string(),
                action: "y".to_string(),
                groups: vec!["g1".to_string(), "g2".to_string()],
                priority: 3,
            })
        );
    }

    #[test]
    fn test_agreeing_tie_is_silent() {
        let g1 = PermissionGroup::new("g1", "A");
        let g2 = PermissionGroup::new("g2", "B");
        let allow = [Permission::allow("p1", "x", "y")];

        let (_, warning) = ConflictResolver::default().resolve(
            "x",
            "y",
            &[contribution(&g1, &allow, 0), contribution(&g2, &allow, 1)],
            &[],
            &deny_fallback(),
        );
        assert!(warning.is_none());
    }

    #[test]
    fn test_direct_deny_beats_override_group() {
        let g = PermissionGroup::new("g", "Admin").with_priority(100).overriding();
        let allow = [Permission::allow("p1", "user", "delete")];
        let deny = Permission::deny("p2", "user", "delete");

        let (outcome, _) = ConflictResolver::default().resolve(
            "user",
            "delete",
            &[contribution(&g, &allow, 0)],
            &[DirectGrant { role: "intern", permission: &deny, ordinal: 1 }],
            &deny_fallback(),
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert!(matches!(outcome.rule, ContributingRule::DirectGrant { ref role, .. } if role == "intern"));
    }

    #[test]
    fn test_direct_allow_beats_group_deny() {
        let g = PermissionGroup::new("g", "Restrict").with_priority(10).overriding();
        let deny = [Permission::deny("p1", "report", "view")];
        let allow = Permission::allow("p2", "report", "view");

        let (outcome, _) = ConflictResolver::default().resolve(
            "report",
            "view",
            &[contribution(&g, &deny, 0)],
            &[DirectGrant { role: "analyst", permission: &allow, ordinal: 0 }],
            &deny_fallback(),
        );
        assert_eq!(outcome.decision, Decision::Allow);
    }

    #[test]
    fn test_unmentioned_pair_uses_fallback() {
        let g = PermissionGroup::new("g", "Sales");
        let perms = [Permission::allow("p1", "order", "create")];

        let fallback = deny_fallback();
        let (outcome, _) = ConflictResolver::default().resolve(
            "report",
            "export",
            &[contribution(&g, &perms, 0)],
            &[],
            &fallback,
        );
        assert_eq!(outcome, fallback);
    }

    #[test]
    fn test_deny_overrides_strategy() {
        let broad = PermissionGroup::new("broad", "Broad").with_priority(9).overriding();
        let guard = PermissionGroup::new("guard", "Guard")
            .with_priority(10)
            .with_strategy(ResolutionStrategy::DenyOverrides);
        let allow = [Permission::allow("p1", "refund", "issue")];
        let deny = [Permission::deny("p2", "refund", "issue")];

        let (outcome, _) = ConflictResolver::default().resolve(
            "refund",
            "issue",
            &[contribution(&broad, &allow, 1), contribution(&guard, &deny, 0)],
            &[],
            &deny_fallback(),
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert_eq!(winning_group(&outcome), "guard");
    }

    #[test]
    fn test_allow_overrides_inside_group() {
        let g = PermissionGroup::new("g", "Mixed").with_strategy(ResolutionStrategy::AllowOverrides);
        let perms = [Permission::deny("p1", "x", "y"), Permission::allow("p2", "x", "y")];

        let (outcome, _) =
            ConflictResolver::default().resolve("x", "y", &[contribution(&g, &perms, 0)], &[], &deny_fallback());
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(outcome.rank.is_override());

        let g = PermissionGroup::new("g", "Mixed");
        let (outcome, _) =
            ConflictResolver::default().resolve("x", "y", &[contribution(&g, &perms, 0)], &[], &deny_fallback());
        assert_eq!(outcome.decision, Decision::Deny);
    }

    #[test]
    fn test_constrained_winner() {
        let g = PermissionGroup::new("g", "Discounts");
        let perms = [Permission::allow("p1", "order", "discount").with_constraint(
            "discount",
            ConstraintOperator::Lte,
            15,
        )];

        let (outcome, _) = ConflictResolver::default().resolve(
            "order",
            "discount",
            &[contribution(&g, &perms, 0)],
            &[],
            &deny_fallback(),
        );
        assert!(outcome.decision.is_constrained());
    }
}
