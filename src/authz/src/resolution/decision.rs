//! Decision, constraint and contributing-rule types

use crate::types::{AttributeConstraint, AttributeContext, Effect, GroupId, Permission, PermissionId, PermissionQualifier, RoleId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A condition an ALLOW depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Operator applied to a request attribute
    Attribute(AttributeConstraint),
    /// The request attribute must equal the principal's id
    Owner { attribute: String },
}

impl Constraint {
    /// Constraints a permission record carries
    pub fn for_permission(permission: &Permission, owner_attribute: &str) -> Vec<Constraint> {
        let mut constraints = Vec::new();
        if permission.scope == Some(PermissionQualifier::Own) {
            constraints.push(Constraint::Owner {
                attribute: owner_attribute.to_string(),
            });
        }
        if let Some(c) = &permission.constraint {
            constraints.push(Constraint::Attribute(c.clone()));
        }
        constraints
    }

    pub fn is_satisfied(&self, principal_id: &str, attributes: &AttributeContext) -> bool {
        match self {
            Constraint::Attribute(c) => c.is_satisfied_by(attributes),
            Constraint::Owner { attribute } => {
                matches!(attributes.get(attribute), Some(Value::String(owner)) if owner == principal_id)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Attribute(c) => write!(f, "{}", c),
            Constraint::Owner { attribute } => write!(f, "{} == principal", attribute),
        }
    }
}

/// Outcome of resolving one `(resource, action)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    /// ALLOW once every constraint of at least one set holds
    ///
    /// A winning permission yields a single set; merging assignments can
    /// add more, one per constrained grant.
    AllowWithConstraint {
        #[serde(rename = "anyOf")]
        any_of: Vec<Vec<Constraint>>,
    },
}

impl Decision {
    /// Decision produced by a winning permission record
    pub fn from_permission(permission: &Permission, owner_attribute: &str) -> Self {
        if permission.is_deny() {
            return Decision::Deny;
        }
        let constraints = Constraint::for_permission(permission, owner_attribute);
        if constraints.is_empty() {
            Decision::Allow
        } else {
            Decision::AllowWithConstraint {
                any_of: vec![constraints],
            }
        }
    }

    pub fn from_effect(effect: Effect) -> Self {
        match effect {
            Effect::Allow => Decision::Allow,
            Effect::Deny => Decision::Deny,
        }
    }

    /// ALLOW when any one of `sets` holds
    ///
    /// An empty set is unconditional and yields ALLOW; repeated sets are
    /// dropped; no sets at all yields DENY.
    pub fn any_of<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = Vec<Constraint>>,
    {
        let mut any_of: Vec<Vec<Constraint>> = Vec::new();
        for set in sets {
            if set.is_empty() {
                return Decision::Allow;
            }
            if !any_of.contains(&set) {
                any_of.push(set);
            }
        }

        if any_of.is_empty() {
            Decision::Deny
        } else {
            Decision::AllowWithConstraint { any_of }
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Decision::Deny)
    }

    pub fn is_constrained(&self) -> bool {
        matches!(self, Decision::AllowWithConstraint { .. })
    }

    /// Alternative constraint sets; empty unless constrained
    pub fn constraint_sets(&self) -> &[Vec<Constraint>] {
        match self {
            Decision::AllowWithConstraint { any_of } => any_of,
            _ => &[],
        }
    }

    /// Final boolean for a request; some set must hold in full
    pub fn evaluate(&self, principal_id: &str, attributes: &AttributeContext) -> bool {
        match self {
            Decision::Allow => true,
            Decision::Deny => false,
            Decision::AllowWithConstraint { any_of } => any_of
                .iter()
                .any(|set| set.iter().all(|c| c.is_satisfied(principal_id, attributes))),
        }
    }

    /// ALLOW > ALLOW_WITH_CONSTRAINT > DENY
    pub(crate) fn permissiveness(&self) -> u8 {
        match self {
            Decision::Allow => 2,
            Decision::AllowWithConstraint { .. } => 1,
            Decision::Deny => 0,
        }
    }

    /// Compares two single-set constrained decisions by how much they let
    /// through; `None` when either has several sets or they are not comparable
    pub(crate) fn looseness(&self, other: &Decision) -> Option<Ordering> {
        let ([a], [b]) = (self.constraint_sets(), other.constraint_sets()) else {
            return None;
        };
        set_looseness(a, b)
    }
}

/// Compares two constraint sets by how much they let through
///
/// Only single attribute bounds on the same attribute in the same direction
/// are comparable.
pub(crate) fn set_looseness(a: &[Constraint], b: &[Constraint]) -> Option<Ordering> {
    if a == b {
        return Some(Ordering::Equal);
    }

    let ([Constraint::Attribute(x)], [Constraint::Attribute(y)]) = (a, b) else {
        return None;
    };
    if x.attribute != y.attribute {
        return None;
    }
    let (xv, yv) = (x.value.as_f64()?, y.value.as_f64()?);

    if x.operator.is_upper_bound() && y.operator.is_upper_bound() {
        // Higher ceiling lets more through; `<=` beats `<` at the same value
        Some(xv.partial_cmp(&yv)?.then_with(|| inclusive(x).cmp(&inclusive(y))))
    } else if x.operator.is_lower_bound() && y.operator.is_lower_bound() {
        Some(yv.partial_cmp(&xv)?.then_with(|| inclusive(x).cmp(&inclusive(y))))
    } else {
        None
    }
}

fn inclusive(c: &AttributeConstraint) -> bool {
    use crate::types::ConstraintOperator::{Gte, Lte};
    matches!(c.operator, Lte | Gte)
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "ALLOW"),
            Decision::Deny => write!(f, "DENY"),
            Decision::AllowWithConstraint { any_of } => {
                let sets: Vec<String> = any_of
                    .iter()
                    .map(|set| {
                        let parts: Vec<String> = set.iter().map(|c| c.to_string()).collect();
                        if any_of.len() > 1 && parts.len() > 1 {
                            format!("({})", parts.join(" && "))
                        } else {
                            parts.join(" && ")
                        }
                    })
                    .collect();
                write!(f, "ALLOW_WITH_CONSTRAINT({})", sets.join(" || "))
            }
        }
    }
}

/// What produced a decision, for `explain` and audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ContributingRule {
    SuperAdmin,
    DirectGrant {
        role: RoleId,
        permission: PermissionId,
    },
    Group {
        role: RoleId,
        group: GroupId,
        permission: PermissionId,
        priority: i32,
        overriding: bool,
    },
    RoleFallback {
        role: RoleId,
        effect: Effect,
    },
    GroupFallback {
        role: RoleId,
        group: GroupId,
        effect: Effect,
    },
    SystemDefault {
        effect: Effect,
    },
    NoCoveringAssignment,
    FailClosed {
        reason: String,
    },
}

impl ContributingRule {
    /// Id of the record named by the rule (group, or role for direct grants
    /// and role fallbacks)
    pub fn source(&self) -> Option<&str> {
        match self {
            ContributingRule::DirectGrant { role, .. } | ContributingRule::RoleFallback { role, .. } => Some(role.as_str()),
            ContributingRule::Group { group, .. } | ContributingRule::GroupFallback { group, .. } => Some(group.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ContributingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContributingRule::SuperAdmin => write!(f, "super-admin bypass"),
            ContributingRule::DirectGrant { role, permission } => {
                write!(f, "direct grant '{}' on role '{}'", permission, role)
            }
            ContributingRule::Group { role, group, permission, priority, overriding } => write!(
                f,
                "permission '{}' in group '{}' (priority {}{}) via role '{}'",
                permission,
                group,
                priority,
                if *overriding { ", override" } else { "" },
                role
            ),
            ContributingRule::RoleFallback { role, effect } => write!(f, "fallback {} of role '{}'", effect, role),
            ContributingRule::GroupFallback { role, group, effect } => {
                write!(f, "fallback {} of group '{}' via role '{}'", effect, group, role)
            }
            ContributingRule::SystemDefault { effect } => write!(f, "system default {}", effect),
            ContributingRule::NoCoveringAssignment => write!(f, "no role assignment covers the requested scope"),
            ContributingRule::FailClosed { reason } => write!(f, "fail closed: {}", reason),
        }
    }
}

/// Competition tier of an outcome, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Nothing mentioned the pair
    Fallback,
    Group,
    OverrideGroup,
    Direct,
}

/// Ordering key of an outcome: tier, then priority, then recency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank {
    pub tier: Tier,
    pub priority: i32,
    pub ordinal: usize,
}

impl Rank {
    pub fn direct(ordinal: usize) -> Self {
        Self {
            tier: Tier::Direct,
            priority: i32::MAX,
            ordinal,
        }
    }

    pub fn group(overriding: bool, priority: i32, ordinal: usize) -> Self {
        Self {
            tier: if overriding { Tier::OverrideGroup } else { Tier::Group },
            priority,
            ordinal,
        }
    }

    pub fn fallback(priority: i32, ordinal: usize) -> Self {
        Self {
            tier: Tier::Fallback,
            priority,
            ordinal,
        }
    }

    /// Direct grants and override groups
    pub fn is_override(&self) -> bool {
        matches!(self.tier, Tier::Direct | Tier::OverrideGroup)
    }

    pub fn is_fallback(&self) -> bool {
        self.tier == Tier::Fallback
    }
}

/// A decision with the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub decision: Decision,
    pub rule: ContributingRule,
    pub rank: Rank,
}

impl Outcome {
    pub fn new(decision: Decision, rule: ContributingRule, rank: Rank) -> Self {
        Self { decision, rule, rank }
    }

    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self::new(
            Decision::Deny,
            ContributingRule::FailClosed { reason: reason.into() },
            Rank::fallback(0, 0),
        )
    }

    pub fn no_covering_assignment() -> Self {
        Self::new(Decision::Deny, ContributingRule::NoCoveringAssignment, Rank::fallback(0, 0))
    }

    pub fn super_admin() -> Self {
        Self::new(Decision::Allow, ContributingRule::SuperAdmin, Rank::direct(0))
    }
}
