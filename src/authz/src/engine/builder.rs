//! Effective permission set builder
//!
//! Filters a principal's assignments by scope, expands each assigned role,
//! resolves every mentioned `(resource, action)` pair per assignment and
//! merges the per-assignment outcomes.

use crate::config::EngineConfig;
use crate::error::{ReferenceKind, ResolutionWarning, Result};
use crate::limits::{LimitAggregator, LimitMergePolicy, LimitSet};
use crate::resolution::{
    merge_outcomes, ConflictResolver, ContributingRule, Decision, DirectGrant, GroupContribution, Outcome, Rank,
};
use crate::scope::{ScopeRef, ScopeResolver};
use crate::snapshot::ConfigSnapshot;
use crate::types::{AttributeContext, Effect, Principal, PrincipalId, Role, RoleAssignment, RoleId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// `(resource, action)` pair, written `resource:action`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for PermissionKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((resource, action)) if !resource.is_empty() && !action.is_empty() => {
                Ok(Self::new(resource, action))
            }
            _ => Err(format!("expected 'resource:action', got '{}'", s)),
        }
    }
}

impl Serialize for PermissionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PermissionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Final decision for one pair and the rule behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub decision: Decision,
    pub rule: ContributingRule,
}

impl From<Outcome> for EffectivePermission {
    fn from(outcome: Outcome) -> Self {
        Self {
            decision: outcome.decision,
            rule: outcome.rule,
        }
    }
}

/// Decision map of one principal at one scope context
///
/// Pairs absent from `entries` resolve to `fallback`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermissions {
    pub principal: PrincipalId,
    pub scope: ScopeRef,
    /// Snapshot version the map was computed from
    pub version: u64,
    pub entries: BTreeMap<PermissionKey, EffectivePermission>,
    pub fallback: EffectivePermission,
    pub warnings: Vec<ResolutionWarning>,

    /// Roles of the covering assignments, used for cache invalidation
    #[serde(skip)]
    pub roots: HashSet<RoleId>,
}

impl EffectivePermissions {
    fn new(principal: &Principal, scope: &ScopeRef, version: u64, fallback: Outcome) -> Self {
        Self {
            principal: principal.id.clone(),
            scope: scope.clone(),
            version,
            entries: BTreeMap::new(),
            fallback: fallback.into(),
            warnings: Vec::new(),
            roots: HashSet::new(),
        }
    }

    /// Map that denies everything, for a resolution that failed
    pub fn fail_closed(principal: &Principal, scope: &ScopeRef, version: u64, reason: impl Into<String>) -> Self {
        Self::new(principal, scope, version, Outcome::fail_closed(reason))
    }

    /// Entry for the pair, or the fallback
    pub fn get(&self, resource: &str, action: &str) -> &EffectivePermission {
        self.entries
            .get(&PermissionKey::new(resource, action))
            .unwrap_or(&self.fallback)
    }

    /// Final boolean for a request, constraints evaluated against `attributes`
    pub fn is_allowed(&self, resource: &str, action: &str, attributes: &AttributeContext) -> bool {
        self.get(resource, action).decision.evaluate(&self.principal, attributes)
    }

    pub fn is_fail_closed(&self) -> bool {
        matches!(self.fallback.rule, ContributingRule::FailClosed { .. })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merged limits of every qualifying role
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedLimits {
    pub limits: LimitSet,
    pub warnings: Vec<ResolutionWarning>,
}

/// One covering assignment after expansion, borrowing from the snapshot
struct ExpandedAssignment<'s> {
    roles: Vec<&'s Role>,
    direct: Vec<DirectGrant<'s>>,
    groups: Vec<GroupContribution<'s>>,
    fallback: Outcome,
}

impl<'s> ExpandedAssignment<'s> {
    fn mentioned_pairs(&self) -> impl Iterator<Item = (&'s str, &'s str)> + '_ {
        let direct = self.direct.iter().map(|d| d.permission);
        let grouped = self.groups.iter().flat_map(|g| g.permissions.iter().copied());
        direct
            .chain(grouped)
            .map(|p| (p.resource.as_str(), p.action.as_str()))
    }
}

/// Computes effective permissions and limits from a snapshot
///
/// Holds no snapshot itself; every call reads exactly the snapshot passed
/// in, so a resolution never mixes two versions.
pub struct EffectivePermissionBuilder {
    scopes: Arc<ScopeResolver>,
    resolver: ConflictResolver,
    max_depth: usize,
    default_effect: Effect,
    limit_policy: LimitMergePolicy,
}

impl EffectivePermissionBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            scopes: Arc::new(ScopeResolver::with_ttl(config.cache_ttl())),
            resolver: ConflictResolver::new(config.owner_attribute.clone()),
            max_depth: config.max_traversal_depth,
            default_effect: config.default_effect,
            limit_policy: config.limit_merge.clone(),
        }
    }

    /// Share an existing scope resolver (and its ancestry cache)
    pub fn with_scope_resolver(mut self, scopes: Arc<ScopeResolver>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn scope_resolver(&self) -> &ScopeResolver {
        &self.scopes
    }

    /// Assignments whose scope covers `scope`
    pub fn covering_assignments<'p>(
        &self,
        snapshot: &ConfigSnapshot,
        principal: &'p Principal,
        scope: &ScopeRef,
    ) -> Vec<&'p RoleAssignment> {
        principal
            .assignments
            .iter()
            .filter(|a| self.scopes.covers(&a.scope, scope, snapshot.directory()))
            .collect()
    }

    /// Decision map for `principal` at `scope`
    ///
    /// # Errors
    ///
    /// Inheritance cycles and depth overruns in any covering assignment's
    /// role graph. Missing records only produce warnings.
    pub fn build(&self, snapshot: &ConfigSnapshot, principal: &Principal, scope: &ScopeRef) -> Result<EffectivePermissions> {
        if principal.is_super_admin() {
            debug!("Super-admin '{}' bypasses resolution", principal.id);
            return Ok(EffectivePermissions::new(principal, scope, snapshot.version(), Outcome::super_admin()));
        }

        let covering = self.covering_assignments(snapshot, principal, scope);
        let mut warnings = Vec::new();
        let mut roots = HashSet::with_capacity(covering.len());
        let mut expanded = Vec::with_capacity(covering.len());

        for assignment in &covering {
            roots.insert(assignment.role.clone());
            expanded.push(self.expand_assignment(snapshot, &principal.id, assignment, &mut warnings)?);
        }

        let fallbacks: Vec<Outcome> = expanded.iter().map(|e| e.fallback.clone()).collect();
        let (fallback, _) = merge_outcomes("*", "*", &fallbacks);

        let pairs: BTreeSet<(&str, &str)> = expanded.iter().flat_map(|e| e.mentioned_pairs()).collect();

        let mut permissions = EffectivePermissions::new(principal, scope, snapshot.version(), fallback);
        for (resource, action) in pairs {
            let outcome = self.resolve_across(&expanded, resource, action, &mut warnings);
            permissions.entries.insert(PermissionKey::new(resource, action), outcome.into());
        }

        permissions.warnings = dedup(warnings);
        permissions.roots = roots;

        debug!(
            "Built {} effective permissions for '{}' at {} from {} of {} assignments (v{})",
            permissions.len(),
            principal.id,
            scope,
            covering.len(),
            principal.assignments.len(),
            snapshot.version()
        );

        Ok(permissions)
    }

    /// Merged limits of every role reachable from the covering assignments
    pub fn limits(&self, snapshot: &ConfigSnapshot, principal: &Principal, scope: &ScopeRef) -> Result<AggregatedLimits> {
        if principal.is_super_admin() {
            return Ok(AggregatedLimits {
                limits: LimitSet::unrestricted(),
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut aggregator = LimitAggregator::new(&self.limit_policy);

        for assignment in self.covering_assignments(snapshot, principal, scope) {
            let expanded = self.expand_assignment(snapshot, &principal.id, assignment, &mut warnings)?;
            for role in expanded.roles {
                if seen.insert(role.id.as_str()) {
                    aggregator.add(&role.limits);
                }
            }
        }

        let (limits, limit_warnings) = aggregator.finish();
        warnings.extend(limit_warnings);

        Ok(AggregatedLimits {
            limits,
            warnings: dedup(warnings),
        })
    }

    fn resolve_across(
        &self,
        expanded: &[ExpandedAssignment<'_>],
        resource: &str,
        action: &str,
        warnings: &mut Vec<ResolutionWarning>,
    ) -> Outcome {
        let mut outcomes = Vec::with_capacity(expanded.len());
        for assignment in expanded {
            let (outcome, warning) =
                self.resolver
                    .resolve(resource, action, &assignment.groups, &assignment.direct, &assignment.fallback);
            warnings.extend(warning);
            outcomes.push(outcome);
        }

        let (merged, warning) = merge_outcomes(resource, action, &outcomes);
        warnings.extend(warning);
        merged
    }

    fn expand_assignment<'s>(
        &self,
        snapshot: &'s ConfigSnapshot,
        principal: &str,
        assignment: &RoleAssignment,
        warnings: &mut Vec<ResolutionWarning>,
    ) -> Result<ExpandedAssignment<'s>> {
        let Some(root) = snapshot.role(&assignment.role) else {
            // A deleted role contributes only the system default
            warn!("Principal '{}' is assigned missing role '{}'", principal, assignment.role);
            warnings.push(ResolutionWarning::DanglingReference {
                owner: principal.to_string(),
                kind: ReferenceKind::Role,
                missing_id: assignment.role.clone(),
            });
            return Ok(ExpandedAssignment {
                roles: Vec::new(),
                direct: Vec::new(),
                groups: Vec::new(),
                fallback: self.system_default(),
            });
        };

        let expansion = snapshot.graph().expand(&root.id, self.max_depth)?;
        for warning in &expansion.dangling {
            warn!("{}", warning);
        }
        warnings.extend(expansion.dangling);

        let roles: Vec<&'s Role> = expansion.order.iter().filter_map(|id| snapshot.role(id)).collect();
        let mut direct = Vec::new();
        let mut groups: Vec<GroupContribution<'s>> = Vec::new();
        let mut seen_groups: HashSet<&'s str> = HashSet::new();
        // (depth position, index within the role) of each group, for recency
        let mut placement: Vec<(usize, usize)> = Vec::new();

        for (position, &role) in roles.iter().enumerate() {
            for id in &role.permissions {
                match snapshot.permission(id) {
                    Some(permission) => direct.push(DirectGrant {
                        role: role.id.as_str(),
                        permission,
                        ordinal: roles.len() - 1 - position,
                    }),
                    None => warnings.push(dangling(&role.id, ReferenceKind::Permission, id)),
                }
            }

            for (index, id) in role.permission_groups.iter().enumerate() {
                let Some(group) = snapshot.group(id) else {
                    warnings.push(dangling(&role.id, ReferenceKind::Group, id));
                    continue;
                };
                if !seen_groups.insert(group.id.as_str()) {
                    continue;
                }

                let mut permissions = Vec::with_capacity(group.permissions.len());
                for permission_id in &group.permissions {
                    match snapshot.permission(permission_id) {
                        Some(permission) => permissions.push(permission),
                        None => warnings.push(dangling(&group.id, ReferenceKind::Permission, permission_id)),
                    }
                }

                placement.push((position, index));
                groups.push(GroupContribution {
                    role: role.id.as_str(),
                    group,
                    permissions,
                    ordinal: 0,
                });
            }
        }

        // Inherited roles rank as assigned earlier than the roles inheriting
        // them; the assigned role's own groups are the most recent.
        let mut recency: Vec<usize> = (0..groups.len()).collect();
        recency.sort_by_key(|&i| (Reverse(placement[i].0), placement[i].1));
        for (ordinal, i) in recency.into_iter().enumerate() {
            groups[i].ordinal = ordinal;
        }

        let fallback = self.fallback_for(root, &groups);

        Ok(ExpandedAssignment {
            roles,
            direct,
            groups,
            fallback,
        })
    }

    /// Role fallback, else the fallback of the strongest group, else the
    /// system default
    fn fallback_for(&self, root: &Role, groups: &[GroupContribution<'_>]) -> Outcome {
        if let Some(effect) = root.fallback {
            return Outcome::new(
                Decision::from_effect(effect),
                ContributingRule::RoleFallback {
                    role: root.id.clone(),
                    effect,
                },
                Rank::fallback(0, 0),
            );
        }

        let strongest = groups.iter().max_by_key(|g| {
            let resolver = &g.group.resolver;
            Rank::group(resolver.overriding, resolver.priority, g.ordinal)
        });

        match strongest {
            Some(top) => {
                let effect = top.group.resolver.fallback;
                Outcome::new(
                    Decision::from_effect(effect),
                    ContributingRule::GroupFallback {
                        role: top.role.to_string(),
                        group: top.group.id.clone(),
                        effect,
                    },
                    Rank::fallback(top.group.resolver.priority, top.ordinal),
                )
            }
            None => self.system_default(),
        }
    }

    fn system_default(&self) -> Outcome {
        Outcome::new(
            Decision::from_effect(self.default_effect),
            ContributingRule::SystemDefault {
                effect: self.default_effect,
            },
            Rank::fallback(0, 0),
        )
    }
}

fn dangling(owner: &str, kind: ReferenceKind, missing: &str) -> ResolutionWarning {
    let warning = ResolutionWarning::DanglingReference {
        owner: owner.to_string(),
        kind,
        missing_id: missing.to_string(),
    };
    warn!("{}", warning);
    warning
}

/// Drops repeated warnings, keeping first occurrences in order
fn dedup(warnings: Vec<ResolutionWarning>) -> Vec<ResolutionWarning> {
    let mut seen = HashSet::new();
    warnings.into_iter().filter(|w| seen.insert(w.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;
    use crate::limits::LimitCategoryKind;
    use crate::scope::{ScopeType, StaticScopeDirectory};
    use crate::snapshot::SnapshotDocument;
    use crate::types::{ConstraintOperator, Permission, PermissionGroup};
    use serde_json::json;

    fn snapshot(
        permissions: Vec<Permission>,
        groups: Vec<PermissionGroup>,
        roles: Vec<Role>,
    ) -> ConfigSnapshot {
        ConfigSnapshot::from_document(SnapshotDocument {
            version: 1,
            permissions,
            permission_groups: groups,
            roles,
            principals: Vec::new(),
            directory: StaticScopeDirectory::new()
                .with_outlet("o1", "b1")
                .with_outlet("o2", "b2")
                .with_business("b1", "c1"),
        })
        .unwrap()
    }

    fn builder() -> EffectivePermissionBuilder {
        EffectivePermissionBuilder::new(&EngineConfig::default())
    }

    fn global(id: &str, role: &str) -> Principal {
        Principal::new(id).with_assignment(RoleAssignment::global(role))
    }

    fn allowed(perms: &EffectivePermissions, resource: &str, action: &str) -> bool {
        perms.is_allowed(resource, action, &AttributeContext::new())
    }

    #[test]
    fn test_single_group_grant() {
        let snap = snapshot(
            vec![Permission::allow("order.create", "order", "create")],
            vec![PermissionGroup::new("g1", "Orders").with_permissions(["order.create"]).with_priority(1)],
            vec![Role::new("clerk", "Clerk", ScopeType::Global).with_groups(["g1"])],
        );

        let perms = builder().build(&snap, &global("u1", "clerk"), &ScopeRef::outlet("o1")).unwrap();
        assert!(allowed(&perms, "order", "create"));
        assert!(!allowed(&perms, "report", "export"));
        assert_eq!(perms.roots, HashSet::from(["clerk".to_string()]));
    }

    #[test]
    fn test_higher_priority_group_wins() {
        let snap = snapshot(
            vec![
                Permission::allow("del.allow", "order", "delete"),
                Permission::deny("del.deny", "order", "delete"),
            ],
            vec![
                PermissionGroup::new("g1", "Allow").with_permissions(["del.allow"]).with_priority(1),
                PermissionGroup::new("g2", "Deny").with_permissions(["del.deny"]).with_priority(2),
            ],
            vec![Role::new("r", "R", ScopeType::Global).with_groups(["g1", "g2"])],
        );

        let perms = builder().build(&snap, &global("u1", "r"), &ScopeRef::global()).unwrap();
        let entry = perms.get("order", "delete");
        assert_eq!(entry.decision, Decision::Deny);
        assert_eq!(entry.rule.source(), Some("g2"));
    }

    #[test]
    fn test_override_beats_priority() {
        let snap = snapshot(
            vec![Permission::allow("xy.allow", "x", "y"), Permission::deny("xy.deny", "x", "y")],
            vec![
                PermissionGroup::new("g1", "Allow").with_permissions(["xy.allow"]).with_priority(5),
                PermissionGroup::new("g2", "Deny").with_permissions(["xy.deny"]).with_priority(1).overriding(),
            ],
            vec![Role::new("r", "R", ScopeType::Global).with_groups(["g1", "g2"])],
        );

        let perms = builder().build(&snap, &global("u1", "r"), &ScopeRef::global()).unwrap();
        assert!(!allowed(&perms, "x", "y"));
    }

    #[test]
    fn test_fallback_chain() {
        let snap = snapshot(
            vec![Permission::allow("a", "order", "read")],
            vec![PermissionGroup::new("g", "G").with_permissions(["a"]).with_fallback(Effect::Allow)],
            vec![
                Role::new("strict", "Strict", ScopeType::Global).with_groups(["g"]).with_fallback(Effect::Deny),
                Role::new("lenient", "Lenient", ScopeType::Global).with_groups(["g"]),
                Role::new("bare", "Bare", ScopeType::Global),
            ],
        );
        let b = builder();

        let strict = b.build(&snap, &global("u", "strict"), &ScopeRef::global()).unwrap();
        assert!(!allowed(&strict, "report", "export"));
        assert!(matches!(strict.fallback.rule, ContributingRule::RoleFallback { .. }));

        let lenient = b.build(&snap, &global("u", "lenient"), &ScopeRef::global()).unwrap();
        assert!(allowed(&lenient, "report", "export"));
        assert!(matches!(lenient.fallback.rule, ContributingRule::GroupFallback { ref group, .. } if group == "g"));

        let bare = b.build(&snap, &global("u", "bare"), &ScopeRef::global()).unwrap();
        assert_eq!(bare.fallback.rule, ContributingRule::SystemDefault { effect: Effect::Deny });
    }

    #[test]
    fn test_inherited_grants_apply() {
        let snap = snapshot(
            vec![Permission::allow("stock.view", "stock", "view")],
            vec![],
            vec![
                Role::new("manager", "Manager", ScopeType::Business).inherits(["cashier"]),
                Role::new("cashier", "Cashier", ScopeType::Outlet).with_permissions(["stock.view"]),
            ],
        );

        let principal = Principal::new("u1").with_assignment(RoleAssignment::new("manager", ScopeRef::business("b1")));
        let perms = builder().build(&snap, &principal, &ScopeRef::outlet("o1")).unwrap();
        assert!(allowed(&perms, "stock", "view"));

        // b1 does not contain o2
        let perms = builder().build(&snap, &principal, &ScopeRef::outlet("o2")).unwrap();
        assert!(!allowed(&perms, "stock", "view"));
        assert_eq!(perms.fallback.rule, ContributingRule::NoCoveringAssignment);
        assert!(perms.roots.is_empty());
    }

    #[test]
    fn test_assigned_role_groups_are_most_recent() {
        let snap = snapshot(
            vec![
                Permission::allow("refund.allow", "order", "refund"),
                Permission::deny("refund.deny", "order", "refund"),
            ],
            vec![
                PermissionGroup::new("refunds", "Refunds").with_permissions(["refund.allow"]).with_priority(2),
                PermissionGroup::new("frozen", "Frozen").with_permissions(["refund.deny"]).with_priority(2),
            ],
            vec![
                Role::new("supervisor", "Supervisor", ScopeType::Global)
                    .inherits(["clerk"])
                    .with_groups(["refunds"]),
                Role::new("clerk", "Clerk", ScopeType::Global).with_groups(["frozen"]),
            ],
        );

        let perms = builder().build(&snap, &global("u1", "supervisor"), &ScopeRef::global()).unwrap();
        let entry = perms.get("order", "refund");
        assert_eq!(entry.decision, Decision::Allow);
        assert_eq!(entry.rule.source(), Some("refunds"));
        assert!(perms.warnings.iter().any(|w| matches!(
            w,
            ResolutionWarning::AmbiguousResolution { groups, .. } if groups == &["frozen", "refunds"]
        )));
    }

    #[test]
    fn test_cycle_is_an_error() {
        let snap = snapshot(
            vec![],
            vec![],
            vec![
                Role::new("a", "A", ScopeType::Global).inherits(["b"]),
                Role::new("b", "B", ScopeType::Global).inherits(["a"]),
            ],
        );

        let err = builder().build(&snap, &global("u", "a"), &ScopeRef::global()).unwrap_err();
        assert!(matches!(err, AuthzError::Configuration { ref cycle } if cycle == &["a", "b", "a"]));
    }

    #[test]
    fn test_dangling_references_are_warnings() {
        let snap = snapshot(
            vec![Permission::allow("p", "order", "create")],
            vec![PermissionGroup::new("g", "G").with_permissions(["p", "ghost.permission"])],
            vec![Role::new("r", "R", ScopeType::Global)
                .with_groups(["g", "deleted.group"])
                .with_permissions(["missing.direct"])
                .inherits(["removed.role"])],
        );

        let perms = builder().build(&snap, &global("u", "r"), &ScopeRef::global()).unwrap();
        assert!(allowed(&perms, "order", "create"));

        let missing: Vec<(&str, ReferenceKind)> = perms
            .warnings
            .iter()
            .filter_map(|w| match w {
                ResolutionWarning::DanglingReference { missing_id, kind, .. } => Some((missing_id.as_str(), *kind)),
                _ => None,
            })
            .collect();
        assert!(missing.contains(&("deleted.group", ReferenceKind::Group)));
        assert!(missing.contains(&("ghost.permission", ReferenceKind::Permission)));
        assert!(missing.contains(&("missing.direct", ReferenceKind::Permission)));
        assert!(missing.contains(&("removed.role", ReferenceKind::Role)));
    }

    #[test]
    fn test_assignment_to_deleted_role() {
        let snap = snapshot(vec![], vec![], vec![]);
        let perms = builder().build(&snap, &global("u", "gone"), &ScopeRef::global()).unwrap();

        assert!(!allowed(&perms, "order", "create"));
        assert_eq!(perms.fallback.rule, ContributingRule::SystemDefault { effect: Effect::Deny });
        assert!(perms.roots.contains("gone"));
        assert_eq!(perms.warnings.len(), 1);
    }

    #[test]
    fn test_most_permissive_across_assignments() {
        let snap = snapshot(
            vec![
                Permission::deny("refund.deny", "order", "refund"),
                Permission::allow("refund.allow", "order", "refund"),
            ],
            vec![
                PermissionGroup::new("restrict", "Restrict").with_permissions(["refund.deny"]).with_priority(9),
                PermissionGroup::new("refunds", "Refunds").with_permissions(["refund.allow"]),
            ],
            vec![
                Role::new("auditor", "Auditor", ScopeType::Global).with_groups(["restrict"]),
                Role::new("supervisor", "Supervisor", ScopeType::Outlet).with_groups(["refunds"]),
            ],
        );

        let principal = Principal::new("u")
            .with_assignment(RoleAssignment::global("auditor"))
            .with_assignment(RoleAssignment::new("supervisor", ScopeRef::outlet("o1")));

        let at_o1 = builder().build(&snap, &principal, &ScopeRef::outlet("o1")).unwrap();
        assert!(allowed(&at_o1, "order", "refund"));

        let at_o2 = builder().build(&snap, &principal, &ScopeRef::outlet("o2")).unwrap();
        assert!(!allowed(&at_o2, "order", "refund"));
    }

    #[test]
    fn test_constrained_grant_needs_attributes() {
        let snap = snapshot(
            vec![
                Permission::allow("discount", "order", "discount").with_constraint("discount", ConstraintOperator::Lte, 15),
                Permission::allow("edit.own", "order", "edit").own(),
            ],
            vec![],
            vec![Role::new("r", "R", ScopeType::Global).with_permissions(["discount", "edit.own"])],
        );
        let perms = builder().build(&snap, &global("u1", "r"), &ScopeRef::global()).unwrap();

        let attrs: AttributeContext = [("discount".to_string(), json!(10))].into_iter().collect();
        assert!(perms.is_allowed("order", "discount", &attrs));
        let attrs: AttributeContext = [("discount".to_string(), json!(20))].into_iter().collect();
        assert!(!perms.is_allowed("order", "discount", &attrs));

        let mine: AttributeContext = [("ownerId".to_string(), json!("u1"))].into_iter().collect();
        let theirs: AttributeContext = [("ownerId".to_string(), json!("u2"))].into_iter().collect();
        assert!(perms.is_allowed("order", "edit", &mine));
        assert!(!perms.is_allowed("order", "edit", &theirs));
    }

    #[test]
    fn test_super_admin_bypass() {
        let snap = snapshot(vec![], vec![], vec![]);
        let admin = Principal::new("root").super_admin();
        let b = builder();

        let perms = b.build(&snap, &admin, &ScopeRef::outlet("o9")).unwrap();
        assert!(allowed(&perms, "anything", "at-all"));

        let limits = b.limits(&snap, &admin, &ScopeRef::global()).unwrap();
        assert!(limits.limits.is_unlimited(LimitCategoryKind::Financial, "maxRefund"));
    }

    #[test]
    fn test_limits_merge_across_assignments() {
        let snap = snapshot(
            vec![],
            vec![],
            vec![
                Role::new("bm", "Business manager", ScopeType::Business)
                    .with_limits(LimitSet::new().with(LimitCategoryKind::Financial, "maxDiscountPercent", 10.0)),
                Role::new("om", "Outlet manager", ScopeType::Outlet)
                    .with_limits(LimitSet::new().with(LimitCategoryKind::Financial, "maxDiscountPercent", -1.0)),
            ],
        );

        let principal = Principal::new("u")
            .with_assignment(RoleAssignment::new("bm", ScopeRef::business("b1")))
            .with_assignment(RoleAssignment::new("om", ScopeRef::outlet("o1")));

        let merged = builder().limits(&snap, &principal, &ScopeRef::outlet("o1")).unwrap();
        assert_eq!(merged.limits.number(LimitCategoryKind::Financial, "maxDiscountPercent"), Some(-1.0));

        let at_business = builder().limits(&snap, &principal, &ScopeRef::business("b1")).unwrap();
        assert_eq!(at_business.limits.number(LimitCategoryKind::Financial, "maxDiscountPercent"), Some(10.0));
    }

    #[test]
    fn test_permission_key_format() {
        let key: PermissionKey = "order:create".parse().unwrap();
        assert_eq!(key, PermissionKey::new("order", "create"));
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"order:create\"");
        assert!("order".parse::<PermissionKey>().is_err());
    }
}
