//! Core authorization types
//!
//! Records mirror the configuration store's shape (camelCase on the wire) and
//! are treated as immutable once they are part of a snapshot.

use crate::limits::LimitSet;
use crate::scope::{ScopeRef, ScopeType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Unique permission identifier
pub type PermissionId = String;

/// Unique permission group identifier
pub type GroupId = String;

/// Unique role identifier
pub type RoleId = String;

/// Unique principal identifier
pub type PrincipalId = String;

/// Request attributes evaluated against attribute constraints
pub type AttributeContext = HashMap<String, Value>;

/// Allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "ALLOW"),
            Effect::Deny => write!(f, "DENY"),
        }
    }
}

/// Ownership qualifier on a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionQualifier {
    /// Only resources owned by the principal
    Own,
    /// Any resource
    Any,
}

/// Comparison operator of an attribute constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOperator {
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    In,
    NotIn,
    Contains,
}

impl ConstraintOperator {
    /// Upper-bound operators (`<`, `<=`)
    pub fn is_upper_bound(self) -> bool {
        matches!(self, ConstraintOperator::Lt | ConstraintOperator::Lte)
    }

    /// Lower-bound operators (`>`, `>=`)
    pub fn is_lower_bound(self) -> bool {
        matches!(self, ConstraintOperator::Gt | ConstraintOperator::Gte)
    }
}

impl fmt::Display for ConstraintOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConstraintOperator::Eq => "==",
            ConstraintOperator::Ne => "!=",
            ConstraintOperator::Lt => "<",
            ConstraintOperator::Lte => "<=",
            ConstraintOperator::Gt => ">",
            ConstraintOperator::Gte => ">=",
            ConstraintOperator::In => "in",
            ConstraintOperator::NotIn => "not in",
            ConstraintOperator::Contains => "contains",
        };
        f.write_str(symbol)
    }
}

/// Attribute constraint carried by a permission, e.g. `discount <= 15`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConstraint {
    /// Request attribute the operator is applied to
    pub attribute: String,
    pub operator: ConstraintOperator,
    /// Operand
    pub value: Value,
}

impl AttributeConstraint {
    pub fn new(attribute: impl Into<String>, operator: ConstraintOperator, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluates the constraint against request attributes
    ///
    /// A missing attribute or an operand of the wrong type never satisfies
    /// the constraint.
    pub fn is_satisfied_by(&self, attributes: &AttributeContext) -> bool {
        let Some(actual) = attributes.get(&self.attribute) else {
            return false;
        };

        match self.operator {
            ConstraintOperator::Eq => values_equal(actual, &self.value),
            ConstraintOperator::Ne => !values_equal(actual, &self.value),
            ConstraintOperator::Lt => compare(actual, &self.value).is_some_and(|o| o.is_lt()),
            ConstraintOperator::Lte => compare(actual, &self.value).is_some_and(|o| o.is_le()),
            ConstraintOperator::Gt => compare(actual, &self.value).is_some_and(|o| o.is_gt()),
            ConstraintOperator::Gte => compare(actual, &self.value).is_some_and(|o| o.is_ge()),
            ConstraintOperator::In => match &self.value {
                Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
                _ => false,
            },
            ConstraintOperator::NotIn => match &self.value {
                Value::Array(items) => !items.iter().any(|item| values_equal(actual, item)),
                _ => false,
            },
            ConstraintOperator::Contains => match actual {
                Value::Array(items) => items.iter().any(|item| values_equal(item, &self.value)),
                Value::String(s) => self.value.as_str().is_some_and(|needle| s.contains(needle)),
                _ => false,
            },
        }
    }
}

impl fmt::Display for AttributeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.attribute, self.operator, self.value)
    }
}

/// Numbers compare numerically so `15` equals `15.0`
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Permission record: an effect on a `(resource, action)` pair
///
/// Denial is always an explicit record with `effect = DENY`; the absence of
/// a grant never denies by itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: PermissionId,
    pub resource: String,
    pub action: String,

    #[serde(default)]
    pub effect: Effect,

    /// Ownership qualifier (`own` / `any`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<PermissionQualifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<AttributeConstraint>,
}

impl Permission {
    /// An ALLOW permission
    pub fn allow(id: impl Into<String>, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource: resource.into(),
            action: action.into(),
            effect: Effect::Allow,
            scope: None,
            constraint: None,
        }
    }

    /// An explicit DENY permission
    pub fn deny(id: impl Into<String>, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow(id, resource, action)
        }
    }

    /// Restrict to resources owned by the principal
    pub fn own(mut self) -> Self {
        self.scope = Some(PermissionQualifier::Own);
        self
    }

    pub fn with_constraint(
        mut self,
        attribute: impl Into<String>,
        operator: ConstraintOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.constraint = Some(AttributeConstraint::new(attribute, operator, value));
        self
    }

    pub fn matches(&self, resource: &str, action: &str) -> bool {
        self.resource == resource && self.action == action
    }

    pub fn is_deny(&self) -> bool {
        self.effect == Effect::Deny
    }

    /// Whether an ALLOW from this record needs request attributes to be final
    pub fn is_constrained(&self) -> bool {
        self.constraint.is_some() || self.scope == Some(PermissionQualifier::Own)
    }
}

/// How a group's matching entries compete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// Compete on `override` then `priority`; DENY wins inside the group
    #[default]
    PriorityBased,
    /// A matching DENY from this group competes as an override
    DenyOverrides,
    /// A matching ALLOW from this group competes as an override; ALLOW wins
    /// inside the group
    AllowOverrides,
}

fn default_fallback() -> Effect {
    Effect::Deny
}

/// Conflict-resolution policy attached to a permission group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResolver {
    #[serde(default)]
    pub strategy: ResolutionStrategy,

    #[serde(default)]
    pub priority: i32,

    #[serde(rename = "override", default)]
    pub overriding: bool,

    #[serde(default = "default_fallback")]
    pub fallback: Effect,
}

impl Default for GroupResolver {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::PriorityBased,
            priority: 0,
            overriding: false,
            fallback: Effect::Deny,
        }
    }
}

/// Permission group: a set of permissions plus the policy governing them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    pub id: GroupId,
    pub name: String,

    #[serde(default)]
    pub permissions: Vec<PermissionId>,

    #[serde(default)]
    pub resolver: GroupResolver,
}

impl PermissionGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            permissions: Vec::new(),
            resolver: GroupResolver::default(),
        }
    }

    pub fn with_permissions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.resolver.priority = priority;
        self
    }

    pub fn overriding(mut self) -> Self {
        self.resolver.overriding = true;
        self
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.resolver.strategy = strategy;
        self
    }

    pub fn with_fallback(mut self, fallback: Effect) -> Self {
        self.resolver.fallback = fallback;
        self
    }
}

/// Role definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub scope_type: ScopeType,
    #[serde(default)]
    pub hierarchy_level: i32,

    /// Direct permissions
    #[serde(default)]
    pub permissions: Vec<PermissionId>,

    /// Attached groups, append-ordered (last = most recently assigned)
    #[serde(default)]
    pub permission_groups: Vec<GroupId>,

    #[serde(default)]
    pub inherited_roles: Vec<RoleId>,

    #[serde(default)]
    pub limits: LimitSet,

    /// Role-level default for pairs no group or grant mentions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Effect>,

    #[serde(default)]
    pub is_system_role: bool,

    #[serde(default)]
    pub is_default: bool,
}

impl Role {
    pub fn new(id: impl Into<String>, name: impl Into<String>, scope_type: ScopeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scope_type,
            hierarchy_level: 0,
            permissions: Vec::new(),
            permission_groups: Vec::new(),
            inherited_roles: Vec::new(),
            limits: LimitSet::default(),
            fallback: None,
            is_system_role: false,
            is_default: false,
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.hierarchy_level = level;
        self
    }

    pub fn with_permissions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_groups<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permission_groups.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn inherits<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inherited_roles.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_limits(mut self, limits: LimitSet) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_fallback(mut self, fallback: Effect) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system_role = true;
        self
    }

    pub fn default_for_level(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Binds a principal to a role at a concrete scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: RoleId,

    #[serde(flatten)]
    pub scope: ScopeRef,
}

impl RoleAssignment {
    pub fn new(role: impl Into<String>, scope: ScopeRef) -> Self {
        Self {
            role: role.into(),
            scope,
        }
    }

    pub fn global(role: impl Into<String>) -> Self {
        Self::new(role, ScopeRef::global())
    }
}

impl fmt::Display for RoleAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role, self.scope)
    }
}

/// Principal (user, service account) with its role assignments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: PrincipalId,

    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,

    /// Bypasses resolution: every pair allowed, limits unrestricted
    #[serde(default)]
    pub super_admin: bool,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            assignments: Vec::new(),
            super_admin: false,
        }
    }

    pub fn with_assignment(mut self, assignment: RoleAssignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    pub fn super_admin(mut self) -> Self {
        self.super_admin = true;
        self
    }

    pub fn is_super_admin(&self) -> bool {
        self.super_admin
    }
}
