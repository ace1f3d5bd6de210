//! Error types for the permission resolution engine

use crate::types::{GroupId, PermissionId, RoleId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Authorization engine errors
///
/// None of these escape the decision API: every query path maps them to a
/// fail-closed DENY. They surface to callers only on the administrative path
/// (store mutations, inheritance checks, snapshot loading).
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Cycle in the role inheritance graph
    #[error("Configuration error: inheritance cycle {}", .cycle.join(" -> "))]
    Configuration {
        /// Full cycle path, first and last element identical
        cycle: Vec<RoleId>,
    },

    /// Traversal went deeper than the configured guard
    #[error("Configuration error: inheritance depth exceeded {depth} while expanding '{role}'")]
    TraversalDepthExceeded { role: RoleId, depth: usize },

    /// Role not present in the snapshot
    #[error("Role not found: {0}")]
    UnknownRole(RoleId),

    /// Permission group not present in the snapshot
    #[error("Permission group not found: {0}")]
    UnknownGroup(GroupId),

    /// System roles cannot be renamed or deleted
    #[error("Role '{0}' is a system role and cannot be renamed or deleted")]
    ProtectedRole(RoleId),

    /// A second default role for the same hierarchy level
    #[error("Hierarchy level {level} already has default role '{existing}'")]
    DuplicateDefaultRole { level: i32, existing: RoleId },

    /// Permissions are append-only reference data
    #[error("Permission '{0}' already exists with a different definition")]
    ImmutablePermission(PermissionId),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Snapshot could not be read or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Whether this error reports a broken role graph
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AuthzError::Configuration { .. } | AuthzError::TraversalDepthExceeded { .. }
        )
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(err: serde_json::Error) -> Self {
        AuthzError::Snapshot(err.to_string())
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Kind of record a dangling reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Permission,
    Group,
    Role,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Permission => write!(f, "permission"),
            ReferenceKind::Group => write!(f, "group"),
            ReferenceKind::Role => write!(f, "role"),
        }
    }
}

/// Non-fatal findings raised while resolving
///
/// Resolution continues past every warning; they are logged and attached to
/// explanations so audit trails show why a reference was ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionWarning {
    /// A role or group references a record missing from the snapshot
    DanglingReference {
        /// Id of the role or group holding the reference
        owner: String,
        kind: ReferenceKind,
        missing_id: String,
    },

    /// Competing groups tied on override and priority with different effects
    AmbiguousResolution {
        resource: String,
        action: String,
        groups: Vec<GroupId>,
        priority: i32,
    },

    /// Two roles disagree on the type of a limit field
    LimitTypeMismatch { category: String, field: String },
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionWarning::DanglingReference { owner, kind, missing_id } => {
                write!(f, "'{}' references missing {} '{}'", owner, kind, missing_id)
            }
            ResolutionWarning::AmbiguousResolution { resource, action, groups, priority } => {
                write!(
                    f,
                    "groups [{}] tie at priority {} on {}:{}",
                    groups.join(", "),
                    priority,
                    resource,
                    action
                )
            }
            ResolutionWarning::LimitTypeMismatch { category, field } => {
                write!(f, "limit {}.{} mixes numeric and boolean values", category, field)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = AuthzError::Configuration {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert!(err.to_string().contains("A -> B -> A"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_depth_is_configuration_error() {
        let err = AuthzError::TraversalDepthExceeded {
            role: "deep".to_string(),
            depth: 32,
        };
        assert!(err.is_configuration_error());
        assert!(!AuthzError::UnknownRole("x".to_string()).is_configuration_error());
    }

    #[test]
    fn test_warning_display() {
        let warning = ResolutionWarning::DanglingReference {
            owner: "cashier".to_string(),
            kind: ReferenceKind::Group,
            missing_id: "sales".to_string(),
        };
        assert_eq!(warning.to_string(), "'cashier' references missing group 'sales'");
    }
}
