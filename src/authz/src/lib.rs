//! # Scopegate Authorization Engine
//!
//! Resolves what a principal may do at a given organizational scope.
//!
//! ## Features
//!
//! - **Scoped assignments** over a GLOBAL → COMPANY → BUSINESS → OUTLET hierarchy
//! - **Role inheritance** with three-colour cycle detection and a depth guard
//! - **Permission groups** carrying their own strategy, priority, override and fallback
//! - **Attribute constraints** (`discount <= 15`, ownership) evaluated per request
//! - **Limit aggregation** across every qualifying role, with per-field merge rules
//! - **Immutable snapshots** with targeted cache invalidation on edits
//! - **Fail closed**: every internal error answers DENY and lands in the audit log
//!
//! ## Example
//!
//! ```rust
//! use scopegate_authz::{
//!     ConfigSnapshot, EngineConfig, Permission, PermissionEngine, PermissionGroup, Principal, Role,
//!     RoleAssignment, ScopeRef, ScopeType,
//! };
//! use scopegate_authz::snapshot::SnapshotDocument;
//! use scopegate_authz::scope::StaticScopeDirectory;
//!
//! let snapshot = ConfigSnapshot::from_document(SnapshotDocument {
//!     version: 1,
//!     permissions: vec![Permission::allow("order.create", "order", "create")],
//!     permission_groups: vec![PermissionGroup::new("sales", "Sales").with_permissions(["order.create"])],
//!     roles: vec![Role::new("cashier", "Cashier", ScopeType::Outlet).with_groups(["sales"])],
//!     principals: vec![],
//!     directory: StaticScopeDirectory::new().with_outlet("o1", "b1"),
//! })
//! .unwrap();
//!
//! let engine = PermissionEngine::new(EngineConfig::default(), snapshot);
//! let alice = Principal::new("alice").with_assignment(RoleAssignment::new("cashier", ScopeRef::outlet("o1")));
//!
//! assert!(engine.is_allowed(&alice, &ScopeRef::outlet("o1"), "order", "create", &Default::default()));
//! assert!(!engine.is_allowed(&alice, &ScopeRef::outlet("o2"), "order", "create", &Default::default()));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod resolution;
pub mod roles;
pub mod scope;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use types::{
    AttributeConstraint, AttributeContext, ConstraintOperator, Effect, Permission, PermissionGroup, Principal,
    ResolutionStrategy, Role, RoleAssignment,
};
pub use config::EngineConfig;
pub use engine::{EffectivePermissions, Explanation, PermissionEngine};
pub use error::{AuthzError, ResolutionWarning, Result};
pub use limits::{LimitCategoryKind, LimitSet, LimitValue, MergeRule};
pub use resolution::{ContributingRule, Decision};
pub use scope::{ScopeRef, ScopeResolver, ScopeType};
pub use snapshot::{ChangeEvent, ConfigSnapshot};
pub use store::{ConfigStore, InMemoryConfigStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
