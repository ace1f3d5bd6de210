//! Role inheritance module
//!
//! Provides the role graph used to expand a role assignment into its full
//! inherited role set, with cycle detection and reverse-edge lookups.
//!
//! # Features
//!
//! - **Transitive Closure**: DFS pre-order expansion, diamonds deduplicated
//! - **Cycle Detection**: three-colour DFS with complete path reporting
//! - **Depth Guard**: configurable maximum traversal depth
//! - **Reverse Edges**: find every role affected by an edit
//!
//! # Example
//!
//! ```rust
//! use scopegate_authz::roles::RoleGraph;
//! use scopegate_authz::scope::ScopeType;
//! use scopegate_authz::types::Role;
//!
//! let roles = vec![
//!     Role::new("a", "A", ScopeType::Global).inherits(["b"]),
//!     Role::new("b", "B", ScopeType::Global),
//! ];
//! let graph = RoleGraph::from_roles(&roles);
//!
//! // Giving B an edge back to A would close a cycle
//! let err = graph.check_inheritance("b", &["a".to_string()]).unwrap_err();
//! assert!(err.to_string().contains("b -> a -> b"));
//! ```

pub mod graph;


pub use graph::{Expansion, RoleGraph};
