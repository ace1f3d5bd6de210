//! Scope ancestry lookups (outlet → business → company)

use super::types::{ScopeRef, ScopeType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supplies the parent of a scope in the containment hierarchy
///
/// The directory is the only source of ancestry; the resolver never infers
/// containment from ids.
pub trait ScopeDirectory: Send + Sync {
    /// Immediate parent of `scope`, or `None` when unknown.
    /// GLOBAL is the implicit root and is never returned here.
    fn parent(&self, scope: &ScopeRef) -> Option<ScopeRef>;
}

/// Directory backed by two lookup tables, carried inside a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticScopeDirectory {
    /// business id → company id
    #[serde(default)]
    pub businesses: HashMap<String, String>,

    /// outlet id → business id
    #[serde(default)]
    pub outlets: HashMap<String, String>,
}

impl StaticScopeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_business(mut self, business: impl Into<String>, company: impl Into<String>) -> Self {
        self.businesses.insert(business.into(), company.into());
        self
    }

    pub fn with_outlet(mut self, outlet: impl Into<String>, business: impl Into<String>) -> Self {
        self.outlets.insert(outlet.into(), business.into());
        self
    }
}

impl ScopeDirectory for StaticScopeDirectory {
    fn parent(&self, scope: &ScopeRef) -> Option<ScopeRef> {
        let target = scope.target()?;
        match scope.scope_type {
            ScopeType::Outlet => self.outlets.get(target).map(ScopeRef::business),
            ScopeType::Business => self.businesses.get(target).map(ScopeRef::company),
            ScopeType::Company | ScopeType::Global => None,
        }
    }
}
