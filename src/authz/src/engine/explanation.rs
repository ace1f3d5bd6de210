//! Explanation returned by `PermissionEngine::explain`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResolutionWarning;
use crate::resolution::{Constraint, ContributingRule, Decision};
use crate::scope::ScopeRef;
use crate::types::{AttributeContext, PrincipalId};

/// Decision for one request plus the rule that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub principal: PrincipalId,
    pub scope: ScopeRef,
    pub resource: String,
    pub action: String,

    /// Decision before request attributes are applied
    pub decision: Decision,

    /// Final answer with constraints evaluated
    pub allowed: bool,

    pub rule: ContributingRule,

    /// Constraints of an ALLOW_WITH_CONSTRAINT the request failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmet_constraints: Vec<Constraint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ResolutionWarning>,

    pub version: u64,
}

impl Explanation {
    /// Constraints that kept a constrained `decision` from allowing, across
    /// every alternative set; empty when the request is allowed
    pub(crate) fn unmet(decision: &Decision, principal: &str, attributes: &AttributeContext) -> Vec<Constraint> {
        if decision.evaluate(principal, attributes) {
            return Vec::new();
        }

        let mut unmet: Vec<Constraint> = Vec::new();
        for constraint in decision.constraint_sets().iter().flatten() {
            if !constraint.is_satisfied(principal, attributes) && !unmet.contains(constraint) {
                unmet.push(constraint.clone());
            }
        }
        unmet
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} for '{}' at {} ({}): {}",
            if self.allowed { "ALLOW" } else { "DENY" },
            self.resource,
            self.action,
            self.principal,
            self.scope,
            self.decision,
            self.rule
        )?;
        if !self.unmet_constraints.is_empty() {
            let unmet: Vec<String> = self.unmet_constraints.iter().map(|c| c.to_string()).collect();
            write!(f, "; unmet {}", unmet.join(", "))?;
        }
        Ok(())
    }
}
