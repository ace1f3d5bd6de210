/// Scope type definitions and parsing
///
/// Provides the organizational containment levels and the concrete scope
/// reference (level + target id) used by grants and requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result type for scope operations
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors that can occur while parsing or building scopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// Empty scope string provided
    EmptyScope,
    /// Invalid scope format
    InvalidFormat(String),
    /// Unknown scope level
    UnknownScopeType(String),
    /// COMPANY/BUSINESS/OUTLET without a target id
    MissingTarget(ScopeType),
    /// GLOBAL with a target id
    UnexpectedTarget(String),
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyScope => write!(f, "Scope cannot be empty"),
            Self::InvalidFormat(msg) => write!(f, "Invalid scope format: {}", msg),
            Self::UnknownScopeType(t) => write!(f, "Unknown scope type: {}", t),
            Self::MissingTarget(t) => write!(f, "Scope {} requires a target id", t),
            Self::UnexpectedTarget(id) => write!(f, "GLOBAL scope cannot carry target '{}'", id),
        }
    }
}

impl std::error::Error for ScopeError {}

/// Organizational containment level
///
/// Ordered from the widest level to the narrowest:
/// GLOBAL → COMPANY → BUSINESS → OUTLET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeType {
    Global,
    Company,
    Business,
    Outlet,
}

impl ScopeType {
    /// Depth of the level in the containment hierarchy (GLOBAL = 0)
    pub fn depth(self) -> usize {
        match self {
            ScopeType::Global => 0,
            ScopeType::Company => 1,
            ScopeType::Business => 2,
            ScopeType::Outlet => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeType::Global => "GLOBAL",
            ScopeType::Company => "COMPANY",
            ScopeType::Business => "BUSINESS",
            ScopeType::Outlet => "OUTLET",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GLOBAL" => Ok(ScopeType::Global),
            "COMPANY" => Ok(ScopeType::Company),
            "BUSINESS" => Ok(ScopeType::Business),
            "OUTLET" => Ok(ScopeType::Outlet),
            other => Err(ScopeError::UnknownScopeType(other.to_string())),
        }
    }
}

/// A concrete scope: a level plus, below GLOBAL, the target id
///
/// Serialized in the configuration store's shape:
/// `{"scopeType": "OUTLET", "scopeTargetId": "o1"}`.
///
/// # Examples
///
/// ```
/// use scopegate_authz::scope::{ScopeRef, ScopeType};
///
/// let scope: ScopeRef = "OUTLET:o1".parse().unwrap();
/// assert_eq!(scope.scope_type, ScopeType::Outlet);
/// assert_eq!(scope.to_string(), "OUTLET:o1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeRef {
    #[serde(rename = "scopeType")]
    pub scope_type: ScopeType,

    #[serde(rename = "scopeTargetId", default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl ScopeRef {
    /// Builds a scope, checking the target id against the level
    pub fn new(scope_type: ScopeType, target_id: Option<String>) -> ScopeResult<Self> {
        match (scope_type, &target_id) {
            (ScopeType::Global, Some(id)) => Err(ScopeError::UnexpectedTarget(id.clone())),
            (ScopeType::Global, None) => Ok(Self::global()),
            (_, None) => Err(ScopeError::MissingTarget(scope_type)),
            (_, Some(id)) if id.is_empty() => Err(ScopeError::MissingTarget(scope_type)),
            (_, Some(_)) => Ok(Self { scope_type, target_id }),
        }
    }

    pub fn global() -> Self {
        Self {
            scope_type: ScopeType::Global,
            target_id: None,
        }
    }

    pub fn company(id: impl Into<String>) -> Self {
        Self::targeted(ScopeType::Company, id)
    }

    pub fn business(id: impl Into<String>) -> Self {
        Self::targeted(ScopeType::Business, id)
    }

    pub fn outlet(id: impl Into<String>) -> Self {
        Self::targeted(ScopeType::Outlet, id)
    }

    fn targeted(scope_type: ScopeType, id: impl Into<String>) -> Self {
        Self {
            scope_type,
            target_id: Some(id.into()),
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope_type == ScopeType::Global
    }

    pub fn target(&self) -> Option<&str> {
        self.target_id.as_deref()
    }
}

impl FromStr for ScopeRef {
    type Err = ScopeError;

    /// Parses `GLOBAL`, `COMPANY:c1`, `BUSINESS:b1` or `OUTLET:o1`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScopeError::EmptyScope);
        }

        match s.split_once(':') {
            Some((kind, target)) => {
                if target.is_empty() || target.contains(':') {
                    return Err(ScopeError::InvalidFormat(s.to_string()));
                }
                Self::new(kind.parse()?, Some(target.to_string()))
            }
            None => Self::new(s.parse()?, None),
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target_id {
            Some(id) => write!(f, "{}:{}", self.scope_type, id),
            None => write!(f, "{}", self.scope_type),
        }
    }
}
