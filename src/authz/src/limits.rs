//! Quantitative limits and their aggregation across roles
//!
//! Each role carries four categories of named ceilings. When several roles
//! apply to a request their limits are merged field by field; `-1` marks a
//! numeric ceiling as unlimited.

use crate::error::ResolutionWarning;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Sentinel for an unlimited numeric ceiling
pub const UNLIMITED: f64 = -1.0;

/// A single limit field value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LimitValue {
    Flag(bool),
    Number(f64),
}

impl LimitValue {
    pub fn unlimited() -> Self {
        LimitValue::Number(UNLIMITED)
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, LimitValue::Number(n) if *n == UNLIMITED)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            LimitValue::Number(n) => Some(*n),
            LimitValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            LimitValue::Flag(b) => Some(*b),
            LimitValue::Number(_) => None,
        }
    }

    fn same_type(&self, other: &LimitValue) -> bool {
        matches!(
            (self, other),
            (LimitValue::Flag(_), LimitValue::Flag(_)) | (LimitValue::Number(_), LimitValue::Number(_))
        )
    }
}

impl From<f64> for LimitValue {
    fn from(n: f64) -> Self {
        LimitValue::Number(n)
    }
}

impl From<i64> for LimitValue {
    fn from(n: i64) -> Self {
        LimitValue::Number(n as f64)
    }
}

impl From<bool> for LimitValue {
    fn from(b: bool) -> Self {
        LimitValue::Flag(b)
    }
}

/// Named fields of one limit category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitCategory(BTreeMap<String, LimitValue>);

impl LimitCategory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<LimitValue>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<LimitValue> {
        self.0.get(field).copied()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: LimitValue) {
        self.0.insert(field.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LimitValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The four limit categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LimitCategoryKind {
    Financial,
    DataAccess,
    Security,
    Approval,
}

impl LimitCategoryKind {
    pub const ALL: [LimitCategoryKind; 4] = [
        LimitCategoryKind::Financial,
        LimitCategoryKind::DataAccess,
        LimitCategoryKind::Security,
        LimitCategoryKind::Approval,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LimitCategoryKind::Financial => "financial",
            LimitCategoryKind::DataAccess => "dataAccess",
            LimitCategoryKind::Security => "security",
            LimitCategoryKind::Approval => "approval",
        }
    }
}

impl fmt::Display for LimitCategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitCategoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "financial" => Ok(LimitCategoryKind::Financial),
            "dataAccess" | "data_access" => Ok(LimitCategoryKind::DataAccess),
            "security" => Ok(LimitCategoryKind::Security),
            "approval" => Ok(LimitCategoryKind::Approval),
            other => Err(format!("unknown limit category '{}'", other)),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Per-role (or aggregated) limits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitSet {
    #[serde(default)]
    pub financial: LimitCategory,
    #[serde(default)]
    pub data_access: LimitCategory,
    #[serde(default)]
    pub security: LimitCategory,
    #[serde(default)]
    pub approval: LimitCategory,

    /// Set only for super-admins: every ceiling is unlimited
    #[serde(default, skip_serializing_if = "is_false")]
    pub unrestricted: bool,
}

impl LimitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits of a super-admin principal
    pub fn unrestricted() -> Self {
        Self {
            unrestricted: true,
            ..Self::default()
        }
    }

    pub fn with(mut self, kind: LimitCategoryKind, field: impl Into<String>, value: impl Into<LimitValue>) -> Self {
        self.category_mut(kind).insert(field, value.into());
        self
    }

    pub fn category(&self, kind: LimitCategoryKind) -> &LimitCategory {
        match kind {
            LimitCategoryKind::Financial => &self.financial,
            LimitCategoryKind::DataAccess => &self.data_access,
            LimitCategoryKind::Security => &self.security,
            LimitCategoryKind::Approval => &self.approval,
        }
    }

    pub fn category_mut(&mut self, kind: LimitCategoryKind) -> &mut LimitCategory {
        match kind {
            LimitCategoryKind::Financial => &mut self.financial,
            LimitCategoryKind::DataAccess => &mut self.data_access,
            LimitCategoryKind::Security => &mut self.security,
            LimitCategoryKind::Approval => &mut self.approval,
        }
    }

    pub fn get(&self, kind: LimitCategoryKind, field: &str) -> Option<LimitValue> {
        if self.unrestricted {
            return Some(LimitValue::unlimited());
        }
        self.category(kind).get(field)
    }

    pub fn number(&self, kind: LimitCategoryKind, field: &str) -> Option<f64> {
        self.get(kind, field)?.as_number()
    }

    pub fn is_unlimited(&self, kind: LimitCategoryKind, field: &str) -> bool {
        self.get(kind, field).is_some_and(|v| v.is_unlimited())
    }

    /// Whether `amount` fits under a numeric ceiling
    ///
    /// A missing or non-numeric field allows nothing.
    pub fn allows_amount(&self, kind: LimitCategoryKind, field: &str, amount: f64) -> bool {
        match self.get(kind, field) {
            Some(LimitValue::Number(ceiling)) => ceiling == UNLIMITED || amount <= ceiling,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.unrestricted && LimitCategoryKind::ALL.iter().all(|k| self.category(*k).is_empty())
    }
}

/// How two values of the same field combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// Larger ceiling wins; `-1` dominates. On flags behaves as `AnyTrue`.
    MostPermissive,
    /// Smaller ceiling wins; `-1` loses to any finite value. On flags behaves
    /// as `AllTrue`.
    LeastPermissive,
    /// Logical OR. On numbers behaves as `MostPermissive`.
    AnyTrue,
    /// Logical AND. On numbers behaves as `LeastPermissive`.
    AllTrue,
}

impl MergeRule {
    fn is_permissive(self) -> bool {
        matches!(self, MergeRule::MostPermissive | MergeRule::AnyTrue)
    }

    /// Combines two values of the same type
    pub fn merge(self, a: LimitValue, b: LimitValue) -> LimitValue {
        match (a, b) {
            (LimitValue::Flag(x), LimitValue::Flag(y)) => {
                LimitValue::Flag(if self.is_permissive() { x || y } else { x && y })
            }
            (LimitValue::Number(x), LimitValue::Number(y)) => LimitValue::Number(if self.is_permissive() {
                if x == UNLIMITED || y == UNLIMITED {
                    UNLIMITED
                } else {
                    x.max(y)
                }
            } else if x == UNLIMITED {
                y
            } else if y == UNLIMITED {
                x
            } else {
                x.min(y)
            }),
            // Type clash: first value stays
            (first, _) => first,
        }
    }
}

/// Per-field merge rule overrides, keyed `"category.field"`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitMergePolicy {
    #[serde(default)]
    pub overrides: BTreeMap<String, MergeRule>,
}

impl LimitMergePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, kind: LimitCategoryKind, field: &str, rule: MergeRule) -> Self {
        self.overrides.insert(format!("{}.{}", kind, field), rule);
        self
    }

    /// Rule for a field: explicit override, else `MostPermissive` for numbers
    /// and `AnyTrue` for flags
    pub fn rule_for(&self, kind: LimitCategoryKind, field: &str, value: &LimitValue) -> MergeRule {
        if let Some(rule) = self.overrides.get(&format!("{}.{}", kind, field)) {
            return *rule;
        }
        match value {
            LimitValue::Number(_) => MergeRule::MostPermissive,
            LimitValue::Flag(_) => MergeRule::AnyTrue,
        }
    }

    /// Checks every override key names a known category
    pub fn validate(&self) -> Result<(), String> {
        for key in self.overrides.keys() {
            let (category, field) = key
                .split_once('.')
                .ok_or_else(|| format!("limit merge key '{}' must be 'category.field'", key))?;
            category.parse::<LimitCategoryKind>()?;
            if field.is_empty() {
                return Err(format!("limit merge key '{}' has an empty field", key));
            }
        }
        Ok(())
    }
}

/// Folds limit sets of several roles into one
pub struct LimitAggregator<'a> {
    policy: &'a LimitMergePolicy,
    merged: LimitSet,
    warnings: Vec<ResolutionWarning>,
}

impl<'a> LimitAggregator<'a> {
    pub fn new(policy: &'a LimitMergePolicy) -> Self {
        Self {
            policy,
            merged: LimitSet::default(),
            warnings: Vec::new(),
        }
    }

    pub fn add(&mut self, limits: &LimitSet) {
        if limits.unrestricted {
            self.merged.unrestricted = true;
        }

        for kind in LimitCategoryKind::ALL {
            for (field, value) in limits.category(kind).iter() {
                let merged = match self.merged.category(kind).get(field) {
                    None => *value,
                    Some(current) if !current.same_type(value) => {
                        warn!("Limit {}.{} mixes numeric and boolean values; keeping first", kind, field);
                        let warning = ResolutionWarning::LimitTypeMismatch {
                            category: kind.to_string(),
                            field: field.clone(),
                        };
                        if !self.warnings.contains(&warning) {
                            self.warnings.push(warning);
                        }
                        current
                    }
                    Some(current) => self.policy.rule_for(kind, field, &current).merge(current, *value),
                };
                self.merged.category_mut(kind).insert(field.clone(), merged);
            }
        }
    }

    pub fn finish(self) -> (LimitSet, Vec<ResolutionWarning>) {
        (self.merged, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::LimitCategoryKind::*;

    fn merge_all(policy: &LimitMergePolicy, sets: &[LimitSet]) -> (LimitSet, Vec<ResolutionWarning>) {
        let mut aggregator = LimitAggregator::new(policy);
        for set in sets {
            aggregator.add(set);
        }
        aggregator.finish()
    }

    #[test]
    fn test_unlimited_dominates_finite() {
        let business = LimitSet::new().with(Financial, "maxDiscountPercent", 10.0);
        let outlet = LimitSet::new().with(Financial, "maxDiscountPercent", -1.0);

        let (merged, warnings) = merge_all(&LimitMergePolicy::new(), &[business, outlet]);
        assert!(merged.is_unlimited(Financial, "maxDiscountPercent"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_most_permissive_takes_max() {
        let a = LimitSet::new().with(Approval, "maxPurchaseAmount", 500.0);
        let b = LimitSet::new().with(Approval, "maxPurchaseAmount", 2_000.0);

        let (merged, _) = merge_all(&LimitMergePolicy::new(), &[a, b]);
        assert_eq!(merged.number(Approval, "maxPurchaseAmount"), Some(2_000.0));
        assert!(merged.allows_amount(Approval, "maxPurchaseAmount", 1_500.0));
        assert!(!merged.allows_amount(Approval, "maxPurchaseAmount", 2_500.0));
    }

    #[test]
    fn test_least_permissive_override() {
        let policy = LimitMergePolicy::new().with_rule(DataAccess, "maxExportRows", MergeRule::LeastPermissive);
        let a = LimitSet::new().with(DataAccess, "maxExportRows", -1.0);
        let b = LimitSet::new().with(DataAccess, "maxExportRows", 1_000.0);
        let c = LimitSet::new().with(DataAccess, "maxExportRows", 5_000.0);

        let (merged, _) = merge_all(&policy, &[a, b, c]);
        assert_eq!(merged.number(DataAccess, "maxExportRows"), Some(1_000.0));
    }

    #[test]
    fn test_flags_default_to_or() {
        let a = LimitSet::new().with(Security, "ipWhitelistEnabled", false);
        let b = LimitSet::new().with(Security, "ipWhitelistEnabled", true);

        let (merged, _) = merge_all(&LimitMergePolicy::new(), &[a.clone(), b.clone()]);
        assert_eq!(merged.get(Security, "ipWhitelistEnabled"), Some(LimitValue::Flag(true)));

        let policy = LimitMergePolicy::new().with_rule(Security, "ipWhitelistEnabled", MergeRule::AllTrue);
        let (merged, _) = merge_all(&policy, &[a, b]);
        assert_eq!(merged.get(Security, "ipWhitelistEnabled"), Some(LimitValue::Flag(false)));
    }

    #[test]
    fn test_type_clash_keeps_first_and_warns() {
        let a = LimitSet::new().with(Security, "mfa", true);
        let b = LimitSet::new().with(Security, "mfa", 3.0);

        let (merged, warnings) = merge_all(&LimitMergePolicy::new(), &[a, b]);
        assert_eq!(merged.get(Security, "mfa"), Some(LimitValue::Flag(true)));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_unrestricted_set() {
        let limits = LimitSet::unrestricted();
        assert!(limits.is_unlimited(Financial, "anything"));
        assert!(limits.allows_amount(Approval, "maxPurchaseAmount", 1e12));
        assert!(!LimitSet::new().allows_amount(Approval, "maxPurchaseAmount", 1.0));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::json!({
            "financial": {"maxDiscountPercent": 15, "maxRefundAmount": -1},
            "security": {"ipWhitelistEnabled": true}
        });
        let limits: LimitSet = serde_json::from_value(json).unwrap();

        assert_eq!(limits.number(Financial, "maxDiscountPercent"), Some(15.0));
        assert!(limits.is_unlimited(Financial, "maxRefundAmount"));
        assert_eq!(limits.get(Security, "ipWhitelistEnabled"), Some(LimitValue::Flag(true)));
        assert!(limits.data_access.is_empty());
    }

    #[test]
    fn test_policy_validation() {
        assert!(LimitMergePolicy::new()
            .with_rule(Financial, "maxDiscountPercent", MergeRule::LeastPermissive)
            .validate()
            .is_ok());

        let mut bad = LimitMergePolicy::new();
        bad.overrides.insert("payroll.max".to_string(), MergeRule::AnyTrue);
        assert!(bad.validate().is_err());
    }
}
