//! Engine configuration loading and validation

use crate::limits::LimitMergePolicy;
use crate::types::Effect;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Resolution engine configuration
///
/// Every field has a default, so an empty TOML file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Guard against inheritance chains that slipped past save-time validation
    #[serde(default = "default_max_depth")]
    pub max_traversal_depth: usize,

    /// Effect when neither a role nor a group supplies a fallback
    #[serde(default = "default_effect")]
    pub default_effect: Effect,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Request attribute compared with the principal id by `own` permissions
    #[serde(default = "default_owner_attribute")]
    pub owner_attribute: String,

    #[serde(default)]
    pub limit_merge: LimitMergePolicy,
}

fn default_max_depth() -> usize { 32 }
fn default_effect() -> Effect { Effect::Deny }
fn default_true() -> bool { true }
fn default_cache_capacity() -> usize { 10_000 }
fn default_cache_ttl() -> u64 { 300 }
fn default_audit_capacity() -> usize { 1_024 }
fn default_owner_attribute() -> String { "ownerId".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: default_max_depth(),
            default_effect: default_effect(),
            enable_cache: default_true(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl(),
            audit_capacity: default_audit_capacity(),
            owner_attribute: default_owner_attribute(),
            limit_merge: LimitMergePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .context("Failed to read configuration file")?;

        let config: EngineConfig = toml::from_str(&contents)
            .context("Failed to parse configuration file")?;

        Ok(config)
    }

    /// Defaults overlaid with `AUTHZ_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Applies `AUTHZ_MAX_DEPTH`, `AUTHZ_CACHE_CAPACITY`,
    /// `AUTHZ_CACHE_TTL_SECS`, `AUTHZ_DEFAULT_EFFECT` and
    /// `AUTHZ_AUDIT_CAPACITY` when set
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("AUTHZ_MAX_DEPTH") {
            self.max_traversal_depth = value.trim().parse().context("AUTHZ_MAX_DEPTH must be an integer")?;
        }
        if let Some(value) = lookup("AUTHZ_CACHE_CAPACITY") {
            self.cache_capacity = value.trim().parse().context("AUTHZ_CACHE_CAPACITY must be an integer")?;
        }
        if let Some(value) = lookup("AUTHZ_CACHE_TTL_SECS") {
            self.cache_ttl_secs = value.trim().parse().context("AUTHZ_CACHE_TTL_SECS must be an integer")?;
        }
        if let Some(value) = lookup("AUTHZ_AUDIT_CAPACITY") {
            self.audit_capacity = value.trim().parse().context("AUTHZ_AUDIT_CAPACITY must be an integer")?;
        }
        if let Some(value) = lookup("AUTHZ_DEFAULT_EFFECT") {
            self.default_effect = match value.trim().to_ascii_uppercase().as_str() {
                "ALLOW" => Effect::Allow,
                "DENY" => Effect::Deny,
                other => anyhow::bail!("AUTHZ_DEFAULT_EFFECT must be ALLOW or DENY, got '{}'", other),
            };
        }
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_traversal_depth == 0 {
            anyhow::bail!("max_traversal_depth must be at least 1");
        }

        if self.enable_cache && self.cache_capacity == 0 {
            anyhow::bail!("cache_capacity must be positive when the cache is enabled");
        }

        if self.audit_capacity == 0 {
            anyhow::bail!("audit_capacity must be positive");
        }

        if self.owner_attribute.trim().is_empty() {
            anyhow::bail!("owner_attribute must not be empty");
        }

        self.limit_merge
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid limit merge policy")?;

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{LimitCategoryKind, MergeRule};
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_traversal_depth, 32);
        assert_eq!(config.default_effect, Effect::Deny);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
max_traversal_depth = 8
cache_capacity = 64
owner_attribute = "createdBy"

[limit_merge.overrides]
"financial.maxRefund" = "least_permissive"
"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.max_traversal_depth, 8);
        assert_eq!(config.cache_capacity, 64);
        assert_eq!(config.owner_attribute, "createdBy");
        assert!(config.enable_cache);
        assert_eq!(
            config.limit_merge,
            LimitMergePolicy::new().with_rule(LimitCategoryKind::Financial, "maxRefund", MergeRule::LeastPermissive)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(EngineConfig::load(file.path()).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_missing_file() {
        assert!(EngineConfig::load("/nonexistent/authz.toml").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AUTHZ_MAX_DEPTH", "4"),
            ("AUTHZ_DEFAULT_EFFECT", "allow"),
            ("AUTHZ_CACHE_TTL_SECS", "10"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_traversal_depth, 4);
        assert_eq!(config.default_effect, Effect::Allow);
        assert_eq!(config.cache_ttl_secs, 10);
        assert_eq!(config.cache_capacity, 10_000);
    }

    #[test]
    fn test_bad_override_rejected() {
        let result = EngineConfig::default().with_overrides(|key| {
            (key == "AUTHZ_DEFAULT_EFFECT").then(|| "maybe".to_string())
        });
        assert!(result.is_err());

        let result = EngineConfig::default().with_overrides(|key| {
            (key == "AUTHZ_CACHE_CAPACITY").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = EngineConfig { max_traversal_depth: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = EngineConfig { cache_capacity: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = EngineConfig { cache_capacity: 0, enable_cache: false, ..Default::default() };
        assert!(config.validate().is_ok());

        let config = EngineConfig { audit_capacity: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_merge_keys() {
        let mut config = EngineConfig::default();
        config.limit_merge.overrides.insert("payroll.max".to_string(), MergeRule::AllTrue);
        assert!(config.validate().is_err());
    }
}
