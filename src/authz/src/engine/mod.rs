//! Decision API
//!
//! Orchestrates scope filtering, role expansion, conflict resolution and
//! limit aggregation over one immutable snapshot, with a per-principal
//! cache, targeted invalidation and an audit trail.

pub mod audit;
pub mod builder;
pub mod cache;
pub mod explanation;

pub use audit::{AuditEntry, AuditKind, AuditLog, AuditStats};
pub use builder::{AggregatedLimits, EffectivePermission, EffectivePermissionBuilder, EffectivePermissions, PermissionKey};
pub use cache::{CacheConfig, CacheStats, EffectiveCache, Invalidation};
pub use explanation::Explanation;

use crate::config::EngineConfig;
use crate::error::{AuthzError, ResolutionWarning, Result};
use crate::limits::LimitSet;
use crate::resolution::ContributingRule;
use crate::scope::ScopeRef;
use crate::snapshot::{ChangeEvent, ConfigSnapshot};
use crate::store::ConfigStore;
use crate::types::{AttributeContext, Principal, RoleId};

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Main permission engine - the single query surface for consumers
///
/// # Architecture
///
/// ```text
/// Request → ScopeResolver → RoleGraph → ConflictResolver → merge → Decision
///              ↓                                                      ↓
///         [EffectiveCache] ←── targeted invalidation ←── ChangeEvent  [AuditLog]
/// ```
///
/// Every query reads one snapshot from start to finish. Query methods never
/// return errors: a broken configuration yields DENY (or empty limits),
/// logged with `error!` and recorded in the audit log.
pub struct PermissionEngine {
    /// Current configuration
    snapshot: RwLock<Arc<ConfigSnapshot>>,

    builder: EffectivePermissionBuilder,

    /// Effective permission cache (disabled when `enable_cache` is false)
    cache: Option<EffectiveCache>,

    audit: AuditLog,

    /// Source for `refresh`
    store: Option<Arc<dyn ConfigStore>>,

    config: EngineConfig,
}

impl PermissionEngine {
    /// Create an engine over a fixed snapshot
    pub fn new(config: EngineConfig, snapshot: impl Into<Arc<ConfigSnapshot>>) -> Self {
        let snapshot = snapshot.into();

        let cache = config.enable_cache.then(|| {
            EffectiveCache::new(
                CacheConfig {
                    capacity: config.cache_capacity,
                    ttl: config.cache_ttl(),
                },
                snapshot.version(),
            )
        });

        info!(
            "PermissionEngine initialized at v{} with cache={}, max_depth={}, default={}",
            snapshot.version(),
            config.enable_cache,
            config.max_traversal_depth,
            config.default_effect
        );

        Self {
            builder: EffectivePermissionBuilder::new(&config),
            audit: AuditLog::new(config.audit_capacity),
            snapshot: RwLock::new(snapshot),
            cache,
            store: None,
            config,
        }
    }

    /// Create an engine fed by a configuration store
    pub async fn from_store(config: EngineConfig, store: Arc<dyn ConfigStore>) -> Result<Self> {
        let snapshot = store.snapshot().await?;
        let mut engine = Self::new(config, snapshot);
        engine.store = Some(store);
        Ok(engine)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn version(&self) -> u64 {
        self.snapshot.read().version()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(EffectiveCache::stats)
    }

    /// Final boolean for one request
    pub fn is_allowed(
        &self,
        principal: &Principal,
        scope: &ScopeRef,
        resource: &str,
        action: &str,
        attributes: &AttributeContext,
    ) -> bool {
        let permissions = self.get_effective_permissions(principal, scope);
        let allowed = permissions.is_allowed(resource, action, attributes);

        debug!(
            "{} {}:{} for '{}' at {}",
            if allowed { "ALLOW" } else { "DENY" },
            resource,
            action,
            principal.id,
            scope
        );

        allowed
    }

    /// Decision for one request with the rule that produced it
    ///
    /// Every call is recorded in the audit log.
    pub fn explain(
        &self,
        principal: &Principal,
        scope: &ScopeRef,
        resource: &str,
        action: &str,
        attributes: &AttributeContext,
    ) -> Explanation {
        let permissions = self.get_effective_permissions(principal, scope);
        let entry = permissions.get(resource, action);
        let allowed = entry.decision.evaluate(&principal.id, attributes);

        let warnings: Vec<ResolutionWarning> = permissions
            .warnings
            .iter()
            .filter(|w| concerns(w, resource, action))
            .cloned()
            .collect();

        let explanation = Explanation {
            principal: principal.id.clone(),
            scope: scope.clone(),
            resource: resource.to_string(),
            action: action.to_string(),
            decision: entry.decision.clone(),
            allowed,
            unmet_constraints: Explanation::unmet(&entry.decision, &principal.id, attributes),
            rule: entry.rule.clone(),
            warnings,
            version: permissions.version,
        };

        info!("Explain: {}", explanation);

        self.audit.record(
            AuditEntry::new(
                AuditKind::Explain,
                &principal.id,
                scope,
                resource,
                action,
                allowed,
                explanation.rule.clone(),
                explanation.version,
            )
            .with_warnings(explanation.warnings.clone()),
        );

        explanation
    }

    /// Decision map for `principal` at `scope`, served from the cache when
    /// possible
    pub fn get_effective_permissions(&self, principal: &Principal, scope: &ScopeRef) -> Arc<EffectivePermissions> {
        let key = EffectiveCache::compute_key(principal, scope);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key) {
                debug!("Cache hit for '{}' at {}", principal.id, scope);
                return hit;
            }
        }

        let snapshot = self.snapshot();
        match self.builder.build(&snapshot, principal, scope) {
            Ok(permissions) => {
                let permissions = Arc::new(permissions);
                if let Some(cache) = &self.cache {
                    cache.insert(key, snapshot.version(), Arc::clone(&permissions));
                }
                permissions
            }
            Err(err) => {
                let reason = self.fail_closed(principal, scope, &err, snapshot.version());
                Arc::new(EffectivePermissions::fail_closed(principal, scope, snapshot.version(), reason))
            }
        }
    }

    /// Merged limits of every qualifying role; empty on failure
    pub fn get_limits(&self, principal: &Principal, scope: &ScopeRef) -> LimitSet {
        self.limits_report(principal, scope).limits
    }

    /// Merged limits with the warnings raised while merging
    pub fn limits_report(&self, principal: &Principal, scope: &ScopeRef) -> AggregatedLimits {
        let snapshot = self.snapshot();
        match self.builder.limits(&snapshot, principal, scope) {
            Ok(report) => report,
            Err(err) => {
                self.fail_closed(principal, scope, &err, snapshot.version());
                AggregatedLimits::default()
            }
        }
    }

    /// Administrative pre-write check against the current snapshot
    ///
    /// # Errors
    ///
    /// [`AuthzError::Configuration`] naming the cycle the edit would create.
    pub fn check_inheritance(&self, role: &str, inherited: &[RoleId]) -> Result<()> {
        self.snapshot().graph().check_inheritance(role, inherited)
    }

    /// Pulls the latest snapshot and change log from the store
    ///
    /// Returns whether a new snapshot was applied.
    pub async fn refresh(&self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };

        let current = self.version();
        if store.version().await? == current {
            return Ok(false);
        }

        let snapshot = store.snapshot().await?;
        let changes = store.changes_since(current).await?;
        Ok(self.apply_snapshot(snapshot, changes.as_deref()).is_some())
    }

    /// Swaps in `snapshot` and evicts the cache entries `changes` affect
    ///
    /// `None` for `changes` means the change set is unknown and flushes the
    /// whole cache. Returns the number of evicted entries, or `None` when the
    /// snapshot is not newer than the current one.
    pub fn apply_snapshot(&self, snapshot: Arc<ConfigSnapshot>, changes: Option<&[ChangeEvent]>) -> Option<usize> {
        let mut current = self.snapshot.write();
        if snapshot.version() <= current.version() {
            warn!(
                "Ignoring snapshot v{}; engine is already at v{}",
                snapshot.version(),
                current.version()
            );
            return None;
        }

        let invalidation = plan_invalidation(&current, &snapshot, changes);
        if invalidation == Invalidation::All {
            self.builder.scope_resolver().clear_cache();
        }

        let evicted = match &self.cache {
            Some(cache) => cache.invalidate(snapshot.version(), &invalidation),
            None => 0,
        };

        info!(
            "Applied snapshot v{} -> v{} ({} cache entries evicted{})",
            current.version(),
            snapshot.version(),
            evicted,
            if invalidation == Invalidation::All { ", full flush" } else { "" }
        );

        *current = snapshot;
        Some(evicted)
    }

    fn fail_closed(&self, principal: &Principal, scope: &ScopeRef, err: &AuthzError, version: u64) -> String {
        let reason = err.to_string();
        error!(
            "Resolution for '{}' at {} failed closed (v{}): {}",
            principal.id, scope, version, reason
        );

        self.audit.record(AuditEntry::new(
            AuditKind::FailClosed,
            &principal.id,
            scope,
            "*",
            "*",
            false,
            ContributingRule::FailClosed { reason: reason.clone() },
            version,
        ));

        reason
    }
}

/// Warnings worth attaching to an explanation of `resource:action`
fn concerns(warning: &ResolutionWarning, resource: &str, action: &str) -> bool {
    match warning {
        ResolutionWarning::AmbiguousResolution { resource: r, action: a, .. } => r == resource && a == action,
        _ => true,
    }
}

/// Cache entries a set of changes makes stale
///
/// Edited roles, and roles attaching an edited group or permission, are
/// traced through reverse inheritance edges of both graphs to the assigned
/// roles whose expansion includes them.
fn plan_invalidation(old: &ConfigSnapshot, new: &ConfigSnapshot, changes: Option<&[ChangeEvent]>) -> Invalidation {
    let Some(changes) = changes else {
        return Invalidation::All;
    };

    let mut touched: HashSet<RoleId> = HashSet::new();
    let mut principals = HashSet::new();

    for change in changes {
        match change {
            ChangeEvent::RoleChanged { role } => {
                touched.insert(role.clone());
            }
            ChangeEvent::GroupChanged { group } => {
                touched.extend(old.roles_with_group(group));
                touched.extend(new.roles_with_group(group));
            }
            ChangeEvent::PermissionChanged { permission } => {
                touched.extend(old.roles_with_permission(permission));
                touched.extend(new.roles_with_permission(permission));
            }
            ChangeEvent::AssignmentsChanged { principal } => {
                principals.insert(principal.clone());
            }
            ChangeEvent::DirectoryChanged => return Invalidation::All,
        }
    }

    let mut roles = old.graph().dependents(touched.iter());
    roles.extend(new.graph().dependents(touched.iter()));

    Invalidation::Targeted { roles, principals }
}
