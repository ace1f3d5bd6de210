//! Effective permission cache with targeted invalidation

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use blake3::Hasher;

use super::builder::EffectivePermissions;
use crate::scope::ScopeRef;
use crate::types::{Principal, PrincipalId, RoleId};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Time-to-live for cached maps
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Cache key type (BLAKE3 hash)
pub type CacheKey = [u8; 32];

/// Cached entry with TTL
#[derive(Clone)]
struct CachedEntry {
    permissions: Arc<EffectivePermissions>,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(permissions: Arc<EffectivePermissions>) -> Self {
        Self {
            permissions,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Which entries a configuration change makes stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Flush everything
    All,
    /// Entries whose covering assignments include one of `roles`, plus every
    /// entry of the listed principals
    Targeted {
        roles: HashSet<RoleId>,
        principals: HashSet<PrincipalId>,
    },
}

impl Invalidation {
    pub fn is_empty(&self) -> bool {
        match self {
            Invalidation::All => false,
            Invalidation::Targeted { roles, principals } => roles.is_empty() && principals.is_empty(),
        }
    }

    fn matches(&self, permissions: &EffectivePermissions) -> bool {
        match self {
            Invalidation::All => true,
            Invalidation::Targeted { roles, principals } => {
                principals.contains(&permissions.principal) || !permissions.roots.is_disjoint(roles)
            }
        }
    }
}

/// Cache of effective permission maps per `(principal, scope context)`
///
/// Provides:
/// - Thread-safe in-memory map with DashMap
/// - TTL-based expiration
/// - BLAKE3 hashing for cache keys
/// - A version guard so a map computed from an old snapshot is never stored
///   after that snapshot has been replaced
pub struct EffectiveCache {
    /// In-memory cache (thread-safe)
    memory_cache: Arc<DashMap<CacheKey, CachedEntry>>,

    /// Cache configuration
    config: CacheConfig,

    /// Snapshot version entries are accepted for
    version: RwLock<u64>,

    /// Cache statistics
    stats: Arc<DashMap<&'static str, usize>>,
}

impl EffectiveCache {
    /// Create a cache accepting entries computed at `version`
    pub fn new(config: CacheConfig, version: u64) -> Self {
        Self {
            memory_cache: Arc::new(DashMap::new()),
            config,
            version: RwLock::new(version),
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Get a cached map
    pub fn get(&self, key: &CacheKey) -> Option<Arc<EffectivePermissions>> {
        if let Some(entry) = self.memory_cache.get(key) {
            if entry.is_expired(self.config.ttl) {
                // Expired - remove and return None
                drop(entry);
                self.memory_cache.remove(key);
                self.increment_stat("expirations");
                return None;
            }

            self.increment_stat("hits");
            return Some(Arc::clone(&entry.permissions));
        }

        self.increment_stat("misses");
        None
    }

    /// Store a map computed from snapshot `version`
    ///
    /// Returns `false` (and stores nothing) when the cache has already moved
    /// to another version.
    pub fn insert(&self, key: CacheKey, version: u64, permissions: Arc<EffectivePermissions>) -> bool {
        let current = self.version.read();
        if *current != version {
            self.increment_stat("stale_inserts");
            return false;
        }

        // Evict old entries if at capacity
        if self.memory_cache.len() >= self.config.capacity {
            self.evict_oldest();
        }

        self.memory_cache.insert(key, CachedEntry::new(permissions));
        true
    }

    /// Drops the entries `invalidation` names and moves to `version`
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, version: u64, invalidation: &Invalidation) -> usize {
        let mut current = self.version.write();

        let before = self.memory_cache.len();
        match invalidation {
            Invalidation::All => self.memory_cache.clear(),
            targeted => self.memory_cache.retain(|_, entry| !targeted.matches(&entry.permissions)),
        }
        let removed = before.saturating_sub(self.memory_cache.len());

        *current = version;
        self.add_stat("invalidations", removed);
        removed
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.memory_cache.clear();
        self.stats.clear();
    }

    /// Removes expired entries
    pub fn cleanup_expired(&self) {
        let ttl = self.config.ttl;
        self.memory_cache.retain(|_, entry| !entry.is_expired(ttl));
    }

    pub fn version(&self) -> u64 {
        *self.version.read()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            invalidations: self.get_stat("invalidations"),
            entries: self.memory_cache.len(),
            max_entries: self.config.capacity,
        }
    }

    /// Compute cache key from principal and scope context
    ///
    /// Assignments are part of the key so callers passing an edited
    /// principal never read a map built for its old assignments.
    pub fn compute_key(principal: &Principal, scope: &ScopeRef) -> CacheKey {
        let mut hasher = Hasher::new();

        // Hash principal
        hasher.update(principal.id.as_bytes());
        hasher.update(&[principal.super_admin as u8]);

        // Hash assignments (sorted)
        let mut assignments: Vec<String> = principal.assignments.iter().map(|a| a.to_string()).collect();
        assignments.sort();
        for assignment in &assignments {
            hasher.update(&[0]);
            hasher.update(assignment.as_bytes());
        }

        // Hash scope context
        hasher.update(&[0xff]);
        hasher.update(scope.to_string().as_bytes());

        *hasher.finalize().as_bytes()
    }

    /// Evict oldest entries
    fn evict_oldest(&self) {
        // Remove up to 10% of entries
        let to_remove = (self.config.capacity / 10).max(1);

        let mut ages: Vec<(CacheKey, Instant)> = self
            .memory_cache
            .iter()
            .map(|entry| (*entry.key(), entry.value().cached_at))
            .collect();
        ages.sort_by_key(|(_, cached_at)| *cached_at);

        for (key, _) in ages.into_iter().take(to_remove) {
            self.memory_cache.remove(&key);
        }
        self.add_stat("evictions", to_remove);
    }

    fn increment_stat(&self, key: &'static str) {
        self.add_stat(key, 1);
    }

    fn add_stat(&self, key: &'static str, amount: usize) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += amount)
            .or_insert(amount);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::builder::EffectivePermissions;
    use crate::types::RoleAssignment;

    fn entry(principal: &Principal, scope: &ScopeRef, roots: &[&str]) -> Arc<EffectivePermissions> {
        let mut permissions = EffectivePermissions::fail_closed(principal, scope, 1, "test");
        permissions.roots = roots.iter().map(|r| r.to_string()).collect();
        Arc::new(permissions)
    }

    fn alice() -> Principal {
        Principal::new("alice").with_assignment(RoleAssignment::global("clerk"))
    }

    #[test]
    fn test_cache_put_get() {
        let cache = EffectiveCache::new(CacheConfig::default(), 1);
        let principal = alice();
        let key = EffectiveCache::compute_key(&principal, &ScopeRef::global());

        // Initially not in cache
        assert!(cache.get(&key).is_none());

        assert!(cache.insert(key, 1, entry(&principal, &ScopeRef::global(), &["clerk"])));
        assert_eq!(cache.get(&key).unwrap().principal, "alice");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_key_depends_on_scope_and_assignments() {
        let principal = alice();
        let base = EffectiveCache::compute_key(&principal, &ScopeRef::global());

        assert_ne!(base, EffectiveCache::compute_key(&principal, &ScopeRef::outlet("o1")));

        let extended = alice().with_assignment(RoleAssignment::new("manager", ScopeRef::business("b1")));
        assert_ne!(base, EffectiveCache::compute_key(&extended, &ScopeRef::global()));

        let reordered = Principal::new("alice")
            .with_assignment(RoleAssignment::new("manager", ScopeRef::business("b1")))
            .with_assignment(RoleAssignment::global("clerk"));
        assert_eq!(
            EffectiveCache::compute_key(&extended, &ScopeRef::global()),
            EffectiveCache::compute_key(&reordered, &ScopeRef::global())
        );
    }

    #[test]
    fn test_stale_version_rejected() {
        let cache = EffectiveCache::new(CacheConfig::default(), 1);
        let principal = alice();
        let key = EffectiveCache::compute_key(&principal, &ScopeRef::global());

        cache.invalidate(2, &Invalidation::All);
        assert!(!cache.insert(key, 1, entry(&principal, &ScopeRef::global(), &["clerk"])));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.version(), 2);
    }

    #[test]
    fn test_targeted_invalidation() {
        let cache = EffectiveCache::new(CacheConfig::default(), 1);
        let clerk = alice();
        let bob = Principal::new("bob").with_assignment(RoleAssignment::global("manager"));
        let carol = Principal::new("carol").with_assignment(RoleAssignment::global("auditor"));

        for (p, roots) in [(&clerk, ["clerk"]), (&bob, ["manager"]), (&carol, ["auditor"])] {
            let key = EffectiveCache::compute_key(p, &ScopeRef::global());
            cache.insert(key, 1, entry(p, &ScopeRef::global(), &roots));
        }

        let removed = cache.invalidate(
            2,
            &Invalidation::Targeted {
                roles: HashSet::from(["manager".to_string()]),
                principals: HashSet::from(["carol".to_string()]),
            },
        );

        assert_eq!(removed, 2);
        assert!(cache.get(&EffectiveCache::compute_key(&clerk, &ScopeRef::global())).is_some());
        assert!(cache.get(&EffectiveCache::compute_key(&bob, &ScopeRef::global())).is_none());
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[test]
    fn test_capacity_eviction() {
        let config = CacheConfig {
            capacity: 10,
            ..Default::default()
        };
        let cache = EffectiveCache::new(config, 1);

        for i in 0..25 {
            let p = Principal::new(format!("user{}", i));
            let key = EffectiveCache::compute_key(&p, &ScopeRef::global());
            cache.insert(key, 1, entry(&p, &ScopeRef::global(), &[]));
        }

        assert!(cache.stats().entries <= 10);
    }

    #[test]
    fn test_cache_ttl() {
        let config = CacheConfig {
            ttl: Duration::from_millis(20),
            ..Default::default()
        };
        let cache = EffectiveCache::new(config, 1);
        let principal = alice();
        let key = EffectiveCache::compute_key(&principal, &ScopeRef::global());

        cache.insert(key, 1, entry(&principal, &ScopeRef::global(), &["clerk"]));
        assert!(cache.get(&key).is_some());

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get(&key).is_none());
        assert!(cache.stats().expirations > 0);
    }
}
