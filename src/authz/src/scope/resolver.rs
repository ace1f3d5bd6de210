/// Scope resolver with ancestry chain building and caching
///
/// Provides the containment test between a grant scope and a request scope,
/// with TTL-based caching of resolved ancestry chains.

use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use tracing::debug;

use super::directory::ScopeDirectory;
use super::types::{ScopeRef, ScopeType};

/// Default cache TTL (60 seconds)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    /// Cached value
    value: T,
    /// Timestamp when entry was created
    created_at: Instant,
    /// Time-to-live duration
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    /// Returns the value if not expired, None otherwise
    fn get(&self) -> Option<&T> {
        if self.is_expired() {
            None
        } else {
            Some(&self.value)
        }
    }
}

/// Statistics about cache performance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,
    /// Number of cache misses
    pub misses: usize,
    /// Number of expired entries encountered
    pub expirations: usize,
    /// Total number of entries in cache
    pub entries: usize,
}

impl CacheStats {
    /// Calculates the cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Resolves scope containment with ancestry chains and caching
///
/// An ancestry chain lists a scope followed by every ancestor up to GLOBAL:
/// `OUTLET:o1` → `[OUTLET:o1, BUSINESS:b1, COMPANY:c1, GLOBAL]`.
/// Once the chain is known, containment is a membership test.
///
/// The resolver performs no I/O; ancestry comes from a [`ScopeDirectory`].
/// Cached chains must be dropped with [`ScopeResolver::clear_cache`] whenever
/// the directory changes.
///
/// # Examples
///
/// ```
/// use scopegate_authz::scope::{ScopeRef, ScopeResolver, StaticScopeDirectory};
///
/// let directory = StaticScopeDirectory::new()
///     .with_business("b1", "c1")
///     .with_outlet("o1", "b1");
/// let resolver = ScopeResolver::new();
///
/// assert!(resolver.covers(&ScopeRef::company("c1"), &ScopeRef::outlet("o1"), &directory));
/// assert!(!resolver.covers(&ScopeRef::outlet("o1"), &ScopeRef::business("b1"), &directory));
/// ```
pub struct ScopeResolver {
    /// Cache for ancestry chains
    chain_cache: Arc<DashMap<ScopeRef, CacheEntry<Arc<[ScopeRef]>>>>,
    /// Cache TTL duration
    ttl: Duration,
    /// Cache statistics
    stats: Arc<DashMap<&'static str, usize>>,
}

impl ScopeResolver {
    /// Creates a new ScopeResolver with default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Creates a new ScopeResolver with custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            chain_cache: Arc::new(DashMap::new()),
            ttl,
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Whether a grant at `grant` applies to a request at `request`
    ///
    /// GLOBAL covers everything, equal scopes always cover, a narrower or
    /// same-level grant never covers a different scope, and otherwise the
    /// grant must appear in the request's ancestry chain.
    pub fn covers(&self, grant: &ScopeRef, request: &ScopeRef, directory: &dyn ScopeDirectory) -> bool {
        if grant.is_global() || grant == request {
            return true;
        }
        if grant.scope_type >= request.scope_type {
            return false;
        }
        self.build_chain(request, directory).contains(grant)
    }

    /// Builds the ancestry chain for `scope`, cached per scope
    ///
    /// Ancestry the directory cannot resolve ends the chain early (GLOBAL is
    /// still appended), so unresolved parents never widen coverage.
    pub fn build_chain(&self, scope: &ScopeRef, directory: &dyn ScopeDirectory) -> Arc<[ScopeRef]> {
        if let Some(entry) = self.chain_cache.get(scope) {
            if let Some(chain) = entry.get() {
                self.increment_stat("chain_hits");
                return Arc::clone(chain);
            }
            self.increment_stat("chain_expirations");
        } else {
            self.increment_stat("chain_misses");
        }

        let chain: Arc<[ScopeRef]> = Self::build_chain_uncached(scope, directory).into();
        self.chain_cache
            .insert(scope.clone(), CacheEntry::new(Arc::clone(&chain), self.ttl));

        chain
    }

    /// Builds a chain without using the cache
    fn build_chain_uncached(scope: &ScopeRef, directory: &dyn ScopeDirectory) -> Vec<ScopeRef> {
        let mut chain = Vec::with_capacity(ScopeType::Outlet.depth() + 1);
        let mut current = scope.clone();

        while !current.is_global() {
            let parent = directory.parent(&current);
            chain.push(current);

            match parent {
                // Each step must move strictly up a level; anything else is a
                // malformed directory and the walk stops.
                Some(parent) if parent.scope_type < chain[chain.len() - 1].scope_type => {
                    current = parent;
                }
                Some(parent) => {
                    debug!("Ignoring non-ascending ancestry {} -> {}", chain[chain.len() - 1], parent);
                    break;
                }
                None => break,
            }
        }

        chain.push(ScopeRef::global());
        chain
    }

    /// Clears the cache
    pub fn clear_cache(&self) {
        self.chain_cache.clear();
        self.stats.clear();
    }

    /// Removes expired entries from the cache
    pub fn cleanup_expired(&self) {
        self.chain_cache.retain(|_, entry| !entry.is_expired());
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("chain_hits"),
            misses: self.get_stat("chain_misses"),
            expirations: self.get_stat("chain_expirations"),
            entries: self.chain_cache.len(),
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Returns the current cache TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::new()
    }
}
