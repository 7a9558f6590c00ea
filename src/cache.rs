use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::CacheConfig;
use crate::evaluate::Scope;
use crate::types::{
    ContentHash, EnrichedSchema, FormData, RequestContext, ResolvedSchema, RuleSet,
    TenantOverride,
};

struct Entry<V> {
    value: Arc<V>,
    created_at: Instant,
    access_count: AtomicU64,
    /// Tick of the most recent access, for LRU ordering.
    last_access: AtomicU64,
}

/// Bounded LRU map with an optional time-to-live.
///
/// Lookups take a read lock only; recency is tracked with atomics so
/// concurrent readers never block each other. Inserting the same key twice
/// keeps the later value.
pub struct Cache<K, V> {
    name: &'static str,
    capacity: usize,
    ttl: Option<Duration>,
    entries: RwLock<HashMap<K, Entry<V>>>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    #[must_use]
    pub fn new(name: &'static str, capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            ttl,
            entries: RwLock::new(HashMap::new()),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.created_at) >= ttl)
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = Instant::now();
        let mut stale = false;
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(key) {
                if self.expired(entry, now) {
                    stale = true;
                } else {
                    let tick = self.tick.fetch_add(1, Ordering::Relaxed);
                    entry.last_access.store(tick, Ordering::Relaxed);
                    entry.access_count.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(cache = self.name, ?key, "cache hit");
                    return Some(Arc::clone(&entry.value));
                }
            }
        }
        if stale {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if entries.get(key).is_some_and(|e| self.expired(e, now)) {
                entries.remove(key);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(cache = self.name, ?key, stale, "cache miss");
        None
    }

    /// Store `value`, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: Arc<V>) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            value,
            created_at: Instant::now(),
            access_count: AtomicU64::new(0),
            last_access: AtomicU64::new(tick),
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, entry);
        while entries.len() > self.capacity {
            let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            entries.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(cache = self.name, key = ?victim, "evicted");
        }
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|e| e.value)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of hits served by `key`'s current entry.
    #[must_use]
    pub fn access_count(&self, key: &K) -> Option<u64> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|e| e.access_count.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn stats(&self) -> DomainStats {
        DomainStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Counters for one cache domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Counters for every cache domain. `enriched` is `None` when that cache is
/// disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub resolved: DomainStats,
    pub overrides: DomainStats,
    pub enriched: Option<DomainStats>,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let domain = |f: &mut fmt::Formatter<'_>, name: &str, s: &DomainStats| {
            write!(
                f,
                "{name}: {} hits, {} misses, {} evictions, {} entries",
                s.hits, s.misses, s.evictions, s.entries
            )
        };
        domain(f, "resolved", &self.resolved)?;
        f.write_str("; ")?;
        domain(f, "overrides", &self.overrides)?;
        if let Some(enriched) = &self.enriched {
            f.write_str("; ")?;
            domain(f, "enriched", enriched)?;
        }
        Ok(())
    }
}

/// Key of a cached enriched schema.
///
/// BLAKE3 over the resolved schema's source hash, the tenant, the
/// permission/role fingerprint, the rule set fingerprint and the value of
/// every context path the rules and field conditions read.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnrichedCacheKey([u8; 32]);

impl EnrichedCacheKey {
    /// `None` for requests that must bypass the cache.
    pub(crate) fn for_request(
        resolved: &ResolvedSchema,
        rules: &RuleSet,
        ctx: &RequestContext,
        form: &FormData,
    ) -> Option<Self> {
        if ctx.bypasses_cache() {
            return None;
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(resolved.source_hash().as_bytes());
        let tenant = ctx.tenant_id();
        hasher.update(&(tenant.len() as u64).to_le_bytes());
        hasher.update(tenant.as_bytes());
        hasher.update(&ctx.permission_fingerprint());
        hasher.update(&rules.fingerprint());

        let paths: BTreeSet<&str> = rules
            .read_paths()
            .iter()
            .chain(resolved.read_paths().iter())
            .collect();
        let scope = Scope::new(resolved, ctx, form);
        for path in paths {
            hasher.update(&(path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            match scope.lookup(path) {
                Some(value) => {
                    hasher.update(&[1]);
                    value.hash_into(&mut hasher);
                }
                None => {
                    hasher.update(&[0]);
                }
            }
        }
        Some(Self(*hasher.finalize().as_bytes()))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EnrichedCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnrichedCacheKey({})", crate::types::short_hex(&self.0))
    }
}

impl fmt::Display for EnrichedCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// The three cache domains used by the pipeline.
#[derive(Debug)]
pub struct CacheManager {
    resolved: Cache<ContentHash, ResolvedSchema>,
    overrides: Cache<(String, String), Vec<TenantOverride>>,
    enriched: Option<Cache<EnrichedCacheKey, EnrichedSchema>>,
}

impl CacheManager {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let enriched = config.enriched.enabled.then(|| {
            Cache::new(
                "enriched",
                config.enriched.capacity,
                Some(Duration::from_secs(config.enriched.ttl_seconds)),
            )
        });
        Self {
            resolved: Cache::new("resolved", config.resolved.capacity, None),
            overrides: Cache::new(
                "overrides",
                config.overrides.capacity,
                Some(Duration::from_secs(config.overrides.ttl_minutes.saturating_mul(60))),
            ),
            enriched,
        }
    }

    #[must_use]
    pub fn resolved(&self) -> &Cache<ContentHash, ResolvedSchema> {
        &self.resolved
    }

    #[must_use]
    pub fn overrides(&self) -> &Cache<(String, String), Vec<TenantOverride>> {
        &self.overrides
    }

    #[must_use]
    pub fn enriched(&self) -> Option<&Cache<EnrichedCacheKey, EnrichedSchema>> {
        self.enriched.as_ref()
    }

    /// Seed the resolved cache, e.g. from snapshots taken by a previous process.
    /// Returns how many schemas were inserted.
    pub fn warm_resolved(&self, schemas: impl IntoIterator<Item = ResolvedSchema>) -> usize {
        let mut count = 0;
        for schema in schemas {
            self.resolved.insert(schema.source_hash(), Arc::new(schema));
            count += 1;
        }
        count
    }

    /// Drop cached overrides for one tenant of one schema.
    pub fn invalidate_overrides(&self, schema_id: &str, tenant_id: &str) {
        self.overrides
            .remove(&(schema_id.to_owned(), tenant_id.to_owned()));
    }

    pub fn clear(&self) {
        self.resolved.clear();
        self.overrides.clear();
        if let Some(enriched) = &self.enriched {
            enriched.clear();
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resolved: self.resolved.stats(),
            overrides: self.overrides.stats(),
            enriched: self.enriched.as_ref().map(Cache::stats),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
