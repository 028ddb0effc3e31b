//! Resource caching with a fixed TTL.
//!
//! Every resource kind owns two independent stores: one for individual
//! optimized records keyed by id, one for `list` pages keyed by
//! `(offset, limit)`. Expiry is lazy: an entry past its TTL is treated as
//! absent (and dropped) the next time it is read. Nothing sweeps in the
//! background.

use crate::constants::PERCENTAGE_MULTIPLIER;
use crate::optimizer::{ListPage, OptimizedRecord};
use crate::resource::ResourceKind;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Served from a valid cache entry.
    Cache,
    /// Fetched from Metabase during this call.
    Live,
}

/// Cache entry holding a value and its insertion time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,

    /// When the entry was written.
    pub inserted_at: Instant,

    /// Time-to-live for this entry.
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Create a new cache entry stamped with the current time.
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    /// An entry is valid iff `now - inserted_at < ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }

    /// Check if the entry has expired.
    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(Instant::now())
    }
}

/// Cache statistics for a single store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Total number of cache hits.
    pub hits: u64,

    /// Total number of cache misses (including expired reads).
    pub misses: u64,

    /// Number of entries currently held (valid or not yet swept).
    pub entry_count: usize,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * PERCENTAGE_MULTIPLIER
        }
    }
}

/// A TTL key/value store.
///
/// Writes replace whole entries, so concurrent writers to the same key
/// resolve as last-write-wins.
pub struct CacheStore<K, V> {
    /// Store name used in logs and stats ("cards", "cards-list", ...).
    name: String,

    /// Cache entries.
    entries: RwLock<HashMap<K, CacheEntry<V>>>,

    /// TTL applied to every entry.
    ttl: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Create a new, empty store.
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// TTL applied to entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value if a valid entry exists.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_valid_at(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it, unless a writer replaced it in the meantime.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| !e.is_valid_at(now)) {
            entries.remove(key);
            debug!(store = %self.name, ?key, "Dropped expired cache entry");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace a value.
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry::new(value, self.ttl);
        self.entries.write().insert(key, entry);
    }

    /// Remove one key. Returns whether an entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Return the cached value, or run `fetch`, store its result and return it.
    ///
    /// Fetch errors propagate and leave the store untouched. The lock is not
    /// held across the fetch, so two callers missing on the same key may both
    /// fetch.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<(V, CacheSource), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok((value, CacheSource::Cache));
        }

        let value = fetch().await?;
        self.set(key, value.clone());
        Ok((value, CacheSource::Live))
    }

    /// Get statistics for this store.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len(),
        }
    }
}

/// Pagination key for list stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub offset: usize,
    pub limit: usize,
}

impl ListKey {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// Which stores a `clear_cache` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTarget {
    /// Every store.
    All,
    /// Every list store.
    AllLists,
    /// Every individual-item store.
    AllIndividual,
    /// The item store of one kind.
    Items(ResourceKind),
    /// The list store of one kind.
    List(ResourceKind),
}

impl fmt::Display for CacheTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTarget::All => write!(f, "all"),
            CacheTarget::AllLists => write!(f, "all-lists"),
            CacheTarget::AllIndividual => write!(f, "all-individual"),
            CacheTarget::Items(kind) => write!(f, "{}", kind.as_str()),
            CacheTarget::List(kind) => write!(f, "{}-list", kind.as_str()),
        }
    }
}

/// Error returned when parsing an unknown cache target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCacheTargetError(String);

impl fmt::Display for ParseCacheTargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid cache_type '{}'. Valid values: all, all-lists, all-individual, \
             <kind>, <kind>-list (kind: cards, dashboards, tables, databases, collections, fields)",
            self.0
        )
    }
}

impl std::error::Error for ParseCacheTargetError {}

impl FromStr for CacheTarget {
    type Err = ParseCacheTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "all" => return Ok(CacheTarget::All),
            "all-lists" => return Ok(CacheTarget::AllLists),
            "all-individual" => return Ok(CacheTarget::AllIndividual),
            _ => {}
        }

        let (kind, is_list) = match normalized.strip_suffix("-list") {
            Some(kind) => (kind, true),
            None => (normalized.as_str(), false),
        };

        let kind: ResourceKind = kind
            .parse()
            .map_err(|_| ParseCacheTargetError(s.to_string()))?;

        Ok(if is_list {
            CacheTarget::List(kind)
        } else {
            CacheTarget::Items(kind)
        })
    }
}

/// Outcome of a `clear` call.
#[derive(Debug, Clone, Serialize)]
pub struct ClearReport {
    pub target: String,
    pub stores_cleared: Vec<String>,
    pub entries_removed: usize,
}

/// The twelve process-wide stores: one item store and one list store per kind.
pub struct ResourceCaches {
    items: HashMap<ResourceKind, CacheStore<u64, OptimizedRecord>>,
    lists: HashMap<ResourceKind, CacheStore<ListKey, ListPage>>,
    ttl: Duration,
}

impl ResourceCaches {
    /// Create all stores with the same TTL.
    pub fn new(ttl: Duration) -> Self {
        let items = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, CacheStore::new(kind.as_str(), ttl)))
            .collect();
        let lists = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, CacheStore::new(format!("{kind}-list"), ttl)))
            .collect();

        Self { items, lists, ttl }
    }

    /// TTL shared by every store.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Item store for a kind.
    pub fn items(&self, kind: ResourceKind) -> &CacheStore<u64, OptimizedRecord> {
        // Every kind is inserted in `new`.
        &self.items[&kind]
    }

    /// List store for a kind.
    pub fn lists(&self, kind: ResourceKind) -> &CacheStore<ListKey, ListPage> {
        &self.lists[&kind]
    }

    /// Clear the stores selected by `target`.
    pub fn clear(&self, target: CacheTarget) -> ClearReport {
        let mut stores_cleared = Vec::new();
        let mut entries_removed = 0;

        let mut clear_items = |kind: ResourceKind| {
            let store = self.items(kind);
            entries_removed += store.clear();
            stores_cleared.push(store.name().to_string());
        };
        match target {
            CacheTarget::All | CacheTarget::AllIndividual => {
                ResourceKind::ALL.iter().for_each(|k| clear_items(*k))
            }
            CacheTarget::Items(kind) => clear_items(kind),
            _ => {}
        }

        let mut clear_list = |kind: ResourceKind| {
            let store = self.lists(kind);
            entries_removed += store.clear();
            stores_cleared.push(store.name().to_string());
        };
        match target {
            CacheTarget::All | CacheTarget::AllLists => {
                ResourceKind::ALL.iter().for_each(|k| clear_list(*k))
            }
            CacheTarget::List(kind) => clear_list(kind),
            _ => {}
        }

        info!(
            "Cleared cache target '{}': {} entries across {} stores",
            target,
            entries_removed,
            stores_cleared.len()
        );

        ClearReport {
            target: target.to_string(),
            stores_cleared,
            entries_removed,
        }
    }

    /// Statistics for every store, keyed by store name.
    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        self.items
            .values()
            .map(|s| (s.name().to_string(), s.stats()))
            .chain(self.lists.values().map(|s| (s.name().to_string(), s.stats())))
            .collect()
    }
}

/// Shared cache wrapper.
pub type SharedCaches = Arc<ResourceCaches>;

/// Create the shared set of resource caches.
pub fn new_shared_caches(ttl: Duration) -> SharedCaches {
    Arc::new(ResourceCaches::new(ttl))
}
