//! Healing Cache (C2).
//!
//! A persistent mapping from a composite key — page-pattern, step
//! kind, label, selector hash — to a previously successful selector,
//! with TTL, success/failure counters, and LRU eviction. Mirrors the
//! teacher's `SelectorCache`/`SmartCache` split: an in-memory mirror
//! guarded by a single lock, updated only after the (here, in-process)
//! persistent write succeeds, so readers never observe a partial
//! update.

use crate::error::EngineResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Composite key identifying one healing cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// URL pattern of the page the step ran on.
    pub page_url_pattern: String,
    /// The step's action kind, as a string (kept loosely typed for forward compatibility).
    pub step_kind: String,
    /// Step label, if any.
    pub label: String,
    /// Hash of the step's original (pre-heal) selector.
    pub selector_hash: String,
}

impl CacheKey {
    /// Build a key, normalizing the label the way the teacher's
    /// selector cache normalizes its lookup key (trim + lowercase) so
    /// near-duplicate labels collide into one entry.
    pub fn new(
        page_url_pattern: impl Into<String>,
        step_kind: impl Into<String>,
        label: impl Into<String>,
        selector_hash: impl Into<String>,
    ) -> Self {
        Self {
            page_url_pattern: page_url_pattern.into(),
            step_kind: step_kind.into(),
            label: label.into().trim().to_lowercase(),
            selector_hash: selector_hash.into(),
        }
    }
}

/// One healing cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingCacheEntry {
    /// The selector originally recorded, before it broke.
    pub original_selector: String,
    /// The selector that healed it.
    pub healed_selector: String,
    /// Confidence at heal time.
    pub confidence_at_heal: f32,
    /// Which strategy/provider produced the heal (e.g. `"semantic"`).
    pub provider: String,
    /// Unix millis the entry was created.
    pub created_at: u64,
    /// Unix millis the entry was last used.
    pub last_used_at: u64,
    /// Cumulative successes when this entry was promoted.
    pub success_count: u32,
    /// Cumulative failures when this entry was promoted.
    pub failure_count: u32,
    /// Unix millis after which the entry is considered expired.
    pub expires_at: u64,
}

impl HealingCacheEntry {
    /// Reliability so far: successes / total attempts. `1.0` with no attempts yet.
    pub fn reliability(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Whether this entry is still usable: not expired, and either
    /// too few attempts to judge, or reliable enough.
    pub fn is_valid(&self, now_ms: u64, min_success_rate: f64) -> bool {
        if now_ms >= self.expires_at {
            return false;
        }
        let total = self.success_count + self.failure_count;
        total < 3 || self.reliability() >= min_success_rate
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// The Healing Cache (C2): TTL + LRU + success-rate eviction over a
/// composite-keyed map of healed selectors.
pub struct HealingCache {
    entries: RwLock<HashMap<CacheKey, HealingCacheEntry>>,
    max_entries: usize,
    ttl: Duration,
    min_success_rate: f64,
}

impl HealingCache {
    /// Build an empty cache with the given limits.
    pub fn new(max_entries: usize, ttl: Duration, min_success_rate: f64) -> Self {
        Self { entries: RwLock::new(HashMap::new()), max_entries, ttl, min_success_rate }
    }

    /// Look up a key, returning a clone of the entry if present and valid.
    pub fn get(&self, key: &CacheKey) -> Option<HealingCacheEntry> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.is_valid(now_ms(), self.min_success_rate) {
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Insert or replace an entry, evicting by LRU if over capacity.
    pub fn put(&self, key: CacheKey, mut entry: HealingCacheEntry) {
        let mut entries = self.entries.write();
        entry.last_used_at = now_ms();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            evict_lru(&mut entries);
        }
        entries.insert(key, entry);
    }

    /// Record a success against a cache-promoted entry: bumps
    /// `success_count`, refreshes `last_used_at`, and extends
    /// `expires_at` by the TTL from now.
    pub fn record_success(&self, key: &CacheKey) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(key) {
            entry.success_count += 1;
            entry.last_used_at = now_ms();
            entry.expires_at = now_ms() + self.ttl.as_millis() as u64;
        }
    }

    /// Record a failure against a cache-promoted entry; evicts it if
    /// it has accumulated enough attempts to be judged unreliable.
    pub fn record_failure(&self, key: &CacheKey) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else { return };
        entry.failure_count += 1;
        entry.last_used_at = now_ms();
        let total = entry.success_count + entry.failure_count;
        if total >= 3 && entry.reliability() < self.min_success_rate {
            entries.remove(key);
        }
    }

    /// Drop every expired or unreliable entry.
    pub fn cleanup(&self) {
        let now = now_ms();
        let min_rate = self.min_success_rate;
        self.entries.write().retain(|_, e| e.is_valid(now, min_rate));
    }

    /// Number of entries currently held (including any that would fail
    /// validity on the next `get`, until `cleanup` runs).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a cache from its persisted JSON file, or start empty if
    /// the file doesn't exist yet (first run).
    pub fn load_from(path: &Path, max_entries: usize, ttl: Duration, min_success_rate: f64) -> EngineResult<Self> {
        let cache = Self::new(max_entries, ttl, min_success_rate);
        if path.exists() {
            let data = std::fs::read(path)?;
            let loaded: Vec<(CacheKey, HealingCacheEntry)> = serde_json::from_slice(&data)?;
            let mut entries = cache.entries.write();
            for (key, entry) in loaded {
                entries.insert(key, entry);
            }
        }
        Ok(cache)
    }

    /// Persist the cache to `path` as a flat list of key/entry pairs
    /// (a plain `HashMap<CacheKey, _>` can't round-trip through JSON
    /// object syntax since its keys aren't strings).
    pub fn save_to(&self, path: &Path) -> EngineResult<()> {
        let snapshot: Vec<(CacheKey, HealingCacheEntry)> =
            self.entries.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn evict_lru(entries: &mut HashMap<CacheKey, HealingCacheEntry>) {
    if let Some(key) = entries
        .iter()
        .min_by_key(|(_, e)| e.last_used_at)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(success: u32, failure: u32, expires_at: u64) -> HealingCacheEntry {
        HealingCacheEntry {
            original_selector: "#old".into(),
            healed_selector: "#new".into(),
            confidence_at_heal: 0.9,
            provider: "semantic".into(),
            created_at: 0,
            last_used_at: 0,
            success_count: success,
            failure_count: failure,
            expires_at,
        }
    }

    #[test]
    fn test_get_miss_then_hit() {
        let cache = HealingCache::new(10, Duration::from_secs(3600), 0.7);
        let key = CacheKey::new("example.com/form", "click", "Submit", "hash1");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), entry(5, 0, now_ms() + 60_000));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_record_success_extends_expiry_and_increments() {
        let cache = HealingCache::new(10, Duration::from_secs(60), 0.7);
        let key = CacheKey::new("example.com/form", "click", "Submit", "hash1");
        cache.put(key.clone(), entry(5, 0, now_ms() + 1000));
        let before = cache.get(&key).unwrap();
        cache.record_success(&key);
        let after = cache.get(&key).unwrap();
        assert_eq!(after.success_count, before.success_count + 1);
        assert!(after.expires_at > before.expires_at);
    }

    #[test]
    fn test_record_failure_evicts_after_threshold_below_min_rate() {
        let cache = HealingCache::new(10, Duration::from_secs(3600), 0.7);
        let key = CacheKey::new("example.com/form", "click", "Submit", "hash1");
        cache.put(key.clone(), entry(1, 1, now_ms() + 60_000));
        cache.record_failure(&key);
        // total=3, successes=1 => reliability 0.33 < 0.7 => evicted.
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_lru_eviction_under_pressure() {
        let cache = HealingCache::new(3, Duration::from_secs(3600), 0.7);
        let a = CacheKey::new("p", "click", "A", "a");
        let b = CacheKey::new("p", "click", "B", "b");
        let c = CacheKey::new("p", "click", "C", "c");
        let d = CacheKey::new("p", "click", "D", "d");

        cache.put(a.clone(), entry(1, 0, now_ms() + 60_000));
        std::thread::sleep(Duration::from_millis(2));
        cache.put(b.clone(), entry(1, 0, now_ms() + 60_000));
        std::thread::sleep(Duration::from_millis(2));
        cache.put(c.clone(), entry(1, 0, now_ms() + 60_000));
        std::thread::sleep(Duration::from_millis(2));
        cache.put(d.clone(), entry(1, 0, now_ms() + 60_000));

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
        assert!(cache.get(&d).is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_expired_entry_is_invalid() {
        let entry = entry(5, 0, now_ms().saturating_sub(1000));
        assert!(!entry.is_valid(now_ms(), 0.7));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rae_cache_test_{}.json", now_ms()));

        let cache = HealingCache::new(10, Duration::from_secs(3600), 0.7);
        let key = CacheKey::new("example.com/form", "click", "Submit", "hash1");
        cache.put(key.clone(), entry(5, 0, now_ms() + 60_000));
        cache.save_to(&path).unwrap();

        let loaded = HealingCache::load_from(&path, 10, Duration::from_secs(3600), 0.7).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get(&key).is_some());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_from_missing_path_starts_empty() {
        let path = std::env::temp_dir().join("rae_cache_does_not_exist.json");
        let cache = HealingCache::load_from(&path, 10, Duration::from_secs(3600), 0.7).unwrap();
        assert!(cache.is_empty());
    }
}
