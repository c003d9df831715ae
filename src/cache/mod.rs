//! Persistent result cache (spec §4.2), grounded on the atomic
//! write-tmp-then-rename persistence pattern of the teacher's
//! `io/cache.rs` `save_cache`/`load_cache` pair, and on `cache_manager.py`'s
//! fingerprint-drift invalidation and three-step eviction policy.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::errors::{CleanupError, Result};
use crate::core::fingerprint::{batch_cache_key, fingerprint, CacheKeyParams};
use crate::core::types::{AnalysisResult, FileMeta};

const CACHE_FORMAT_VERSION: u8 = 2;
const CACHE_FILE_NAME: &str = "analysis_cache_v2.bin";
const METADATA_FILE_NAME: &str = "cache_metadata.json";

/// A single cached analysis, keyed by batch cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: AnalysisResult,
    /// path → fingerprint, covering exactly the files that produced this key.
    pub fingerprints: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
}

/// Human-readable counters persisted alongside the cache, per spec §6's
/// `cache_metadata.json`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Bounds under which the cache evicts entries. Mirrors `CacheConfig`
/// but lives here so the cache can be constructed without the full
/// top-level configuration.
#[derive(Debug, Clone)]
pub struct CacheLimits {
    pub ttl: Duration,
    pub max_size_mib: u64,
    pub max_entries: usize,
    /// Minimum time between opportunistic `cleanup()` sweeps triggered
    /// from `get()` (spec §4.2).
    pub cleanup_interval: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            max_size_mib: 100,
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(6 * 3600),
        }
    }
}

/// Content-addressed, TTL-bounded, size- and entry-capped result cache.
/// The in-memory map is guarded by a single reentrant-in-spirit mutex
/// (spec §5's "in-memory map guarded by a reentrant lock; all mutations
/// serialized"); disk writes go through a temp-file-then-rename swap so
/// a crash mid-write never corrupts the previous generation.
pub struct ResultCache {
    cache_dir: PathBuf,
    limits: CacheLimits,
    store: Mutex<CacheStore>,
    stats: Mutex<CacheStats>,
}

impl ResultCache {
    pub fn new(cache_dir: impl Into<PathBuf>, limits: CacheLimits) -> Self {
        let cache_dir = cache_dir.into();
        let store = Self::load_store(&cache_dir).unwrap_or_default();
        let stats = Self::load_stats(&cache_dir).unwrap_or_default();
        Self {
            cache_dir,
            limits,
            store: Mutex::new(store),
            stats: Mutex::new(stats),
        }
    }

    fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    fn metadata_file(&self) -> PathBuf {
        self.cache_dir.join(METADATA_FILE_NAME)
    }

    /// Loads the on-disk store, treating an unrecognized format-version
    /// byte as absence rather than an error (spec §6, §9 "legacy cache
    /// format migration" design note).
    fn load_store(cache_dir: &Path) -> Option<CacheStore> {
        let path = cache_dir.join(CACHE_FILE_NAME);
        let bytes = fs::read(path).ok()?;
        if bytes.is_empty() || bytes[0] != CACHE_FORMAT_VERSION {
            return None;
        }
        bincode::deserialize(&bytes[1..]).ok()
    }

    fn load_stats(cache_dir: &Path) -> Option<CacheStats> {
        let path = cache_dir.join(METADATA_FILE_NAME);
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn persist_store(&self, store: &CacheStore) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;

        let mut bytes = vec![CACHE_FORMAT_VERSION];
        bytes.extend(
            bincode::serialize(store)
                .map_err(|e| CleanupError::cache(format!("cache serialization failed: {e}")))?,
        );

        let path = self.cache_file();
        let temp_path = path.with_extension("bin.tmp");
        fs::write(&temp_path, &bytes)?;
        harden_permissions(&temp_path);
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn persist_stats(&self, stats: &CacheStats) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let content = serde_json::to_string_pretty(stats)?;
        let path = self.metadata_file();
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// `get(files, params)`: a hit requires the entry to exist, not be
    /// expired, AND every stored fingerprint to equal the current one.
    /// Cache read errors are never raised — disk corruption is simply a
    /// miss (spec §7).
    pub fn get(&self, files: &[FileMeta], params: &CacheKeyParams) -> Option<AnalysisResult> {
        self.maybe_opportunistic_cleanup();

        let key = batch_cache_key(files, params);
        let now = Utc::now();

        let mut store = self.store.lock().expect("cache mutex poisoned");
        let hit = {
            let entry = store.entries.get(&key)?;
            if entry.expires_at <= now {
                false
            } else {
                files
                    .iter()
                    .all(|f| entry.fingerprints.get(&f.path) == Some(&fingerprint(f)))
            }
        };

        if !hit {
            drop(store);
            self.record_miss();
            return None;
        }

        let result = {
            let entry = store.entries.get_mut(&key).expect("checked above");
            entry.access_count += 1;
            entry.last_accessed = now;
            entry.result.clone()
        };
        drop(store);
        self.record_hit();
        Some(result)
    }

    /// `put(files, result, params, ttl)`: insert or replace, persist,
    /// and apply eviction. Write failures are logged, never raised.
    pub fn put(
        &self,
        files: &[FileMeta],
        result: &AnalysisResult,
        params: &CacheKeyParams,
        ttl: Duration,
    ) {
        let key = batch_cache_key(files, params);
        let now = Utc::now();
        let fingerprints = files
            .iter()
            .map(|f| (f.path.clone(), fingerprint(f)))
            .collect();

        let mut store = self.store.lock().expect("cache mutex poisoned");
        store.entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                fingerprints,
                created_at: now,
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24)),
                access_count: 0,
                last_accessed: now,
            },
        );
        self.evict_locked(&mut store);

        if let Err(err) = self.persist_store(&store) {
            warn!(error = %err, "cache persistence failed, continuing in-memory only");
        }
        drop(store);

        let mut stats = self.stats.lock().expect("cache mutex poisoned");
        stats.entry_count = self.store.lock().expect("cache mutex poisoned").entries.len();
        let _ = self.persist_stats(&stats);
    }

    /// Remove every entry whose fingerprint map contains `path`.
    pub fn invalidate(&self, path: &str) {
        let mut store = self.store.lock().expect("cache mutex poisoned");
        store
            .entries
            .retain(|_, entry| !entry.fingerprints.contains_key(path));
        if let Err(err) = self.persist_store(&store) {
            warn!(error = %err, "cache persistence failed during invalidate");
        }
    }

    pub fn clear(&self) {
        let mut store = self.store.lock().expect("cache mutex poisoned");
        store.entries.clear();
        if let Err(err) = self.persist_store(&store) {
            warn!(error = %err, "cache persistence failed during clear");
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().expect("cache mutex poisoned").clone()
    }

    fn record_hit(&self) {
        let mut stats = self.stats.lock().expect("cache mutex poisoned");
        stats.hits += 1;
        let _ = self.persist_stats(&stats);
    }

    fn record_miss(&self) {
        let mut stats = self.stats.lock().expect("cache mutex poisoned");
        stats.misses += 1;
        let _ = self.persist_stats(&stats);
    }

    /// Trigger a non-forced `cleanup()` sweep if the configured interval
    /// has elapsed since the last one (spec §4.2). A cache that has never
    /// been cleaned is treated as due.
    fn maybe_opportunistic_cleanup(&self) {
        let now = Utc::now();
        let due = {
            let stats = self.stats.lock().expect("cache mutex poisoned");
            match stats.last_cleanup {
                None => true,
                Some(last) => match chrono::Duration::from_std(self.limits.cleanup_interval) {
                    Ok(interval) => now - last >= interval,
                    Err(_) => false,
                },
            }
        };
        if due {
            self.cleanup(false);
        }
    }

    /// `cleanup(force)`: evict expired entries unconditionally; if
    /// `force`, also evict down to capacity even when under pressure
    /// thresholds would not otherwise trigger it.
    pub fn cleanup(&self, force: bool) {
        let mut store = self.store.lock().expect("cache mutex poisoned");
        let now = Utc::now();
        store.entries.retain(|_, entry| entry.expires_at > now);
        if force {
            self.evict_to_capacity(&mut store, 1.0);
        } else {
            self.evict_locked(&mut store);
        }
        if let Err(err) = self.persist_store(&store) {
            warn!(error = %err, "cache persistence failed during cleanup");
        }
        let mut stats = self.stats.lock().expect("cache mutex poisoned");
        stats.last_cleanup = Some(now);
        stats.entry_count = store.entries.len();
        let _ = self.persist_stats(&stats);
    }

    /// Three-step eviction (spec §4.2): expired entries are already
    /// dropped by callers that check `expires_at`; here we additionally
    /// cap by entry count (oldest `last_accessed` first) and by
    /// estimated size, matching the spec's "ascending (access_count,
    /// last_accessed) until ≤80% of cap" rule.
    fn evict_locked(&self, store: &mut CacheStore) {
        let now = Utc::now();
        store.entries.retain(|_, entry| entry.expires_at > now);

        if store.entries.len() > self.limits.max_entries {
            self.evict_by_rank(store, self.limits.max_entries);
        }

        let estimated_bytes = Self::estimate_size(store);
        let max_bytes = self.limits.max_size_mib * 1024 * 1024;
        if estimated_bytes > max_bytes {
            let target_entries = ((store.entries.len() as f64) * 0.8).floor() as usize;
            self.evict_by_rank(store, target_entries.max(1));
        }
    }

    fn evict_to_capacity(&self, store: &mut CacheStore, fraction: f64) {
        let target = ((self.limits.max_entries as f64) * fraction).floor() as usize;
        self.evict_by_rank(store, target);
    }

    fn evict_by_rank(&self, store: &mut CacheStore, keep: usize) {
        if store.entries.len() <= keep {
            return;
        }
        let mut ranked: Vec<(String, u64, DateTime<Utc>)> = store
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.access_count, e.last_accessed))
            .collect();
        ranked.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));
        let drop_count = ranked.len() - keep;
        for (key, _, _) in ranked.into_iter().take(drop_count) {
            store.entries.remove(&key);
        }
        debug!(dropped = drop_count, "evicted cache entries under pressure");
    }

    fn estimate_size(store: &CacheStore) -> u64 {
        bincode::serialize(store).map(|b| b.len() as u64).unwrap_or(0)
    }
}

#[cfg(unix)]
fn harden_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn harden_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, Recommendation, RiskLevel, Summary};
    use tempfile::TempDir;

    fn file(path: &str, size: u64) -> FileMeta {
        let now = Utc::now();
        FileMeta {
            path: path.to_string(),
            basename: path.to_string(),
            size_bytes: size,
            extension: "log".to_string(),
            modified: now,
            created: now,
            accessed: now,
            parent_dir: "/tmp".to_string(),
            hidden: false,
            system: false,
        }
    }

    fn params() -> CacheKeyParams {
        CacheKeyParams {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            safety_enabled: true,
        }
    }

    fn sample_result(path: &str) -> AnalysisResult {
        let rec = Recommendation {
            path: path.to_string(),
            category: "temporary".to_string(),
            action: Action::Delete,
            confidence: 0.9,
            rationale: "old log".to_string(),
            risk: RiskLevel::Low,
        };
        AnalysisResult {
            summary: Summary::compute(&[rec.clone()], 1),
            recommendations: vec![rec],
            mode: crate::core::types::Mode::Ai,
            error_kind: None,
            processing_ms: 10,
            file_count: 1,
        }
    }

    #[test]
    fn cold_miss_then_warm_hit_then_invalidated_on_drift() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
        let files = vec![file("/tmp/a.log", 100)];
        let p = params();

        assert!(cache.get(&files, &p).is_none());

        let result = sample_result("/tmp/a.log");
        cache.put(&files, &result, &p, Duration::from_secs(3600));
        assert!(cache.get(&files, &p).is_some());

        let mut drifted = files;
        drifted[0].size_bytes = 200;
        assert!(cache.get(&drifted, &p).is_none());
    }

    #[test]
    fn expired_entries_are_treated_as_misses() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
        let files = vec![file("/tmp/a.log", 100)];
        let p = params();
        let result = sample_result("/tmp/a.log");
        cache.put(&files, &result, &p, Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&files, &p).is_none());
    }

    #[test]
    fn invalidate_removes_entries_containing_path() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
        let files = vec![file("/tmp/a.log", 100)];
        let p = params();
        cache.put(&files, &sample_result("/tmp/a.log"), &p, Duration::from_secs(3600));
        cache.invalidate("/tmp/a.log");
        assert!(cache.get(&files, &p).is_none());
    }

    #[test]
    fn entry_count_never_exceeds_max_entries() {
        let dir = TempDir::new().unwrap();
        let limits = CacheLimits {
            ttl: Duration::from_secs(3600),
            max_size_mib: 100,
            max_entries: 5,
            cleanup_interval: Duration::from_secs(6 * 3600),
        };
        let cache = ResultCache::new(dir.path().to_path_buf(), limits);

        for i in 0..20 {
            let path = format!("/tmp/f{i}.log");
            let files = vec![file(&path, 100)];
            let p = CacheKeyParams {
                provider: "openai".to_string(),
                model: "gpt-4".to_string(),
                temperature: 0.1,
                max_tokens: 4096 + i as u32,
                safety_enabled: true,
            };
            cache.put(&files, &sample_result(&path), &p, Duration::from_secs(3600));
        }

        let store = cache.store.lock().unwrap();
        assert!(store.entries.len() <= 5);
    }

    #[test]
    fn reloading_from_disk_preserves_a_warm_entry() {
        let dir = TempDir::new().unwrap();
        let files = vec![file("/tmp/a.log", 100)];
        let p = params();
        {
            let cache = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
            cache.put(&files, &sample_result("/tmp/a.log"), &p, Duration::from_secs(3600));
        }
        let reloaded = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
        assert!(reloaded.get(&files, &p).is_some());
    }

    #[test]
    fn unrecognized_format_version_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join(CACHE_FILE_NAME), [99, 1, 2, 3]).unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
        let files = vec![file("/tmp/a.log", 100)];
        assert!(cache.get(&files, &params()).is_none());
    }

    #[test]
    fn get_triggers_opportunistic_cleanup_once_interval_elapses() {
        let dir = TempDir::new().unwrap();
        let limits = CacheLimits {
            ttl: Duration::from_secs(0),
            max_size_mib: 100,
            max_entries: 10_000,
            cleanup_interval: Duration::from_millis(1),
        };
        let cache = ResultCache::new(dir.path().to_path_buf(), limits);
        let files = vec![file("/tmp/a.log", 100)];
        let p = params();
        cache.put(&files, &sample_result("/tmp/a.log"), &p, Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.stats().last_cleanup.is_none());
        assert!(cache.get(&files, &p).is_none());
        assert!(cache.stats().last_cleanup.is_some());
        assert_eq!(cache.store.lock().unwrap().entries.len(), 0);
    }

    #[test]
    fn cleanup_evicts_expired_entries_from_the_store_directly() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
        let files = vec![file("/tmp/a.log", 100)];
        let p = params();
        cache.put(&files, &sample_result("/tmp/a.log"), &p, Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.store.lock().unwrap().entries.len(), 1);
        cache.cleanup(false);
        assert_eq!(cache.store.lock().unwrap().entries.len(), 0);
        assert!(cache.stats().last_cleanup.is_some());
    }

    #[test]
    fn clear_empties_the_store() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf(), CacheLimits::default());
        let files = vec![file("/tmp/a.log", 100)];
        let p = params();
        cache.put(&files, &sample_result("/tmp/a.log"), &p, Duration::from_secs(3600));
        cache.clear();
        assert!(cache.get(&files, &p).is_none());
    }
}
