//! Two-tier cache: a size-bounded memory tier in front of the persistent store.
//!
//! Reads check memory first and promote persistent hits. Writes go to memory
//! and then through to disk. Disk failures never reach callers: the manager
//! keeps serving from memory and records which keys are not durable.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::audio::dsp::Waveform;
use crate::audio::DecodedAudio;
use crate::config::DaemonConfig;
use crate::types::{CacheCategory, CacheValue};

use super::lru::{LruStats, LruStore};
use super::persistent::PersistentStore;

/// Cache counters and occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    #[serde(flatten)]
    pub memory: LruStats,
    pub hit_count: u64,
    pub miss_count: u64,
    pub total_requests: u64,
    /// Hits over requests as a fraction in `[0, 1]`.
    pub hit_rate: f64,
    pub persist_failures: u64,
    /// Bytes used by persistent records.
    pub disk_usage: u64,
    /// Keys held only in memory because their persistent write failed.
    pub non_durable_keys: usize,
}

/// State guarded by the manager lock.
#[derive(Debug)]
struct CacheState {
    memory: LruStore,
    hit_count: u64,
    miss_count: u64,
    total_requests: u64,
    persist_failures: u64,
    non_durable: HashSet<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<CacheState>,
    persistent: PersistentStore,
}

impl Shared {
    async fn sweep(&self) -> usize {
        // Held so a sweep cannot delete a record that a concurrent set just rewrote.
        let _state = self.state.lock().await;
        match self.persistent.sweep_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Expiry sweep failed");
                0
            }
        }
    }
}

/// Tiered cache shared by the service, the RPC surface and the CLI.
#[derive(Debug)]
pub struct CacheManager {
    shared: Arc<Shared>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    /// Creates a manager over an existing persistent store.
    pub fn new(persistent: PersistentStore, max_memory_bytes: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    memory: LruStore::new(max_memory_bytes),
                    hit_count: 0,
                    miss_count: 0,
                    total_requests: 0,
                    persist_failures: 0,
                    non_durable: HashSet::new(),
                }),
                persistent,
            }),
            sweeper: std::sync::Mutex::new(None),
        }
    }

    /// Builds a manager from daemon configuration and prepares the
    /// persistent directories.
    ///
    /// An unusable cache directory is logged and the manager runs in
    /// memory-only mode.
    pub async fn open(config: &DaemonConfig) -> Self {
        let root = config.effective_cache_path();
        let persistent = PersistentStore::new(&root, config.cache.ttl, config.cache.compression);

        match persistent.open().await {
            Ok(()) => tracing::info!(path = ?root, "Persistent cache ready"),
            Err(e) => {
                tracing::warn!(path = ?root, error = %e, "Persistent cache unavailable, running memory-only")
            }
        }

        Self::new(persistent, config.cache.max_memory_bytes)
    }

    /// Looks up a value, promoting persistent hits into memory.
    ///
    /// Persistent read errors count as misses.
    pub async fn get(&self, category: CacheCategory, key: &str) -> Option<CacheValue> {
        let mut state = self.shared.state.lock().await;
        state.total_requests += 1;

        let composite = category.composite_key(key);
        if let Some(value) = state.memory.get(&composite) {
            let value = value.clone();
            state.hit_count += 1;
            tracing::debug!(%category, key, "Memory cache hit");
            return Some(value);
        }

        let found = match self.shared.persistent.retrieve(category, key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%category, key, error = %e, "Persistent read failed");
                None
            }
        };

        match found {
            Some(value) => {
                state.hit_count += 1;
                let size = value.size_bytes();
                state.memory.set(&composite, value.clone(), size);
                tracing::debug!(%category, key, "Persistent cache hit, promoted");
                Some(value)
            }
            None => {
                state.miss_count += 1;
                tracing::debug!(%category, key, "Cache miss");
                None
            }
        }
    }

    /// Stores a value in memory and writes it through to disk.
    pub async fn set(&self, category: CacheCategory, key: &str, value: CacheValue) {
        let mut state = self.shared.state.lock().await;
        let composite = category.composite_key(key);

        let size = value.size_bytes();
        let persisted = self.shared.persistent.store(category, key, &value).await;
        let evicted = state.memory.set(&composite, value, size);
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Evicted memory cache entries");
        }
        for key in &evicted {
            // A non-durable entry has no disk copy, so eviction loses it.
            if state.non_durable.remove(key) {
                tracing::warn!(key = %key, "Evicted a value that was never persisted; it is lost");
            }
        }

        match persisted {
            Ok(_) => {
                state.non_durable.remove(&composite);
            }
            Err(e) => {
                tracing::warn!(%category, key, error = %e, "Persistent write failed, value kept in memory only");
                state.persist_failures += 1;
                state.non_durable.insert(composite);
            }
        }
    }

    /// Removes a value from both tiers. Missing keys are ignored.
    pub async fn remove(&self, category: CacheCategory, key: &str) {
        let mut state = self.shared.state.lock().await;
        let composite = category.composite_key(key);

        state.memory.delete(&composite);
        state.non_durable.remove(&composite);
        if let Err(e) = self.shared.persistent.remove(category, key).await {
            tracing::warn!(%category, key, error = %e, "Persistent delete failed");
        }
    }

    /// Empties both tiers. Counters are kept.
    pub async fn clear(&self) {
        let mut state = self.shared.state.lock().await;
        state.memory.clear();
        state.non_durable.clear();
        if let Err(e) = self.shared.persistent.clear().await {
            tracing::warn!(error = %e, "Persistent clear failed");
        }
        tracing::info!("Cache cleared");
    }

    /// Returns counters, memory occupancy and disk usage.
    pub async fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock().await;
        let disk_usage = match self.shared.persistent.disk_usage().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to measure disk usage");
                0
            }
        };

        CacheStats {
            memory: state.memory.stats(),
            hit_count: state.hit_count,
            miss_count: state.miss_count,
            total_requests: state.total_requests,
            hit_rate: if state.total_requests > 0 {
                state.hit_count as f64 / state.total_requests as f64
            } else {
                0.0
            },
            persist_failures: state.persist_failures,
            disk_usage,
            non_durable_keys: state.non_durable.len(),
        }
    }

    /// Loads persistent entries into memory without touching the counters.
    ///
    /// Returns how many of `keys` were found.
    pub async fn preload(&self, category: CacheCategory, keys: &[String]) -> usize {
        let mut state = self.shared.state.lock().await;
        let mut loaded = 0;

        for key in keys {
            let composite = category.composite_key(key);
            if state.memory.contains(&composite) {
                loaded += 1;
                continue;
            }
            match self.shared.persistent.retrieve(category, key).await {
                Ok(Some(value)) => {
                    let size = value.size_bytes();
                    state.memory.set(&composite, value, size);
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%category, key = %key, error = %e, "Preload read failed"),
            }
        }

        tracing::debug!(%category, requested = keys.len(), loaded, "Preloaded cache entries");
        loaded
    }

    /// Deletes expired persistent records now. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.shared.sweep().await
    }

    /// Starts the periodic expiry sweep, replacing any running sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_sweeper(&self, interval: Duration) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                shared.sweep().await;
            }
        });

        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        tracing::debug!(?interval, "Cache sweeper started");
    }

    /// Stops the background sweeper. Safe to call more than once.
    pub fn shutdown(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
            tracing::debug!("Cache sweeper stopped");
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, category: CacheCategory, key: &str) -> Option<T> {
        let value = self.get(category, key).await?;
        let json = value.as_json()?;
        match serde_json::from_value(json.clone()) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::warn!(%category, key, error = %e, "Cached document has unexpected shape");
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, category: CacheCategory, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.set(category, key, CacheValue::Json(json)).await,
            Err(e) => tracing::warn!(%category, key, error = %e, "Value not cacheable as JSON"),
        }
    }

    /// Returns a cached waveform.
    pub async fn get_waveform(&self, id: &str) -> Option<Waveform> {
        self.get_json(CacheCategory::Waveforms, id).await
    }

    /// Caches a waveform.
    pub async fn set_waveform(&self, id: &str, waveform: &Waveform) {
        self.set_json(CacheCategory::Waveforms, id, waveform).await
    }

    /// Returns cached decoded audio.
    pub async fn get_audio_data(&self, key: &str) -> Option<DecodedAudio> {
        self.get_json(CacheCategory::AudioData, key).await
    }

    /// Caches decoded audio.
    pub async fn set_audio_data(&self, key: &str, audio: &DecodedAudio) {
        self.set_json(CacheCategory::AudioData, key, audio).await
    }

    pub async fn get_preset(&self, id: &str) -> Option<serde_json::Value> {
        self.get_json(CacheCategory::Presets, id).await
    }

    pub async fn set_preset(&self, id: &str, preset: &serde_json::Value) {
        self.set_json(CacheCategory::Presets, id, preset).await
    }

    pub async fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.get_json(CacheCategory::Metadata, key).await
    }

    pub async fn set_metadata(&self, key: &str, metadata: &serde_json::Value) {
        self.set_json(CacheCategory::Metadata, key, metadata).await
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::dsp::WaveformPeak;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn manager(dir: &TempDir, max_memory: u64) -> CacheManager {
        CacheManager::new(PersistentStore::new(dir.path(), DAY, true), max_memory)
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, 1024);
        let value = CacheValue::Samples(vec![0.25, -0.5]);

        cache.set(CacheCategory::Waveforms, "w1", value.clone()).await;
        assert_eq!(cache.get(CacheCategory::Waveforms, "w1").await, Some(value));
    }

    #[tokio::test]
    async fn same_key_in_different_categories_is_distinct() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, 1024);

        cache
            .set(CacheCategory::Presets, "x", CacheValue::Bytes(vec![1]))
            .await;
        cache
            .set(CacheCategory::Metadata, "x", CacheValue::Bytes(vec![2]))
            .await;

        assert_eq!(
            cache.get(CacheCategory::Presets, "x").await,
            Some(CacheValue::Bytes(vec![1]))
        );
        assert_eq!(
            cache.get(CacheCategory::Metadata, "x").await,
            Some(CacheValue::Bytes(vec![2]))
        );
    }

    #[tokio::test]
    async fn hit_rate_is_a_fraction() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, 1024);
        cache
            .set(CacheCategory::Metadata, "present", CacheValue::Bytes(vec![1]))
            .await;

        for _ in 0..7 {
            assert!(cache.get(CacheCategory::Metadata, "present").await.is_some());
        }
        for i in 0..3 {
            assert!(cache
                .get(CacheCategory::Metadata, &format!("absent-{}", i))
                .await
                .is_none());
        }

        let stats = cache.stats().await;
        assert_eq!(stats.hit_count, 7);
        assert_eq!(stats.miss_count, 3);
        assert_eq!(stats.total_requests, 10);
        assert!((stats.hit_rate - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_stats_have_zero_hit_rate() {
        let dir = TempDir::new().unwrap();
        let stats = manager(&dir, 1024).stats().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn evicted_entry_is_served_from_disk_and_promoted() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, 100);

        cache
            .set(CacheCategory::AudioData, "a", CacheValue::Bytes(vec![1; 60]))
            .await;
        cache
            .set(CacheCategory::AudioData, "b", CacheValue::Bytes(vec![2; 60]))
            .await;
        assert_eq!(cache.stats().await.memory.count, 1);

        let value = cache.get(CacheCategory::AudioData, "a").await;
        assert_eq!(value, Some(CacheValue::Bytes(vec![1; 60])));

        let stats = cache.stats().await;
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.memory.current_size, 60);
    }

    #[tokio::test]
    async fn values_survive_a_new_manager() {
        let dir = TempDir::new().unwrap();
        manager(&dir, 1024)
            .set(CacheCategory::Presets, "p", CacheValue::Bytes(vec![9, 9]))
            .await;

        let reopened = manager(&dir, 1024);
        assert_eq!(
            reopened.get(CacheCategory::Presets, "p").await,
            Some(CacheValue::Bytes(vec![9, 9]))
        );
    }

    #[tokio::test]
    async fn remove_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, 1024);
        cache
            .set(CacheCategory::Presets, "p", CacheValue::Bytes(vec![1]))
            .await;

        cache.remove(CacheCategory::Presets, "p").await;
        cache.remove(CacheCategory::Presets, "p").await;

        assert!(cache.get(CacheCategory::Presets, "p").await.is_none());
        assert!(manager(&dir, 1024)
            .get(CacheCategory::Presets, "p")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, 1024);
        cache
            .set(CacheCategory::Waveforms, "w", CacheValue::Bytes(vec![1; 16]))
            .await;
        cache
            .set(CacheCategory::Metadata, "m", CacheValue::Bytes(vec![2; 16]))
            .await;

        cache.clear().await;

        let stats = cache.stats().await;
        assert_eq!(stats.memory.count, 0);
        assert_eq!(stats.disk_usage, 0);
        assert!(cache.get(CacheCategory::Waveforms, "w").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let dir = TempDir::new().unwrap();
        let short = CacheManager::new(
            PersistentStore::new(dir.path(), Duration::from_millis(20), true),
            1024,
        );
        short
            .set(CacheCategory::Metadata, "m", CacheValue::Bytes(vec![1]))
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        // A fresh manager has nothing in memory, so the read hits the disk.
        let fresh = manager(&dir, 1024);
        assert!(fresh.get(CacheCategory::Metadata, "m").await.is_none());
        assert_eq!(fresh.stats().await.disk_usage, 0);
    }

    #[tokio::test]
    async fn unavailable_disk_degrades_to_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let cache = CacheManager::new(PersistentStore::new(&blocker, DAY, true), 1024);

        cache
            .set(CacheCategory::Waveforms, "w", CacheValue::Bytes(vec![5; 8]))
            .await;
        assert_eq!(
            cache.get(CacheCategory::Waveforms, "w").await,
            Some(CacheValue::Bytes(vec![5; 8]))
        );
        assert!(cache.get(CacheCategory::Waveforms, "other").await.is_none());
        cache.remove(CacheCategory::Waveforms, "other").await;

        let stats = cache.stats().await;
        assert_eq!(stats.persist_failures, 1);
        assert_eq!(stats.non_durable_keys, 1);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);

        cache.remove(CacheCategory::Waveforms, "w").await;
        assert_eq!(cache.stats().await.non_durable_keys, 0);
    }

    #[tokio::test]
    async fn evicted_non_durable_keys_are_forgotten() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let cache = CacheManager::new(PersistentStore::new(&blocker, DAY, true), 100);

        for i in 0..1000 {
            cache
                .set(
                    CacheCategory::AudioData,
                    &format!("k{}", i),
                    CacheValue::Bytes(vec![0; 50]),
                )
                .await;
        }

        let stats = cache.stats().await;
        assert_eq!(stats.memory.count, 2);
        assert_eq!(stats.persist_failures, 1000);
        assert_eq!(stats.non_durable_keys, 2);
        assert!(cache.get(CacheCategory::AudioData, "k0").await.is_none());
        assert!(cache.get(CacheCategory::AudioData, "k999").await.is_some());
    }

    #[tokio::test]
    async fn preload_warms_memory_without_counting() {
        let dir = TempDir::new().unwrap();
        let writer = manager(&dir, 1024);
        writer
            .set(CacheCategory::Presets, "a", CacheValue::Bytes(vec![1]))
            .await;
        writer
            .set(CacheCategory::Presets, "b", CacheValue::Bytes(vec![2]))
            .await;

        let cache = manager(&dir, 1024);
        let keys = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        assert_eq!(cache.preload(CacheCategory::Presets, &keys).await, 2);

        let stats = cache.stats().await;
        assert_eq!(stats.memory.count, 2);
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test]
    async fn typed_helpers_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, 1 << 20);
        let waveform = Waveform {
            peaks: vec![WaveformPeak {
                min: -0.5,
                max: 0.5,
            }],
            width: 1,
            height: 100.0,
            duration: 0.25,
        };
        let preset = serde_json::json!({"reverb": 0.3});

        cache.set_waveform("track-1", &waveform).await;
        cache.set_preset("hall", &preset).await;
        cache
            .set_metadata("track-1", &serde_json::json!({"title": "Intro"}))
            .await;

        assert_eq!(cache.get_waveform("track-1").await, Some(waveform));
        assert_eq!(cache.get_preset("hall").await, Some(preset));
        assert_eq!(
            cache.get_metadata("track-1").await,
            Some(serde_json::json!({"title": "Intro"}))
        );
        assert!(cache.get_audio_data("nope").await.is_none());
    }

    #[tokio::test]
    async fn sweeper_removes_expired_records() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(
            PersistentStore::new(dir.path(), Duration::from_millis(10), false),
            1024,
        );
        cache
            .set(CacheCategory::Metadata, "m", CacheValue::Bytes(vec![1; 64]))
            .await;
        assert!(cache.stats().await.disk_usage > 0);

        cache.start_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.stats().await.disk_usage, 0);
        cache.shutdown();
        cache.shutdown();
    }
}
