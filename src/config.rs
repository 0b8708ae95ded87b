//! Daemon configuration module.
//!
//! Contains the runtime configuration for the mixdesk-daemon: where the
//! persistent cache lives, how large the memory tier may grow, and how the
//! worker pool schedules, times out and retries tasks.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default memory tier ceiling (100 MiB).
pub const DEFAULT_MEMORY_CACHE_BYTES: u64 = 100 * 1024 * 1024;

/// Default time-to-live of persistent entries (7 days).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default interval between expiry sweeps (1 hour).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default per-task timeout (30 seconds).
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retry budget per task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for retry backoff (1 second).
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

/// Configuration for the tiered cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum total size of the memory tier in bytes.
    pub max_memory_bytes: u64,

    /// Lifetime of persistent entries.
    pub ttl: Duration,

    /// Whether persistent entries are gzip-compressed.
    pub compression: bool,

    /// Interval between background expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MEMORY_CACHE_BYTES,
            ttl: DEFAULT_CACHE_TTL,
            compression: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on concurrently running worker threads.
    pub max_workers: usize,

    /// Time a dispatched task may run before it is abandoned.
    pub task_timeout: Duration,

    /// Number of retries after a task-level failure.
    pub max_retries: u32,

    /// Base delay for retries; the n-th retry waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Runtime configuration for the daemon.
///
/// This configuration is typically loaded from environment variables at
/// startup and then adjusted by command-line arguments.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    /// Path to the persistent cache directory.
    /// If None, uses the platform-specific default cache location.
    pub cache_path: Option<PathBuf>,

    /// Tiered cache settings.
    pub cache: CacheConfig,

    /// Worker pool settings.
    pub pool: PoolConfig,
}

impl DaemonConfig {
    /// Creates a new DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a DaemonConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `MIXDESK_CACHE_PATH` - Persistent cache directory
    /// - `MIXDESK_MEMORY_CACHE_MB` - Memory tier ceiling in MiB
    /// - `MIXDESK_CACHE_TTL_HOURS` - Persistent entry lifetime in hours
    /// - `MIXDESK_COMPRESSION` - Enable gzip for persistent entries (true/false)
    /// - `MIXDESK_MAX_WORKERS` - Maximum worker threads
    /// - `MIXDESK_TASK_TIMEOUT_MS` - Per-task timeout in milliseconds
    /// - `MIXDESK_MAX_RETRIES` - Retries after task failure
    /// - `MIXDESK_RETRY_BACKOFF_MS` - Base retry delay in milliseconds
    ///
    /// Falls back to defaults for unset or unparseable variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("MIXDESK_CACHE_PATH") {
            config.cache_path = Some(PathBuf::from(path));
        }

        if let Some(mb) = lookup("MIXDESK_MEMORY_CACHE_MB").and_then(|s| s.parse::<u64>().ok()) {
            if mb > 0 {
                config.cache.max_memory_bytes = mb * 1024 * 1024;
            }
        }

        if let Some(hours) = lookup("MIXDESK_CACHE_TTL_HOURS").and_then(|s| s.parse::<u64>().ok())
        {
            if hours > 0 {
                config.cache.ttl = Duration::from_secs(hours * 60 * 60);
            }
        }

        if let Some(flag) = lookup("MIXDESK_COMPRESSION") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => config.cache.compression = true,
                "0" | "false" | "off" | "no" => config.cache.compression = false,
                _ => {}
            }
        }

        if let Some(workers) = lookup("MIXDESK_MAX_WORKERS").and_then(|s| s.parse::<usize>().ok())
        {
            if workers > 0 {
                config.pool.max_workers = workers;
            }
        }

        if let Some(ms) = lookup("MIXDESK_TASK_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
            if ms > 0 {
                config.pool.task_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(retries) = lookup("MIXDESK_MAX_RETRIES").and_then(|s| s.parse::<u32>().ok()) {
            config.pool.max_retries = retries;
        }

        if let Some(ms) = lookup("MIXDESK_RETRY_BACKOFF_MS").and_then(|s| s.parse::<u64>().ok()) {
            config.pool.retry_backoff = Duration::from_millis(ms);
        }

        config
    }

    /// Returns the effective cache path, using platform defaults if not specified.
    pub fn effective_cache_path(&self) -> PathBuf {
        if let Some(ref path) = self.cache_path {
            path.clone()
        } else {
            default_cache_path()
        }
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if self.cache.max_memory_bytes == 0 {
            return Some("max_memory_bytes must be > 0".to_string());
        }

        if self.cache.ttl.is_zero() {
            return Some("cache ttl must be > 0".to_string());
        }

        if self.cache.sweep_interval.is_zero() {
            return Some("sweep_interval must be > 0".to_string());
        }

        if self.pool.max_workers == 0 {
            return Some("max_workers must be > 0".to_string());
        }
        if self.pool.max_workers > 256 {
            return Some(format!(
                "max_workers too high: {} (max 256)",
                self.pool.max_workers
            ));
        }

        if self.pool.task_timeout.is_zero() {
            return Some("task_timeout must be > 0".to_string());
        }

        None
    }
}

/// Returns the host's reported parallelism, or 4 if it cannot be queried.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Returns the platform-specific default cache storage path.
///
/// Uses the `directories` crate to find appropriate locations:
/// - macOS: ~/Library/Caches/mixdesk/store
/// - Linux: ~/.cache/mixdesk/store
/// - Windows: C:\Users\<user>\AppData\Local\mixdesk\cache\store
fn default_cache_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "mixdesk") {
        proj_dirs.cache_dir().join("store")
    } else {
        // Fallback to current directory
        PathBuf::from("./cache")
    }
}
