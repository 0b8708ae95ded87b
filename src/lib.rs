//! mixdesk-daemon: audio processing with a tiered cache and a worker pool.
//!
//! Decoded audio, waveforms, presets and metadata are cached in a
//! size-bounded in-memory LRU tier backed by a persistent on-disk tier.
//! CPU-heavy audio operations run on a bounded pool of worker threads
//! with per-task timeouts, retries and cancellation.
//!
//! # Modules
//!
//! - [`cache`]: LRU store, persistent store and the two-tier cache manager
//! - [`pool`]: Worker pool, task queue and worker lifecycle
//! - [`audio`]: WAV codec and DSP operations run by the workers
//! - [`service`]: Cache-aware front end over the pool
//! - [`rpc`]: JSON-RPC server over stdio
//! - [`config`]: Runtime configuration (DaemonConfig, CacheConfig, PoolConfig)
//! - [`error`]: Error types and codes (DaemonError, ErrorCode)
//!
//! # Example
//!
//! ```rust,ignore
//! use mixdesk_daemon::{
//!     config::DaemonConfig,
//!     pool::WorkerPool,
//!     types::TaskPayload,
//! };
//!
//! let config = DaemonConfig::from_env();
//! let pool = WorkerPool::with_audio_processor(config.pool.clone());
//!
//! let report = pool
//!     .run(TaskPayload::NormalizeAudio {
//!         channel_data: vec![0.25, -0.5],
//!         target_level: -1.0,
//!     })
//!     .await?;
//! ```

pub mod audio;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod pool;
pub mod rpc;
pub mod service;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use cache::{CacheManager, CacheStats};
pub use config::{CacheConfig, DaemonConfig, PoolConfig};
pub use error::{DaemonError, ErrorCode, Result};
pub use pool::{PoolStats, TaskHandle, WorkerPool};
pub use service::AudioService;
pub use types::{CacheCategory, CacheValue, TaskId, TaskOutput, TaskPayload, TaskReport};
